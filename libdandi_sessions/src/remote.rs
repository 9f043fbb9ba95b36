use reqwest::blocking::Client;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::Config;
use super::error::StoreError;
use super::hdf_store::Hdf5Store;
use super::lindi_store::LindiStore;
use super::store::NwbStore;

const DANDI_ASSETS_PREFIX: &str = "https://api.dandiarchive.org/api/assets/";
const DANDI_DANDISETS_PREFIX: &str = "https://api.dandiarchive.org/api/dandisets/";
const STAGING_ASSETS_PREFIX: &str = "https://api-staging.dandiarchive.org/api/assets/";
const STAGING_DANDISETS_PREFIX: &str = "https://api-staging.dandiarchive.org/api/dandisets/";
const LINDI_HOST: &str = "https://lindi.neurosift.org";

/// Where a session should be opened from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A pre-built LINDI index of the asset
    Lindi(String),
    /// The raw HDF5 asset (remote URL or local path)
    Hdf5(String),
}

/// Liveness check of a URL
pub trait UrlProbe {
    fn exists(&self, url: &str) -> bool;
}

/// Probe a URL with a HEAD request. Any failure counts as absent.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl UrlProbe for HttpProbe {
    fn exists(&self, url: &str) -> bool {
        match self.client.head(url).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("HEAD request to {url} failed: {e}");
                false
            }
        }
    }
}

/// The candidate LINDI index URL for a DANDI asset URL.
///
/// Returns None when the URL is not a recognized DANDI asset URL. No network access.
pub fn lindi_url_for(nwb_url: &str, dandiset_id: &str) -> Option<String> {
    if nwb_url.ends_with(".lindi.json") || nwb_url.ends_with(".lindi.tar") {
        return Some(nwb_url.to_string());
    }
    let segments: Vec<&str> = nwb_url.split('/').collect();
    let (staging, dandiset_id, asset_id) = if nwb_url.starts_with(STAGING_ASSETS_PREFIX) {
        (true, dandiset_id, *segments.get(5)?)
    } else if nwb_url.starts_with(DANDI_ASSETS_PREFIX) {
        (false, dandiset_id, *segments.get(5)?)
    } else if nwb_url.starts_with(STAGING_DANDISETS_PREFIX)
        || nwb_url.starts_with(DANDI_DANDISETS_PREFIX)
    {
        let assets_index = segments.iter().position(|s| *s == "assets")?;
        (
            nwb_url.starts_with(STAGING_DANDISETS_PREFIX),
            *segments.get(5)?,
            *segments.get(assets_index + 1)?,
        )
    } else {
        return None;
    };
    if dandiset_id.is_empty() || asset_id.is_empty() {
        return None;
    }
    let archive = if staging { "dandi-staging" } else { "dandi" };
    Some(format!(
        "{LINDI_HOST}/{archive}/dandisets/{dandiset_id}/assets/{asset_id}/nwb.lindi.json"
    ))
}

/// Use the LINDI index if one is published for the asset
pub fn try_get_lindi_url(nwb_url: &str, dandiset_id: &str, probe: &dyn UrlProbe) -> Option<String> {
    let candidate = lindi_url_for(nwb_url, dandiset_id)?;
    if candidate == nwb_url || probe.exists(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// Decide where to open nwb_url from. Failing to find a LINDI index is not an error.
pub fn resolve_source(nwb_url: &str, dandiset_id: &str, probe: &dyn UrlProbe) -> SourceLocation {
    match try_get_lindi_url(nwb_url, dandiset_id, probe) {
        Some(url) => SourceLocation::Lindi(url),
        None => SourceLocation::Hdf5(nwb_url.to_string()),
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// File name used to cache a downloaded asset
pub fn cache_file_name(nwb_url: &str) -> String {
    let segments: Vec<&str> = nwb_url.split('/').collect();
    let asset_id = if nwb_url.starts_with(DANDI_ASSETS_PREFIX)
        || nwb_url.starts_with(STAGING_ASSETS_PREFIX)
    {
        segments.get(5).copied().filter(|s| !s.is_empty())
    } else {
        None
    };
    match asset_id {
        Some(id) => format!("{id}.nwb"),
        None => {
            let sanitized: String = nwb_url
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect();
            format!("{}.nwb", sanitized.trim_matches('_'))
        }
    }
}

/// Opens the store behind a session URL.
///
/// LINDI indices are read remotely chunk by chunk. Raw remote HDF5 assets are downloaded
/// once into the cache directory and read from disk.
#[derive(Debug, Clone)]
pub struct StoreOpener {
    client: Client,
    cache_dir: PathBuf,
    dandiset_id: String,
    use_lindi: bool,
}

impl StoreOpener {
    pub fn new(client: Client, cache_dir: &Path, dandiset_id: &str, use_lindi: bool) -> Self {
        Self {
            client,
            cache_dir: cache_dir.to_path_buf(),
            dandiset_id: dandiset_id.to_string(),
            use_lindi,
        }
    }

    /// An opener with its own HTTP client, using the cache and LINDI settings of config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Client::new(),
            config.get_cache_directory(),
            &config.dandiset_id,
            config.use_lindi,
        )
    }

    pub fn resolve(&self, nwb_url: &str) -> SourceLocation {
        if !self.use_lindi || !is_http(nwb_url) {
            return SourceLocation::Hdf5(nwb_url.to_string());
        }
        resolve_source(
            nwb_url,
            &self.dandiset_id,
            &HttpProbe::new(self.client.clone()),
        )
    }

    pub fn open(&self, nwb_url: &str) -> Result<Arc<dyn NwbStore>, StoreError> {
        match self.resolve(nwb_url) {
            SourceLocation::Lindi(url) => {
                log::info!("Loading {nwb_url} from LINDI index {url}");
                Ok(Arc::new(LindiStore::from_url(self.client.clone(), &url)?))
            }
            SourceLocation::Hdf5(url) if is_http(&url) => {
                log::info!("Loading {url} from HDF5");
                let local = self.download(&url)?;
                Ok(Arc::new(Hdf5Store::open(&url, &local)?))
            }
            SourceLocation::Hdf5(path) => {
                log::info!("Loading {path} from local HDF5");
                Ok(Arc::new(Hdf5Store::open(&path, Path::new(&path))?))
            }
        }
    }

    /// Download url into the cache directory unless it is already there
    fn download(&self, url: &str) -> Result<PathBuf, StoreError> {
        let path = self.cache_dir.join(cache_file_name(url));
        if path.exists() {
            log::info!("Using cached copy {}", path.to_string_lossy());
            return Ok(path);
        }
        std::fs::create_dir_all(&self.cache_dir)?;
        let partial = path.with_extension("part");
        let mut response = self.client.get(url).send()?.error_for_status()?;
        let mut file = File::create(&partial)?;
        let bytes = response.copy_to(&mut file)?;
        file.flush()?;
        std::fs::rename(&partial, &path)?;
        log::info!(
            "Downloaded {} to {}",
            human_bytes::human_bytes(bytes as f64),
            path.to_string_lossy()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeProbe {
        live: Vec<String>,
        probed: RefCell<Vec<String>>,
    }

    impl FakeProbe {
        fn new(live: &[&str]) -> Self {
            Self {
                live: live.iter().map(|s| s.to_string()).collect(),
                probed: RefCell::new(Vec::new()),
            }
        }
    }

    impl UrlProbe for FakeProbe {
        fn exists(&self, url: &str) -> bool {
            self.probed.borrow_mut().push(url.to_string());
            self.live.iter().any(|l| l == url)
        }
    }

    const ASSET_URL: &str =
        "https://api.dandiarchive.org/api/assets/ff8b39ad-ff59-4043-9bd1-9fec403cb51b/download/";
    const ASSET_LINDI: &str = "https://lindi.neurosift.org/dandi/dandisets/001256/assets/ff8b39ad-ff59-4043-9bd1-9fec403cb51b/nwb.lindi.json";

    #[test]
    fn test_lindi_url_for_asset_urls() {
        assert_eq!(lindi_url_for(ASSET_URL, "001256").as_deref(), Some(ASSET_LINDI));
        assert_eq!(
            lindi_url_for(
                "https://api-staging.dandiarchive.org/api/assets/abc/download/",
                "000123"
            )
            .as_deref(),
            Some("https://lindi.neurosift.org/dandi-staging/dandisets/000123/assets/abc/nwb.lindi.json")
        );
    }

    #[test]
    fn test_lindi_url_for_dandiset_urls() {
        assert_eq!(
            lindi_url_for(
                "https://api.dandiarchive.org/api/dandisets/000999/versions/draft/assets/abc/download/",
                "001256"
            )
            .as_deref(),
            Some("https://lindi.neurosift.org/dandi/dandisets/000999/assets/abc/nwb.lindi.json")
        );
        assert_eq!(
            lindi_url_for(
                "https://api.dandiarchive.org/api/dandisets/000999/versions/draft/",
                "001256"
            ),
            None
        );
    }

    #[test]
    fn test_lindi_url_for_other_urls() {
        assert_eq!(lindi_url_for("https://example.org/file.nwb", "001256"), None);
        assert_eq!(lindi_url_for("https://api.dandiarchive.org/api/assets/", "001256"), None);
        assert_eq!(lindi_url_for(ASSET_URL, ""), None);
        assert_eq!(
            lindi_url_for("https://example.org/x.lindi.json", "001256").as_deref(),
            Some("https://example.org/x.lindi.json")
        );
    }

    #[test]
    fn test_resolve_source_uses_live_index() {
        let probe = FakeProbe::new(&[ASSET_LINDI]);
        assert_eq!(
            resolve_source(ASSET_URL, "001256", &probe),
            SourceLocation::Lindi(ASSET_LINDI.to_string())
        );
        assert_eq!(probe.probed.borrow().as_slice(), &[ASSET_LINDI.to_string()]);
    }

    #[test]
    fn test_resolve_source_falls_back_to_hdf5() {
        let probe = FakeProbe::new(&[]);
        assert_eq!(
            resolve_source(ASSET_URL, "001256", &probe),
            SourceLocation::Hdf5(ASSET_URL.to_string())
        );
        let probe = FakeProbe::new(&[]);
        assert_eq!(
            resolve_source("https://example.org/file.nwb", "001256", &probe),
            SourceLocation::Hdf5(String::from("https://example.org/file.nwb"))
        );
        assert!(probe.probed.borrow().is_empty());
    }

    #[test]
    fn test_cache_file_name() {
        assert_eq!(
            cache_file_name(ASSET_URL),
            "ff8b39ad-ff59-4043-9bd1-9fec403cb51b.nwb"
        );
        assert_eq!(
            cache_file_name("https://example.org/data/file.nwb"),
            "https___example_org_data_file_nwb.nwb"
        );
    }

    #[test]
    fn test_local_paths_skip_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let opener = StoreOpener::new(Client::new(), dir.path(), "001256", true);
        assert_eq!(
            opener.resolve("/data/session.nwb"),
            SourceLocation::Hdf5(String::from("/data/session.nwb"))
        );
        assert!(matches!(
            opener.open("/data/does-not-exist.nwb"),
            Err(StoreError::NotFound(_))
        ));
    }
}
