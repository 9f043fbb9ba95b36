use reqwest::blocking::Client;
use serde::Deserialize;

use super::config::Config;
use super::error::CatalogError;

/// One session (NWB asset) of a dandiset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub asset_path: String,
    pub asset_id: String,
    pub asset_url: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
struct AssetRecord {
    asset_id: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct AssetPage {
    #[serde(default)]
    next: Option<String>,
    results: Vec<AssetRecord>,
}

/// The compact session identifier of an asset path.
///
/// `sub-AA0308/sub-AA0308_ses-20210414T173129_behavior+image+ophys.nwb` becomes
/// `sub-AA0308_ses-20210414T173129`. When the kept tokens reach the end of the file name, the
/// extension is dropped from the last one.
pub fn session_id_from_path(asset_path: &str) -> String {
    let file_name = asset_path.rsplit('/').next().unwrap_or(asset_path);
    let mut tokens: Vec<&str> = file_name.splitn(3, '_').collect();
    if tokens.len() <= 2 {
        if let Some(last) = tokens.last_mut() {
            if let Some((stem, _)) = last.rsplit_once('.') {
                *last = stem;
            }
        }
    }
    tokens.truncate(2);
    tokens.join("_")
}

/// Lists the sessions of one version of a dandiset through the DANDI REST API
#[derive(Debug, Clone)]
pub struct DandiCatalog {
    client: Client,
    api_base: String,
    dandiset_id: String,
    version: String,
}

impl DandiCatalog {
    pub fn new(client: Client, api_base: &str, dandiset_id: &str, version: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            dandiset_id: dandiset_id.to_string(),
            version: version.to_string(),
        }
    }

    pub fn from_config(client: Client, config: &Config) -> Self {
        Self::new(
            client,
            config.api_base(),
            &config.dandiset_id,
            &config.dandiset_version,
        )
    }

    pub fn assets_url(&self) -> String {
        format!(
            "{}/dandisets/{}/versions/{}/assets/?order=path&metadata=false",
            self.api_base, self.dandiset_id, self.version
        )
    }

    /// Direct download URL of an asset
    pub fn asset_url(&self, asset_id: &str) -> String {
        format!("{}/assets/{}/download/", self.api_base, asset_id)
    }

    /// Fetch every session in path order, following pagination
    pub fn fetch_sessions(&self) -> Result<Vec<SessionDescriptor>, CatalogError> {
        let mut sessions = Vec::new();
        let mut next = Some(self.assets_url());
        while let Some(url) = next {
            log::debug!("Fetching asset page {url}");
            let response = self.client.get(&url).send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(CatalogError::BadStatus {
                    url,
                    status: status.as_u16(),
                });
            }
            let body = response.text()?;
            let (mut page, page_next) = self.parse_page(&body)?;
            sessions.append(&mut page);
            next = page_next;
        }
        log::info!(
            "Found {} sessions in dandiset {} version {}",
            sessions.len(),
            self.dandiset_id,
            self.version
        );
        Ok(sessions)
    }

    /// Parse one page of the asset listing into descriptors and the next page URL
    fn parse_page(
        &self,
        body: &str,
    ) -> Result<(Vec<SessionDescriptor>, Option<String>), CatalogError> {
        let page: AssetPage = serde_json::from_str(body)?;
        let sessions = page
            .results
            .into_iter()
            .map(|record| SessionDescriptor {
                asset_url: self.asset_url(&record.asset_id),
                session_id: session_id_from_path(&record.path),
                asset_path: record.path,
                asset_id: record.asset_id,
            })
            .collect();
        Ok((sessions, page.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "count": 2,
        "next": "https://api.dandiarchive.org/api/dandisets/001256/versions/0.241120.2150/assets/?order=path&metadata=false&page=2",
        "previous": null,
        "results": [
            {
                "asset_id": "ff8b39ad-ff59-4043-9bd1-9fec403cb51b",
                "path": "sub-AA0304/sub-AA0304_ses-20210316T171627_behavior+image+ophys.nwb",
                "size": 1234,
                "created": "2024-11-20T21:50:00Z"
            },
            {
                "asset_id": "0bdf6b04-55d5-4ac2-a1ee-ae4d27ba4d3b",
                "path": "sub-AA0308/sub-AA0308_ses-20210414T173129_behavior+image+ophys.nwb",
                "size": 5678
            }
        ]
    }"#;

    fn catalog() -> DandiCatalog {
        DandiCatalog::from_config(Client::new(), &Config::default())
    }

    #[test]
    fn test_session_id_from_path() {
        assert_eq!(
            session_id_from_path(
                "sub-AA0308/sub-AA0308_ses-20210414T173129_behavior+image+ophys.nwb"
            ),
            "sub-AA0308_ses-20210414T173129"
        );
        assert_eq!(
            session_id_from_path("sub-A_ses-B_ophys.nwb"),
            "sub-A_ses-B"
        );
        assert_eq!(session_id_from_path("sub-A/sub-A.nwb"), "sub-A");
        assert_eq!(session_id_from_path("sub-A/sub-A_ses-B.nwb"), "sub-A_ses-B");
        assert_eq!(session_id_from_path("sub-A_ses-1.5_x.nwb"), "sub-A_ses-1.5");
        assert_eq!(session_id_from_path("sub-A/sub-A_ses-1.5.nwb"), "sub-A_ses-1.5");
    }

    #[test]
    fn test_parse_page() {
        let (sessions, next) = catalog().parse_page(PAGE).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "sub-AA0304_ses-20210316T171627");
        assert_eq!(
            sessions[0].asset_url,
            "https://api.dandiarchive.org/api/assets/ff8b39ad-ff59-4043-9bd1-9fec403cb51b/download/"
        );
        assert_eq!(sessions[1].asset_id, "0bdf6b04-55d5-4ac2-a1ee-ae4d27ba4d3b");
        assert!(next.unwrap().ends_with("&page=2"));
    }

    #[test]
    fn test_last_page_has_no_next() {
        let body = r#"{"count": 0, "next": null, "results": []}"#;
        let (sessions, next) = catalog().parse_page(body).unwrap();
        assert!(sessions.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn test_malformed_page() {
        assert!(matches!(
            catalog().parse_page(r#"{"detail": "Not found."}"#),
            Err(CatalogError::JsonError(_))
        ));
    }

    #[test]
    fn test_staging_urls() {
        let config = Config {
            staging: true,
            ..Config::default()
        };
        let catalog = DandiCatalog::from_config(Client::new(), &config);
        assert_eq!(
            catalog.asset_url("abc"),
            "https://api-staging.dandiarchive.org/api/assets/abc/download/"
        );
        assert_eq!(catalog.assets_url(), config.catalog_url());
    }
}
