use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

const DANDI_API: &str = "https://api.dandiarchive.org/api";
const DANDI_STAGING_API: &str = "https://api-staging.dandiarchive.org/api";
const INDEX_NAME: &str = "index.md";
const DIAGNOSTICS_NAME: &str = "diagnostics.h5";

/// Structure representing the application configuration. Contains the dandiset, pathing, and
/// report information. Configs are seralizable and deserializable to YAML using serde and
/// serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub dandiset_id: String,
    pub dandiset_version: String,
    pub staging: bool,
    pub output_path: PathBuf,
    pub cache_path: PathBuf,
    pub use_lindi: bool,
    pub frame_index: usize,
    pub roi_number: usize,
    pub max_sessions: Option<usize>,
}

impl Default for Config {
    /// Generate a new Config pointing at the reference dandiset
    fn default() -> Self {
        Self {
            dandiset_id: String::from("001256"),
            dandiset_version: String::from("0.241120.2150"),
            staging: false,
            output_path: PathBuf::from("./report_output"),
            cache_path: PathBuf::from("./nwb_cache"),
            use_lindi: true,
            frame_index: 10,
            roi_number: 28,
            max_sessions: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        if !config.is_roi_number_valid() {
            return Err(ConfigError::BadRoiNumber(config.roi_number));
        }
        Ok(config)
    }

    /// Base URL of the DANDI REST API for this config
    pub fn api_base(&self) -> &'static str {
        if self.staging {
            DANDI_STAGING_API
        } else {
            DANDI_API
        }
    }

    /// URL of the asset listing for the configured dandiset version
    pub fn catalog_url(&self) -> String {
        format!(
            "{}/dandisets/{}/versions/{}/assets/?order=path&metadata=false",
            self.api_base(),
            self.dandiset_id,
            self.dandiset_version
        )
    }

    /// Get the directory holding the products of one session
    pub fn get_session_directory(&self, session_id: &str) -> PathBuf {
        self.output_path.join("sessions").join(session_id)
    }

    /// Get the path to the diagnostics hdf5 file of one session
    pub fn get_diagnostics_path(&self, session_id: &str) -> PathBuf {
        self.get_session_directory(session_id).join(DIAGNOSTICS_NAME)
    }

    /// The diagnostics path as written in the markdown index (relative to the output directory)
    pub fn get_relative_diagnostics_path(&self, session_id: &str) -> String {
        format!("sessions/{session_id}/{DIAGNOSTICS_NAME}")
    }

    pub fn get_index_path(&self) -> PathBuf {
        self.output_path.join(INDEX_NAME)
    }

    pub fn get_cache_directory(&self) -> &Path {
        &self.cache_path
    }

    /// ROI numbers are 1-based
    pub fn is_roi_number_valid(&self) -> bool {
        self.roi_number >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_round_trip_through_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            max_sessions: Some(3),
            ..Config::default()
        };
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_yaml::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = Config::read_config_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_file() {
        let result = Config::read_config_file(Path::new("/definitely/not/here.yml"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_zero_roi_number_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            roi_number: 0,
            ..Config::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();
        assert!(matches!(
            Config::read_config_file(&path),
            Err(ConfigError::BadRoiNumber(0))
        ));
    }

    #[test]
    fn test_paths() {
        let config = Config::default();
        assert_eq!(
            config.catalog_url(),
            "https://api.dandiarchive.org/api/dandisets/001256/versions/0.241120.2150/assets/?order=path&metadata=false"
        );
        assert_eq!(
            config.get_diagnostics_path("sub-A_ses-B"),
            PathBuf::from("./report_output/sessions/sub-A_ses-B/diagnostics.h5")
        );
        assert_eq!(
            config.get_relative_diagnostics_path("sub-A_ses-B"),
            "sessions/sub-A_ses-B/diagnostics.h5"
        );
    }
}
