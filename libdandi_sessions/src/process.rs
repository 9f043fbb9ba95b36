use reqwest::blocking::Client;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::catalog::{DandiCatalog, SessionDescriptor};
use super::config::Config;
use super::error::{ProcessorError, SessionError};
use super::remote::StoreOpener;
use super::report::{write_diagnostics, write_index, SessionReport};
use super::session::Session;
use super::session_cache::load_session;

/// What a finished run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSummary {
    pub sessions_processed: usize,
    pub sessions_failed: usize,
    pub products_written: usize,
    pub index_path: PathBuf,
}

fn set_progress(status: &Arc<Mutex<f32>>, progress: f32) {
    match status.lock() {
        Ok(mut stat) => *stat = progress,
        Err(e) => log::error!("Could not update progress: {e}"),
    }
}

/// Report every session in descriptors, loading each with loader.
///
/// A session that fails to load is recorded in the index and the run moves on. The index is
/// rewritten after every session so a partial run leaves a usable report.
pub fn process_sessions<F>(
    descriptors: &[SessionDescriptor],
    config: &Config,
    mut loader: F,
    status: &Arc<Mutex<f32>>,
) -> Result<ProcessSummary, ProcessorError>
where
    F: FnMut(&SessionDescriptor) -> Result<Arc<Session>, SessionError>,
{
    let count = match config.max_sessions {
        Some(max) => descriptors.len().min(max),
        None => descriptors.len(),
    };
    let mut summary = ProcessSummary {
        index_path: config.get_index_path(),
        ..Default::default()
    };
    let mut reports: Vec<SessionReport> = Vec::new();
    set_progress(status, 0.0);
    // The index always exists, even before the first session is done
    write_index(config, &reports)?;

    for (idx, descriptor) in descriptors.iter().take(count).enumerate() {
        log::info!(
            "Processing session {} ({}/{})...",
            descriptor.session_id,
            idx + 1,
            count
        );
        let report = match loader(descriptor) {
            Ok(session) => {
                let mut report = SessionReport::build(descriptor, &session, config);
                match write_diagnostics(&report, config) {
                    Ok(written) => {
                        if written.is_some() {
                            summary.products_written += report.products.len();
                        }
                        summary.sessions_processed += 1;
                    }
                    Err(e) => {
                        log::error!(
                            "Error writing diagnostics of session {}: {e}",
                            descriptor.session_id
                        );
                        summary.sessions_failed += 1;
                        report.failure = Some(format!("Could not write diagnostics: {e}"));
                    }
                }
                report
            }
            Err(e) => {
                log::error!("Error processing session {}: {e}", descriptor.session_id);
                summary.sessions_failed += 1;
                SessionReport::failed(descriptor, &e)
            }
        };
        reports.push(report);
        write_index(config, &reports)?;
        set_progress(status, (idx + 1) as f32 / count as f32);
    }

    set_progress(status, 1.0);
    Ok(summary)
}

/// The main loop of dandi_sessions.
///
/// Fetches the session catalog of the configured dandiset and writes the diagnostics report
/// of every session. Progress (fraction of sessions done) is published through status. A
/// catalog failure aborts the run; a session failure does not.
pub fn process(config: Config, status: Arc<Mutex<f32>>) -> Result<ProcessSummary, ProcessorError> {
    let client = Client::new();
    let catalog = DandiCatalog::from_config(client, &config);
    log::info!("Fetching catalog from {}...", catalog.assets_url());
    let descriptors = catalog.fetch_sessions()?;

    let index_path = config.get_index_path();
    if index_path.exists() {
        std::fs::remove_file(&index_path)?;
    }
    std::fs::create_dir_all(&config.output_path)?;
    std::fs::create_dir_all(config.get_cache_directory())?;

    let opener = StoreOpener::from_config(&config);
    let summary = process_sessions(
        &descriptors,
        &config,
        |descriptor| load_session(&descriptor.asset_url, &opener),
        &status,
    )?;
    log::info!(
        "Processed {} sessions ({} failed), wrote {} products. Index at {}",
        summary.sessions_processed,
        summary.sessions_failed,
        summary.products_written,
        summary.index_path.to_string_lossy()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::synthetic_store;
    use std::path::Path;

    fn descriptors(n: usize) -> Vec<SessionDescriptor> {
        (0..n)
            .map(|i| SessionDescriptor {
                asset_path: format!("sub-{i}/sub-{i}_ses-{i}_ophys.nwb"),
                asset_id: format!("asset-{i}"),
                asset_url: format!("https://api.dandiarchive.org/api/assets/asset-{i}/download/"),
                session_id: format!("sub-{i}_ses-{i}"),
            })
            .collect()
    }

    fn test_config(dir: &Path) -> Config {
        Config {
            output_path: dir.join("out"),
            cache_path: dir.join("cache"),
            frame_index: 2,
            roi_number: 1,
            ..Config::default()
        }
    }

    fn load(descriptor: &SessionDescriptor) -> Result<Arc<Session>, SessionError> {
        if descriptor.session_id == "sub-1_ses-1" {
            return Err(SessionError::OpenError(crate::error::StoreError::NotFound(
                descriptor.asset_url.clone(),
            )));
        }
        Ok(Arc::new(Session::from_store(
            &descriptor.asset_url,
            Arc::new(synthetic_store(2, &[], 3)),
        )?))
    }

    #[test]
    fn test_failed_session_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let status = Arc::new(Mutex::new(0.0));
        let summary = process_sessions(&descriptors(3), &config, load, &status).unwrap();

        assert_eq!(summary.sessions_processed, 2);
        assert_eq!(summary.sessions_failed, 1);
        assert_eq!(summary.products_written, 16);
        assert_eq!(*status.lock().unwrap(), 1.0);

        assert!(config.get_diagnostics_path("sub-0_ses-0").exists());
        assert!(!config.get_diagnostics_path("sub-1_ses-1").exists());
        assert!(config.get_diagnostics_path("sub-2_ses-2").exists());

        let index = std::fs::read_to_string(summary.index_path).unwrap();
        assert!(index.starts_with("# Dandiset 001256"));
        let sections: Vec<&str> = index.matches("\n## ").collect();
        assert_eq!(sections.len(), 3);
        assert!(index.contains("**Error processing session:**"));
    }

    #[test]
    fn test_unwritable_session_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // A plain file where the first session's directory should go
        let blocked = config.get_session_directory("sub-0_ses-0");
        std::fs::create_dir_all(blocked.parent().unwrap()).unwrap();
        std::fs::write(&blocked, b"in the way").unwrap();

        let status = Arc::new(Mutex::new(0.0));
        let mut loaded = Vec::new();
        let summary = process_sessions(
            &descriptors(3),
            &config,
            |descriptor| {
                loaded.push(descriptor.session_id.clone());
                load(descriptor)
            },
            &status,
        )
        .unwrap();

        assert_eq!(loaded, vec!["sub-0_ses-0", "sub-1_ses-1", "sub-2_ses-2"]);
        assert_eq!(summary.sessions_processed, 1);
        assert_eq!(summary.sessions_failed, 2);
        assert_eq!(summary.products_written, 8);
        assert!(config.get_diagnostics_path("sub-2_ses-2").exists());

        let index = std::fs::read_to_string(summary.index_path).unwrap();
        let first = index
            .split("## sub-0_ses-0")
            .nth(1)
            .and_then(|rest| rest.split("\n## ").next())
            .unwrap();
        assert!(first.contains("Could not write diagnostics"));
        assert!(index.contains("## sub-2_ses-2"));
    }

    #[test]
    fn test_max_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            max_sessions: Some(1),
            ..test_config(dir.path())
        };
        let status = Arc::new(Mutex::new(0.0));
        let mut loaded = Vec::new();
        let summary = process_sessions(
            &descriptors(3),
            &config,
            |descriptor| {
                loaded.push(descriptor.session_id.clone());
                load(descriptor)
            },
            &status,
        )
        .unwrap();
        assert_eq!(loaded, vec!["sub-0_ses-0"]);
        assert_eq!(summary.sessions_processed, 1);
    }

    #[test]
    fn test_empty_catalog_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let status = Arc::new(Mutex::new(0.0));
        let summary = process_sessions(&[], &config, load, &status).unwrap();
        assert_eq!(summary.sessions_processed, 0);
        let index = std::fs::read_to_string(summary.index_path).unwrap();
        assert!(index.starts_with("# Dandiset 001256"));
        assert!(!index.contains("## "));
    }
}
