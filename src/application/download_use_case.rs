// ============================================================
// Layer 2 — DownloadUseCase
// ============================================================
// Safe by default: without `allow_download` the dataset is only
// inspected (tree listing + integrity check), never fetched.
//
//   Step 1: Ensure dataset     (skipped fetch when inspect-only)
//   Step 2: Explore structure
//   Step 3: Integrity report   → caller maps to an exit code

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::data::acquirer::{self, AcquisitionResult, DatasetAcquirer, DEFAULT_DATASET_ID};
use crate::domain::cancel::CancelToken;
use crate::domain::traits::ArchiveSource;
use crate::infra::kaggle::KaggleSource;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub data_dir:       PathBuf,
    pub dataset_id:     String,
    pub allow_download: bool,
    pub retries:        usize,
    pub retry_delay:    Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            data_dir:       PathBuf::from("data/raw/chest_xray"),
            dataset_id:     DEFAULT_DATASET_ID.to_string(),
            allow_download: false,
            retries:        2,
            retry_delay:    Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub acquisition: AcquisitionResult,
    pub listing:     String,
}

impl DownloadOutcome {
    pub fn is_complete(&self) -> bool {
        self.acquisition.integrity.is_complete()
    }
}

pub struct DownloadUseCase {
    config: DownloadConfig,
    cancel: CancelToken,
}

impl DownloadUseCase {
    pub fn new(config: DownloadConfig) -> Self {
        Self { config, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn execute(&self) -> Result<DownloadOutcome> {
        self.execute_with(KaggleSource::new())
    }

    pub fn execute_with<S: ArchiveSource>(&self, source: S) -> Result<DownloadOutcome> {
        let cfg = &self.config;
        if !cfg.allow_download {
            tracing::info!("Download skipped (pass --download to fetch files)");
        }

        let acquisition = DatasetAcquirer::new(source)
            .with_retries(cfg.retries)
            .with_retry_delay(cfg.retry_delay)
            .with_cancel(self.cancel.clone())
            .ensure(&cfg.dataset_id, &cfg.data_dir, cfg.allow_download)
            .with_context(|| format!("Could not acquire '{}'", cfg.dataset_id))?;

        let listing = acquirer::explore(&cfg.data_dir);
        Ok(DownloadOutcome { acquisition, listing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::acquirer::AcquisitionStatus;
    use crate::data::test_support::write_dataset;
    use crate::domain::error::Result as PipelineResult;
    use std::path::Path;

    struct NoNetwork;

    impl ArchiveSource for NoNetwork {
        fn fetch(&self, _: &str, dest: &Path, _: &CancelToken) -> PipelineResult<u64> {
            panic!("unexpected download to {}", dest.display());
        }
    }

    #[test]
    fn test_inspect_only_on_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = DownloadConfig { data_dir: tmp.path().join("raw"), ..DownloadConfig::default() };
        let outcome = DownloadUseCase::new(cfg).execute_with(NoNetwork).unwrap();
        assert_eq!(outcome.acquisition.status, AcquisitionStatus::NotAvailable);
        assert!(!outcome.is_complete());
        assert!(outcome.listing.contains("No dataset directory"));
    }

    #[test]
    fn test_existing_dataset_verifies() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(1, 1), (1, 1), (1, 1)]);
        let cfg = DownloadConfig {
            data_dir:       tmp.path().to_path_buf(),
            allow_download: true,
            ..DownloadConfig::default()
        };
        let outcome = DownloadUseCase::new(cfg).execute_with(NoNetwork).unwrap();
        assert_eq!(outcome.acquisition.status, AcquisitionStatus::AlreadyPresent);
        assert!(outcome.is_complete());
        assert!(outcome.listing.contains("Total images: 6"));
    }
}
