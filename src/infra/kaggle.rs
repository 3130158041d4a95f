// ============================================================
// Layer 6 — Kaggle Archive Source
// ============================================================
// Production ArchiveSource: downloads the dataset zip from the
// Kaggle public API with HTTP basic auth and streams it to disk.
//
//   GET {api_base}/datasets/download/{owner}/{dataset}
//
// Status mapping:
//   401 / 403       → Config    (bad credentials, rules not accepted)
//   404             → Config    (unknown dataset id)
//   429 / 5xx / I/O → Transient (worth retrying)

use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::domain::cancel::CancelToken;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::traits::ArchiveSource;
use crate::infra::credentials::{self, KaggleCredentials};

pub const DEFAULT_API_BASE: &str = "https://www.kaggle.com/api/v1";

const CHUNK_SIZE: usize = 64 * 1024;
// progress line every this many bytes
const LOG_EVERY:  u64   = 64 * 1024 * 1024;

pub struct KaggleSource {
    api_base:    String,
    credentials: Option<KaggleCredentials>,
    timeout:     Duration,
}

impl Default for KaggleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KaggleSource {
    /// Credentials are resolved lazily on the first fetch.
    pub fn new() -> Self {
        Self {
            api_base:    DEFAULT_API_BASE.to_string(),
            credentials: None,
            timeout:     Duration::from_secs(30 * 60),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_credentials(mut self, credentials: KaggleCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn download_url(&self, dataset_id: &str) -> Result<String> {
        let valid = dataset_id
            .split_once('/')
            .map(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'))
            .unwrap_or(false);
        if !valid {
            return Err(PipelineError::Config(format!(
                "dataset id must look like 'owner/name', got '{dataset_id}'"
            )));
        }
        Ok(format!("{}/datasets/download/{}", self.api_base, dataset_id))
    }
}

impl ArchiveSource for KaggleSource {
    fn fetch(&self, dataset_id: &str, dest: &Path, cancel: &CancelToken) -> Result<u64> {
        let url = self.download_url(dataset_id)?;
        let creds = match &self.credentials {
            Some(c) => c.clone(),
            None    => credentials::resolve()?,
        };

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot build HTTP client: {e}")))?;

        tracing::info!("GET {}", url);
        let mut response = client
            .get(&url)
            .basic_auth(&creds.username, Some(&creds.key))
            .send()
            .map_err(|e| PipelineError::transient(Stage::Acquisition, dest, e))?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PipelineError::Config(format!(
                    "Kaggle rejected credentials for '{}' ({status}); check kaggle.json and accept the dataset rules",
                    creds.username
                )));
            }
            StatusCode::NOT_FOUND => {
                return Err(PipelineError::Config(format!("dataset '{dataset_id}' not found on Kaggle")));
            }
            s => {
                return Err(PipelineError::transient(Stage::Acquisition, dest, format!("HTTP {s} from {url}")));
            }
        }

        let total = response.content_length();
        let file = File::create(dest)
            .map_err(|e| PipelineError::transient(Stage::Acquisition, dest, e))?;
        let mut writer = BufWriter::new(file);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        let mut next_log = LOG_EVERY;

        loop {
            cancel.check(Stage::Acquisition)?;
            let n = response
                .read(&mut buf)
                .map_err(|e| PipelineError::transient(Stage::Acquisition, dest, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|e| PipelineError::transient(Stage::Acquisition, dest, e))?;
            written += n as u64;
            if written >= next_log {
                match total {
                    Some(t) => tracing::info!("Downloaded {} / {} MiB", written >> 20, t >> 20),
                    None    => tracing::info!("Downloaded {} MiB", written >> 20),
                }
                next_log += LOG_EVERY;
            }
        }
        writer
            .flush()
            .map_err(|e| PipelineError::transient(Stage::Acquisition, dest, e))?;

        if let Some(t) = total {
            if t != written {
                return Err(PipelineError::transient(
                    Stage::Acquisition,
                    dest,
                    format!("short download: {written} of {t} bytes"),
                ));
            }
        }
        Ok(written)
    }
}
