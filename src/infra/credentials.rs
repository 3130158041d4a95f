// ============================================================
// Layer 6 — Kaggle Credentials
// ============================================================
// Lookup order, first hit wins:
//   1. KAGGLE_USERNAME + KAGGLE_KEY environment variables
//   2. $KAGGLE_CONFIG_DIR/kaggle.json
//   3. ~/.kaggle/kaggle.json
//
// Only resolved when a download actually happens. Absence is a
// configuration error of that download.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::error::{PipelineError, Result};

pub const USERNAME_VAR:   &str = "KAGGLE_USERNAME";
pub const KEY_VAR:        &str = "KAGGLE_KEY";
pub const CONFIG_DIR_VAR: &str = "KAGGLE_CONFIG_DIR";
const CONFIG_FILE:        &str = "kaggle.json";

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key:      String,
}

// keep the key out of logs
impl fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KaggleCredentials")
            .field("username", &self.username)
            .field("key", &"***")
            .finish()
    }
}

/// Resolve credentials from the process environment and home directory.
pub fn resolve() -> Result<KaggleCredentials> {
    resolve_with(|name| std::env::var(name).ok(), dirs::home_dir())
}

/// Same as [`resolve`] with injectable environment and home dir.
pub fn resolve_with(
    env:  impl Fn(&str) -> Option<String>,
    home: Option<PathBuf>,
) -> Result<KaggleCredentials> {
    let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if let (Some(username), Some(key)) = (non_empty(USERNAME_VAR), non_empty(KEY_VAR)) {
        tracing::debug!("Using Kaggle credentials from environment");
        return Ok(KaggleCredentials { username, key });
    }

    let mut candidates = Vec::new();
    if let Some(dir) = non_empty(CONFIG_DIR_VAR) {
        candidates.push(PathBuf::from(dir).join(CONFIG_FILE));
    }
    if let Some(home) = home {
        candidates.push(home.join(".kaggle").join(CONFIG_FILE));
    }

    for path in &candidates {
        if path.is_file() {
            return read_config(path);
        }
    }

    Err(PipelineError::Config(format!(
        "Kaggle credentials not found: set {USERNAME_VAR}/{KEY_VAR} or create {}",
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" or ")
    )))
}

fn read_config(path: &Path) -> Result<KaggleCredentials> {
    let text = fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("cannot read '{}': {e}", path.display()))
    })?;
    let creds: KaggleCredentials = serde_json::from_str(&text).map_err(|e| {
        PipelineError::Config(format!("malformed '{}': {e}", path.display()))
    })?;
    tracing::debug!("Using Kaggle credentials from '{}'", path.display());
    Ok(creds)
}
