// ============================================================
// Layer 6 — Artifact Store
// ============================================================
// Durable home for everything a training run leaves behind.
//
// Directory layout:
//   models/pneumonia/
//     best.model             ← lowest validation loss so far
//     final.model            ← weights after the last epoch
//     training_history.json  ← per-epoch metrics + stop reason
//     train_config.json      ← effective TrainConfig
//     metrics.csv            ← written by MetricsLogger
//
// .model file format:
//   [0..8)    magic  "PNMART01"
//   [8..16)   u64 LE length N of the metadata block
//   [16..16+N) metadata JSON (ArtifactMetadata)
//   [16+N..)  raw weight bytes
//
// Every write goes to a temp file in the target directory, is
// fsynced, then renamed over the destination. Readers therefore
// see either the old file or the new one, never a mix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::domain::artifact::{ArtifactMetadata, ModelArtifact};
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::report::TrainingHistory;
use crate::domain::traits::ArtifactRepository;

pub const MAGIC:            &[u8; 8] = b"PNMART01";
pub const EXTENSION:        &str     = "model";
pub const HISTORY_FILE:     &str     = "training_history.json";
pub const CONFIG_FILE:      &str     = "train_config.json";
const HEADER_LEN:           usize    = 16;

/// Filesystem-backed ArtifactRepository.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactStore;

impl ArtifactStore {
    pub fn new() -> Self {
        Self
    }

    /// `<directory>/<name>.model`
    pub fn artifact_path(name: &str, directory: &Path) -> PathBuf {
        directory.join(format!("{name}.{EXTENSION}"))
    }

    pub fn exists(&self, name: &str, directory: &Path) -> bool {
        Self::artifact_path(name, directory).is_file()
    }

    pub fn load_history(&self, directory: &Path) -> Result<TrainingHistory> {
        read_json(&directory.join(HISTORY_FILE))
    }

    /// Persist any serializable config as `train_config.json`.
    pub fn save_config<T: Serialize>(&self, config: &T, directory: &Path) -> Result<PathBuf> {
        let path = directory.join(CONFIG_FILE);
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| PipelineError::fatal(Stage::ArtifactStore, &path, e))?;
        write_atomic(&path, &json)?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(path)
    }

    pub fn load_config<T: DeserializeOwned>(&self, directory: &Path) -> Result<T> {
        read_json(&directory.join(CONFIG_FILE))
    }
}

impl ArtifactRepository for ArtifactStore {
    fn save(&self, artifact: &ModelArtifact, name: &str, directory: &Path) -> Result<PathBuf> {
        validate_name(name)?;
        if !artifact.metadata.metric_value.is_finite() {
            return Err(PipelineError::Config(format!(
                "artifact '{name}' has non-finite {} ({})",
                artifact.metadata.metric_name, artifact.metadata.metric_value
            )));
        }
        let path = Self::artifact_path(name, directory);

        let meta = serde_json::to_vec(&artifact.metadata)
            .map_err(|e| PipelineError::fatal(Stage::ArtifactStore, &path, e))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + meta.len() + artifact.weights.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(meta.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&meta);
        bytes.extend_from_slice(&artifact.weights);

        write_atomic(&path, &bytes)?;
        tracing::debug!(
            "Saved artifact '{}' (epoch {}, {}={:.4}) to '{}'",
            name,
            artifact.metadata.epoch,
            artifact.metadata.metric_name,
            artifact.metadata.metric_value,
            path.display()
        );
        Ok(path)
    }

    fn load(&self, name: &str, directory: &Path) -> Result<ModelArtifact> {
        validate_name(name)?;
        let path = Self::artifact_path(name, directory);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::ArtifactNotFound {
                    name: name.to_string(),
                    dir:  directory.to_path_buf(),
                });
            }
            Err(e) => return Err(PipelineError::transient(Stage::ArtifactStore, &path, e)),
        };

        let corrupt = |reason: &str| PipelineError::ArtifactCorrupt {
            name:   name.to_string(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt("truncated header"));
        }
        if &bytes[..8] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[8..HEADER_LEN]);
        let meta_len = u64::from_le_bytes(len_bytes);
        let meta_end = usize::try_from(meta_len)
            .ok()
            .and_then(|n| n.checked_add(HEADER_LEN))
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| corrupt("metadata block runs past end of file"))?;

        let metadata: ArtifactMetadata = serde_json::from_slice(&bytes[HEADER_LEN..meta_end])
            .map_err(|e| corrupt(&format!("unparsable metadata: {e}")))?;
        let artifact = ModelArtifact { metadata, weights: bytes[meta_end..].to_vec() };
        if !artifact.is_intact() {
            return Err(corrupt("weight digest mismatch"));
        }

        tracing::info!(
            "Loaded artifact '{}' ({}, epoch {})",
            name, artifact.metadata.architecture, artifact.metadata.epoch
        );
        Ok(artifact)
    }

    fn save_history(&self, history: &TrainingHistory, directory: &Path) -> Result<PathBuf> {
        let path = directory.join(HISTORY_FILE);
        if let Some(bad) = history.epochs().iter().find(|r| !r.is_finite()) {
            return Err(PipelineError::Config(format!(
                "epoch {} has non-finite losses (loss={}, val_loss={})",
                bad.epoch, bad.loss, bad.val_loss
            )));
        }
        let json = serde_json::to_vec_pretty(history)
            .map_err(|e| PipelineError::fatal(Stage::ArtifactStore, &path, e))?;
        write_atomic(&path, &json)?;
        Ok(path)
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(PipelineError::Config(format!("invalid artifact name '{name}'")));
    }
    Ok(())
}

/// temp file → fsync → rename, all inside `path`'s directory.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let fatal = |e: &dyn std::fmt::Display| PipelineError::fatal(Stage::ArtifactStore, path, e);

    fs::create_dir_all(dir).map_err(|e| fatal(&e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| fatal(&e))?;
    tmp.write_all(bytes).map_err(|e| fatal(&e))?;
    tmp.as_file().sync_all().map_err(|e| fatal(&e))?;
    tmp.persist(path).map_err(|e| fatal(&e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => PipelineError::Config(format!("'{}' does not exist", path.display())),
        _ => PipelineError::transient(Stage::ArtifactStore, path, e),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::fatal(Stage::ArtifactStore, path, e))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::{BEST, FINAL};
    use crate::domain::report::{EpochRecord, StopReason};

    fn artifact(epoch: usize) -> ModelArtifact {
        ModelArtifact::new(
            "xray-cnn-v1",
            serde_json::json!({ "channels": 4 }),
            epoch,
            "val_loss",
            0.25,
            (8, 8),
            vec![epoch as u8; 64],
        )
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new();
        let original = artifact(3);
        store.save(&original, BEST, tmp.path()).unwrap();
        assert_eq!(store.load(BEST, tmp.path()).unwrap(), original);
    }

    #[test]
    fn test_overwrite_leaves_one_valid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new();
        store.save(&artifact(1), FINAL, tmp.path()).unwrap();
        store.save(&artifact(2), FINAL, tmp.path()).unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.load(FINAL, tmp.path()).unwrap().metadata.epoch, 2);
    }

    #[test]
    fn test_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ArtifactStore::new().load(BEST, tmp.path()).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactNotFound { .. }));
    }

    #[test]
    fn test_garbage_and_truncation_are_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new();
        let path = ArtifactStore::artifact_path(BEST, tmp.path());

        fs::write(&path, b"short").unwrap();
        assert!(matches!(store.load(BEST, tmp.path()), Err(PipelineError::ArtifactCorrupt { .. })));

        fs::write(&path, b"NOTMAGIC\x00\x00\x00\x00\x00\x00\x00\x00").unwrap();
        assert!(matches!(store.load(BEST, tmp.path()), Err(PipelineError::ArtifactCorrupt { .. })));

        store.save(&artifact(1), BEST, tmp.path()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(HEADER_LEN + 4);
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(store.load(BEST, tmp.path()), Err(PipelineError::ArtifactCorrupt { .. })));
    }

    #[test]
    fn test_flipped_weight_byte_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new();
        let path = store.save(&artifact(1), BEST, tmp.path()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        let err = store.load(BEST, tmp.path()).unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn test_bad_names_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new();
        for name in ["", "../escape", "a/b", ".."] {
            assert!(matches!(store.save(&artifact(1), name, tmp.path()), Err(PipelineError::Config(_))));
        }
    }

    #[test]
    fn test_unwritable_directory_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let err = ArtifactStore::new().save(&artifact(1), BEST, &blocker).unwrap_err();
        assert!(matches!(err, PipelineError::Fatal { stage: Stage::ArtifactStore, .. }));
    }

    #[test]
    fn test_history_and_config_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new();
        let mut history = TrainingHistory::new();
        history.push(EpochRecord { epoch: 1, loss: 0.7, val_loss: 0.6, accuracy: 0.5, val_accuracy: 0.55 });
        history.mark_best(1);
        history.finish(StopReason::Completed);
        store.save_history(&history, tmp.path()).unwrap();
        assert_eq!(store.load_history(tmp.path()).unwrap(), history);

        store.save_config(&serde_json::json!({ "epochs": 3 }), tmp.path()).unwrap();
        let cfg: serde_json::Value = store.load_config(tmp.path()).unwrap();
        assert_eq!(cfg["epochs"], 3);
    }

    #[test]
    fn test_non_finite_metric_rejected_before_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new();
        let mut nan = artifact(1);
        nan.metadata.metric_value = f64::NAN;
        assert!(matches!(store.save(&nan, BEST, tmp.path()), Err(PipelineError::Config(_))));
        assert!(!store.exists(BEST, tmp.path()));

        let mut history = TrainingHistory::new();
        history.push(EpochRecord { epoch: 1, loss: f64::INFINITY, val_loss: 0.6, accuracy: 0.5, val_accuracy: 0.5 });
        assert!(matches!(store.save_history(&history, tmp.path()), Err(PipelineError::Config(_))));
        assert!(!tmp.path().join(HISTORY_FILE).exists());
    }
}
