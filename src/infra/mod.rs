// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Persistence and external services used by the layers above:
//
//   artifact_store.rs — best/final checkpoints, training history
//                       and train_config.json, all written
//                       atomically (temp file + fsync + rename).
//
//   metrics.rs        — per-epoch CSV log for learning curves.
//
//   kaggle.rs         — ArchiveSource that streams the dataset
//                       zip from the Kaggle API.
//
//   credentials.rs    — Kaggle username/key lookup (env vars,
//                       then kaggle.json).

/// Atomic checkpoint, history and config persistence
pub mod artifact_store;

/// Training metrics CSV logger
pub mod metrics;

/// Kaggle download client
pub mod kaggle;

/// Kaggle credential resolution
pub mod credentials;
