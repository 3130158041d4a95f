// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Seams between the pipeline and the outside world. The rest of
// the pipeline is written against these, so tests can plug in
// fakes without touching the network or a real model directory.
//
//   ArchiveSource      — KaggleSource (infra) or a test double
//   ArtifactRepository — ArtifactStore (infra) or a test double

use std::path::{Path, PathBuf};

use crate::domain::artifact::ModelArtifact;
use crate::domain::cancel::CancelToken;
use crate::domain::error::Result;
use crate::domain::report::TrainingHistory;

// ─── ArchiveSource ────────────────────────────────────────────────────────────
/// Something that can deliver the compressed dataset archive.
pub trait ArchiveSource {
    /// Write the archive for `dataset_id` to `dest`, returning the
    /// number of bytes written.
    ///
    /// Network failures must surface as `PipelineError::Transient`.
    fn fetch(&self, dataset_id: &str, dest: &Path, cancel: &CancelToken) -> Result<u64>;
}

// ─── ArtifactRepository ───────────────────────────────────────────────────────
/// Durable home for checkpoints and training history.
pub trait ArtifactRepository {
    /// Atomically store `artifact` under `name` in `directory`.
    fn save(&self, artifact: &ModelArtifact, name: &str, directory: &Path) -> Result<PathBuf>;

    /// Read back the artifact called `name`.
    fn load(&self, name: &str, directory: &Path) -> Result<ModelArtifact>;

    /// Atomically replace the persisted training history.
    fn save_history(&self, history: &TrainingHistory, directory: &Path) -> Result<PathBuf>;
}
