// ============================================================
// Layer 3 — Pipeline Error Taxonomy
// ============================================================
//   Config       — bad paths, flags or hyperparameters; fail fast
//   Transient    — network / disk contention; caller may retry
//   DataQuality  — missing directory, undecodable image
//   Fatal        — stops the current operation, never retried
//
// Artifact lookups get their own variants so a caller can tell
// "train first" apart from "the file on disk is broken".

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquisition,
    Catalog,
    Batching,
    Training,
    Evaluation,
    ArtifactStore,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Acquisition   => "acquisition",
            Stage::Catalog       => "catalog",
            Stage::Batching      => "batching",
            Stage::Training      => "training",
            Stage::Evaluation    => "evaluation",
            Stage::ArtifactStore => "artifact store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{stage}: transient failure at '{}': {message}", .path.display())]
    Transient {
        stage:   Stage,
        path:    PathBuf,
        message: String,
    },

    #[error("{stage}: data quality issue at '{}': {message}", .path.display())]
    DataQuality {
        stage:   Stage,
        path:    PathBuf,
        message: String,
    },

    #[error("{stage}: fatal failure at '{}': {message}", .path.display())]
    Fatal {
        stage:   Stage,
        path:    PathBuf,
        message: String,
    },

    #[error("no trained model artifact available: {0}")]
    NoArtifact(String),

    #[error("artifact '{name}' not found in '{}'", .dir.display())]
    ArtifactNotFound { name: String, dir: PathBuf },

    #[error("artifact '{name}' is corrupt: {reason}")]
    ArtifactCorrupt { name: String, reason: String },

    #[error("{0} cancelled")]
    Cancelled(Stage),
}

impl PipelineError {
    pub fn transient(stage: Stage, path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Transient { stage, path: path.into(), message: message.to_string() }
    }

    pub fn data_quality(stage: Stage, path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::DataQuality { stage, path: path.into(), message: message.to_string() }
    }

    pub fn fatal(stage: Stage, path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Fatal { stage, path: path.into(), message: message.to_string() }
    }

    /// Only transient failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Re-tag a dependency failure as fatal for `stage`.
    ///
    /// Cancellation and configuration errors pass through unchanged.
    pub fn into_fatal(self, stage: Stage, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Cancelled(_) | Self::Config(_) | Self::Fatal { .. } => self,
            other => Self::fatal(stage, path, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
