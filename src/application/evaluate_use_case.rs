// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a stored artifact on the test split.
//
//   Step 1: Load artifact      (missing → "no artifact", train first)
//   Step 2: Build catalog
//   Step 3: Test sequence at the artifact's own image size
//   Step 4: Evaluate

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::data::{
    augment::AugmentationConfig,
    batcher::{BatchGeneratorFactory, DEFAULT_PREFETCH},
    catalog::MetadataCatalog,
};
use crate::domain::artifact::BEST;
use crate::domain::cancel::CancelToken;
use crate::domain::report::EvaluationReport;
use crate::infra::artifact_store::ArtifactStore;
use crate::ml::{default_device, evaluator::{self, Evaluator}, InferenceBackend};

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub data_dir:   PathBuf,
    pub model_dir:  PathBuf,
    pub artifact:   String,
    pub batch_size: usize,
    pub prefetch:   usize,
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            data_dir:   PathBuf::from("data/raw/chest_xray"),
            model_dir:  PathBuf::from("models/pneumonia"),
            artifact:   BEST.to_string(),
            batch_size: 32,
            prefetch:   DEFAULT_PREFETCH,
        }
    }
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
    cancel: CancelToken,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn execute(&self) -> Result<EvaluationReport> {
        let cfg = &self.config;

        // ── Step 1: Artifact ──────────────────────────────────────────────────
        let artifact = evaluator::load_artifact(&ArtifactStore::new(), &cfg.artifact, &cfg.model_dir)?;
        tracing::info!(
            "Evaluating '{}' from epoch {} ({}={:.4})",
            cfg.artifact,
            artifact.metadata.epoch,
            artifact.metadata.metric_name,
            artifact.metadata.metric_value
        );

        // ── Step 2–3: Catalog and test sequence ───────────────────────────────
        let catalog = MetadataCatalog::new().build(&cfg.data_dir)?;
        let mut sequences = BatchGeneratorFactory::new(0)
            .with_prefetch(cfg.prefetch)
            .with_cancel(self.cancel.clone())
            .build(&catalog, cfg.batch_size, artifact.metadata.target_size, &AugmentationConfig::none())?;

        // ── Step 4: Evaluate ──────────────────────────────────────────────────
        let report = Evaluator::<InferenceBackend>::new(default_device())
            .with_cancel(self.cancel.clone())
            .evaluate(&artifact, &mut sequences.test)
            .context("Evaluation failed")?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::write_dataset;
    use crate::domain::error::PipelineError;

    #[test]
    fn test_before_training_reports_no_artifact() {
        let data = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        write_dataset(data.path(), [(1, 1), (1, 1), (1, 1)]);
        let cfg = EvaluateConfig {
            data_dir:  data.path().to_path_buf(),
            model_dir: models.path().to_path_buf(),
            ..EvaluateConfig::default()
        };
        let err = EvaluateUseCase::new(cfg).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::NoArtifact(_))));
    }
}
