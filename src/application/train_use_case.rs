// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate configuration        (fail fast)
//   Step 2: Ensure dataset on disk        (Layer 4 - data::acquirer)
//   Step 3: Build metadata catalog        (Layer 4 - data::catalog)
//   Step 4: Build batch sequences         (Layer 4 - data::batcher)
//   Step 5: Save config                   (Layer 6 - infra)
//   Step 6: Run training loop             (Layer 5 - ml::trainer)
//   Step 7: Evaluate best on test split   (Layer 5 - ml::evaluator)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{
    acquirer::{DatasetAcquirer, DEFAULT_DATASET_ID},
    augment::AugmentationConfig,
    batcher::{BatchGeneratorFactory, DEFAULT_PREFETCH},
    catalog::MetadataCatalog,
};
use crate::domain::artifact::ModelArtifact;
use crate::domain::cancel::CancelToken;
use crate::domain::error::PipelineError;
use crate::domain::record::Split;
use crate::domain::report::{EvaluationReport, TrainingHistory};
use crate::domain::traits::ArchiveSource;
use crate::infra::{artifact_store::ArtifactStore, kaggle::KaggleSource};
use crate::ml::{
    default_device,
    evaluator::Evaluator,
    model::XrayCnnConfig,
    trainer::{Trainer, TrainerConfig},
    InferenceBackend, TrainingBackend,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Every knob of a run. Serialisable so the effective values are
// saved as train_config.json next to the checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_dir:          PathBuf,
    pub dataset_id:        String,
    pub allow_download:    bool,
    pub model_dir:         PathBuf,
    pub batch_size:        usize,
    /// Images are resized to image_size × image_size.
    pub image_size:        u32,
    pub epochs:            usize,
    pub lr:                f64,
    pub patience:          usize,
    pub use_class_weights: bool,
    pub seed:              u64,
    pub prefetch:          usize,
    pub evaluate:          bool,
    pub augmentation:      AugmentationConfig,
    pub model:             XrayCnnConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:          PathBuf::from("data/raw/chest_xray"),
            dataset_id:        DEFAULT_DATASET_ID.to_string(),
            allow_download:    false,
            model_dir:         PathBuf::from("models/pneumonia"),
            batch_size:        32,
            image_size:        224,
            epochs:            50,
            lr:                1e-3,
            patience:          5,
            use_class_weights: true,
            seed:              42,
            prefetch:          DEFAULT_PREFETCH,
            evaluate:          true,
            augmentation:      AugmentationConfig::default(),
            model:             XrayCnnConfig::new(),
        }
    }
}

impl TrainConfig {
    pub fn target_size(&self) -> (u32, u32) {
        (self.image_size, self.image_size)
    }

    /// Reject impossible settings before any I/O happens.
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        let config = |msg: String| Err(PipelineError::Config(msg));
        if self.batch_size == 0 {
            return config("batch size must be at least 1".into());
        }
        if self.epochs == 0 {
            return config("epochs must be at least 1".into());
        }
        if self.prefetch == 0 {
            return config("prefetch must be at least 1".into());
        }
        if !(self.lr.is_finite() && self.lr >= 0.0) {
            return config(format!("learning rate must be finite and >= 0, got {}", self.lr));
        }
        self.model.validate()?;
        self.augmentation.validate()?;
        let min = self.model.min_image_side();
        if self.image_size < min {
            return config(format!(
                "image size {} is below the {}px minimum for {} conv blocks",
                self.image_size, min, self.model.num_blocks
            ));
        }
        Ok(())
    }

    fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            model:         self.model.clone(),
            learning_rate: self.lr,
            patience:      self.patience,
            seed:          self.seed,
            model_dir:     self.model_dir.clone(),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct TrainOutcome {
    pub best:    ModelArtifact,
    pub history: TrainingHistory,
    pub report:  Option<EvaluationReport>,
    pub summary: String,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
    cancel: CancelToken,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the pipeline, downloading from Kaggle if allowed.
    pub fn execute(&self) -> Result<TrainOutcome> {
        self.execute_with(KaggleSource::new())
    }

    /// Run the pipeline with an explicit archive source.
    pub fn execute_with<S: ArchiveSource>(&self, source: S) -> Result<TrainOutcome> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Dataset ───────────────────────────────────────────────────
        let acquisition = DatasetAcquirer::new(source)
            .with_cancel(self.cancel.clone())
            .ensure(&cfg.dataset_id, &cfg.data_dir, cfg.allow_download)
            .context("Dataset acquisition failed")?;
        if !acquisition.is_available() {
            bail!(
                "Dataset not available at '{}'.\n{}\nRun `download --download` or pass --download.",
                cfg.data_dir.display(),
                acquisition.integrity
            );
        }

        // ── Step 3: Catalog ───────────────────────────────────────────────────
        let catalog_builder = MetadataCatalog::new();
        let catalog = catalog_builder.build(&cfg.data_dir)?;
        let summary = catalog_builder.summarize(&catalog);
        tracing::info!("\n{}", summary);

        // ── Step 4: Batch sequences ───────────────────────────────────────────
        let mut sequences = BatchGeneratorFactory::new(cfg.seed)
            .with_prefetch(cfg.prefetch)
            .with_cancel(self.cancel.clone())
            .build(&catalog, cfg.batch_size, cfg.target_size(), &cfg.augmentation)?;

        // ── Step 5: Save config ───────────────────────────────────────────────
        ArtifactStore::new()
            .save_config(cfg, &cfg.model_dir)
            .context("Cannot save training config")?;

        // ── Step 6: Train ─────────────────────────────────────────────────────
        let device = default_device();
        tracing::info!("Using device: {:?}", device);
        let mut trainer = Trainer::<TrainingBackend, _>::new(cfg.trainer_config(), ArtifactStore::new(), device.clone())
            .with_cancel(self.cancel.clone())
            .with_class_weights(catalog.class_weights(Split::Train));
        let (best, history) = trainer
            .train(&mut sequences.train, &mut sequences.val, cfg.epochs, cfg.use_class_weights)
            .context("Training failed")?;

        // ── Step 7: Evaluate ──────────────────────────────────────────────────
        let report = if cfg.evaluate {
            let report = Evaluator::<InferenceBackend>::new(device)
                .with_cancel(self.cancel.clone())
                .evaluate(&best, &mut sequences.test)
                .context("Evaluation of the best checkpoint failed")?;
            Some(report)
        } else {
            None
        };

        Ok(TrainOutcome { best, history, report, summary })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::write_dataset;
    use crate::domain::artifact::{BEST, FINAL};
    use crate::domain::error::Result as PipelineResult;
    use std::path::Path;

    /// Source that must never be called.
    struct NoNetwork;

    impl ArchiveSource for NoNetwork {
        fn fetch(&self, _: &str, dest: &Path, _: &CancelToken) -> PipelineResult<u64> {
            panic!("unexpected download to {}", dest.display());
        }
    }

    fn small_config(data: &Path, models: &Path) -> TrainConfig {
        TrainConfig {
            data_dir:     data.to_path_buf(),
            model_dir:    models.to_path_buf(),
            batch_size:   4,
            image_size:   8,
            epochs:       2,
            augmentation: AugmentationConfig::none(),
            model:        XrayCnnConfig::new().with_base_channels(2).with_hidden(4),
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrainConfig::default().validate().is_ok());
        assert_eq!(TrainConfig::default().target_size(), (224, 224));
    }

    #[test]
    fn test_validate_rejects_tiny_images() {
        let cfg = TrainConfig { image_size: 4, ..TrainConfig::default() };
        assert!(matches!(cfg.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_missing_dataset_without_download_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = small_config(&tmp.path().join("raw"), &tmp.path().join("models"));
        let err = TrainUseCase::new(cfg).execute_with(NoNetwork).unwrap_err();
        assert!(err.to_string().contains("not available"));
    }

    #[test]
    fn test_end_to_end_on_tiny_dataset() {
        let data = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        write_dataset(data.path(), [(4, 6), (2, 2), (2, 3)]);

        let outcome = TrainUseCase::new(small_config(data.path(), models.path()))
            .execute_with(NoNetwork)
            .unwrap();

        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.report.unwrap().samples, 5);
        assert!(outcome.summary.contains("TOTAL: 19 images"));

        let store = ArtifactStore::new();
        assert!(store.exists(BEST, models.path()));
        assert!(store.exists(FINAL, models.path()));
        let saved: TrainConfig = store.load_config(models.path()).unwrap();
        assert_eq!(saved.epochs, 2);
    }
}
