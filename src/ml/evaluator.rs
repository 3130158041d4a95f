// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Scores a ModelArtifact on the test BatchSequence.
//
//   artifact ──▶ rebuild XrayCnn from metadata + weights
//   test_seq ──▶ one pass, P(PNEUMONIA) per image
//                  │
//                  ▼
//            EvaluationReport::from_predictions
//              (confusion matrix at 0.5 + ROC AUC)
//
// No files are written; the only side effect is logging.

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use std::marker::PhantomData;
use std::path::Path;

use crate::data::batcher::BatchSequence;
use crate::domain::artifact::ModelArtifact;
use crate::domain::cancel::CancelToken;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{Label, Split};
use crate::domain::report::EvaluationReport;
use crate::domain::traits::ArtifactRepository;
use crate::ml::model::{XrayCnn, XrayCnnConfig, ARCHITECTURE};
use crate::ml::tensors::XrayBatcher;

pub struct Evaluator<B: Backend> {
    device:   B::Device,
    cancel:   CancelToken,
    _backend: PhantomData<B>,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device, cancel: CancelToken::new(), _backend: PhantomData }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Load `name` from `directory` and evaluate it.
    pub fn evaluate_stored<R: ArtifactRepository>(
        &self,
        repository: &R,
        name:       &str,
        directory:  &Path,
        test_seq:   &mut BatchSequence,
    ) -> Result<EvaluationReport> {
        let artifact = load_artifact(repository, name, directory)?;
        self.evaluate(&artifact, test_seq)
    }

    pub fn evaluate(&self, artifact: &ModelArtifact, test_seq: &mut BatchSequence) -> Result<EvaluationReport> {
        let model = self.rebuild(artifact)?;

        if test_seq.is_empty() {
            return Err(PipelineError::fatal(Stage::Evaluation, Split::Test.dir_name(), "test split is empty"));
        }
        if test_seq.target_size() != artifact.metadata.target_size {
            let (w, h) = artifact.metadata.target_size;
            return Err(PipelineError::Config(format!(
                "artifact was trained on {w}x{h} images but the test sequence yields {}x{}",
                test_seq.target_size().0,
                test_seq.target_size().1
            )));
        }

        let batcher = XrayBatcher::<B>::new(self.device.clone(), test_seq.target_size());
        let mut probabilities = Vec::with_capacity(test_seq.record_count());
        let mut positives     = Vec::with_capacity(test_seq.record_count());

        let mut iter = test_seq
            .iter()
            .map_err(|e| e.into_fatal(Stage::Evaluation, Split::Test.dir_name()))?;
        for batch in iter.by_ref() {
            self.cancel.check(Stage::Evaluation)?;
            positives.extend(batch.samples.iter().map(|s| s.label == Label::Pneumonia));
            let tensors = batcher.batch(batch.samples);
            probabilities.extend(model.predict_positive(tensors.images));
        }
        let summary = iter.finish().map_err(|e| match e {
            PipelineError::Cancelled(_) => PipelineError::Cancelled(Stage::Evaluation),
            other => other.into_fatal(Stage::Evaluation, Split::Test.dir_name()),
        })?;

        if probabilities.is_empty() {
            return Err(PipelineError::fatal(
                Stage::Evaluation,
                Split::Test.dir_name(),
                "no decodable images in the test split",
            ));
        }

        let report = EvaluationReport::from_predictions(&probabilities, &positives, summary.skipped);
        tracing::info!(
            "Evaluated epoch-{} artifact on {} images: acc={:.3} auc={:.3} precision={:.3} recall={:.3}",
            artifact.metadata.epoch,
            report.samples,
            report.accuracy,
            report.auc,
            report.precision,
            report.recall
        );
        Ok(report)
    }

    fn rebuild(&self, artifact: &ModelArtifact) -> Result<XrayCnn<B>> {
        let meta = &artifact.metadata;
        if artifact.weights.is_empty() {
            return Err(PipelineError::NoArtifact(format!(
                "artifact from epoch {} carries no weights",
                meta.epoch
            )));
        }
        let corrupt = |reason: String| PipelineError::ArtifactCorrupt {
            name:   format!("epoch-{}", meta.epoch),
            reason,
        };
        if meta.architecture != ARCHITECTURE {
            return Err(corrupt(format!("unsupported architecture '{}'", meta.architecture)));
        }
        if !artifact.is_intact() {
            return Err(corrupt("weight digest mismatch".into()));
        }
        let config: XrayCnnConfig = serde_json::from_value(meta.model_config.clone())
            .map_err(|e| corrupt(format!("unreadable model config: {e}")))?;
        config.load_bytes::<B>(artifact.weights.clone(), &self.device)
    }
}

/// Load a stored artifact for evaluation.
///
/// A missing artifact means no training run has completed yet
/// and is reported as `NoArtifact`.
pub fn load_artifact<R: ArtifactRepository>(
    repository: &R,
    name:       &str,
    directory:  &Path,
) -> Result<ModelArtifact> {
    repository.load(name, directory).map_err(|e| match e {
        PipelineError::ArtifactNotFound { name, dir } => PipelineError::NoArtifact(format!(
            "'{name}' not found in '{}'; run `train` first",
            dir.display()
        )),
        other => other,
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::augment::AugmentationConfig;
    use crate::data::batcher::{BatchGeneratorFactory, BatchSequences};
    use crate::data::catalog::MetadataCatalog;
    use crate::data::test_support::{write_corrupt, write_dataset};
    use crate::domain::artifact::BEST;
    use crate::infra::artifact_store::ArtifactStore;
    use crate::ml::{TestAutodiffBackend, TestBackend};
    use crate::ml::trainer::{Trainer, TrainerConfig};

    fn sequences(root: &Path) -> BatchSequences {
        let catalog = MetadataCatalog::new().build(root).unwrap();
        BatchGeneratorFactory::new(11)
            .build(&catalog, 4, (8, 8), &AugmentationConfig::none())
            .unwrap()
    }

    fn trained(models: &Path, seqs: &mut BatchSequences) -> ModelArtifact {
        let cfg = TrainerConfig {
            model:         XrayCnnConfig::new().with_base_channels(2).with_hidden(4),
            learning_rate: 1e-2,
            patience:      0,
            seed:          11,
            model_dir:     models.to_path_buf(),
        };
        let mut trainer = Trainer::<TestAutodiffBackend, _>::new(cfg, ArtifactStore::new(), Default::default());
        trainer.train(&mut seqs.train, &mut seqs.val, 2, true).unwrap().0
    }

    #[test]
    fn test_report_values_in_unit_range() {
        let data = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        write_dataset(data.path(), [(4, 4), (2, 2), (3, 5)]);
        write_corrupt(data.path(), Split::Test, Label::Normal, "bad.jpeg");
        let mut seqs = sequences(data.path());
        let artifact = trained(models.path(), &mut seqs);

        let report = Evaluator::<TestBackend>::new(Default::default())
            .evaluate(&artifact, &mut seqs.test)
            .unwrap();
        assert_eq!(report.samples, 8);
        assert_eq!(report.skipped, 1);
        for v in [report.accuracy, report.auc, report.precision, report.recall] {
            assert!((0.0..=1.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn test_stored_best_matches_in_memory() {
        let data = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        write_dataset(data.path(), [(3, 3), (2, 2), (2, 2)]);
        let mut seqs = sequences(data.path());
        let artifact = trained(models.path(), &mut seqs);

        let evaluator = Evaluator::<TestBackend>::new(Default::default());
        let direct = evaluator.evaluate(&artifact, &mut seqs.test).unwrap();
        let stored = evaluator
            .evaluate_stored(&ArtifactStore::new(), BEST, models.path(), &mut seqs.test)
            .unwrap();
        assert_eq!(direct, stored);
    }

    #[test]
    fn test_before_training_is_no_artifact() {
        let data = tempfile::tempdir().unwrap();
        let models = tempfile::tempdir().unwrap();
        write_dataset(data.path(), [(1, 1), (1, 1), (1, 1)]);
        let mut seqs = sequences(data.path());
        let err = Evaluator::<TestBackend>::new(Default::default())
            .evaluate_stored(&ArtifactStore::new(), BEST, models.path(), &mut seqs.test)
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoArtifact(_)));
    }

    #[test]
    fn test_weightless_artifact_rejected() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path(), [(1, 1), (1, 1), (1, 1)]);
        let mut seqs = sequences(data.path());
        let empty = ModelArtifact::new(ARCHITECTURE, serde_json::json!({}), 1, "val_loss", 0.0, (8, 8), Vec::new());
        let err = Evaluator::<TestBackend>::new(Default::default())
            .evaluate(&empty, &mut seqs.test)
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoArtifact(_)));
    }

    #[test]
    fn test_foreign_architecture_is_corrupt() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path(), [(1, 1), (1, 1), (1, 1)]);
        let mut seqs = sequences(data.path());
        let foreign = ModelArtifact::new("resnet50", serde_json::json!({}), 1, "val_loss", 0.0, (8, 8), vec![1]);
        let err = Evaluator::<TestBackend>::new(Default::default())
            .evaluate(&foreign, &mut seqs.test)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactCorrupt { .. }));
    }
}
