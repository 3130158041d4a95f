// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Drives epochs over the train BatchSequence with Adam and
// scores every epoch on the val BatchSequence.
//
//   Idle ──train()──▶ Training(epoch) ──▶ Stopped(reason)
//
//   reason: Completed | EarlyStopped | Cancelled | Failed
//
// Per epoch:
//   1. train pass    — class-weighted cross entropy, backward, Adam step
//   2. val pass      — model.valid() (inner backend, no autodiff,
//                      dropout off), unweighted cross entropy
//   3. "best"        — saved when val_loss is strictly lower than
//                      every earlier epoch
//   4. "final"       — saved every epoch
//   5. history JSON + metrics.csv row
//   6. early stop after `patience` epochs without improvement
//
// A checkpoint write failure stops the run as Fatal. Cancellation
// is polled between batches and between epochs; nothing is
// written for an epoch that did not finish.
//
// Reference: Kingma & Ba (2015) Adam

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::{Path, PathBuf};

use crate::data::batcher::{BatchSequence, EpochSummary};
use crate::domain::artifact::{ModelArtifact, BEST, FINAL};
use crate::domain::cancel::CancelToken;
use crate::domain::catalog::inverse_frequency_weights;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{Label, Split};
use crate::domain::report::{EpochRecord, StopReason, TrainingHistory};
use crate::domain::traits::ArtifactRepository;
use crate::infra::artifact_store::ArtifactStore;
use crate::infra::metrics::{EpochMetrics, MetricsLogger, METRICS_FILE};
use crate::ml::model::{XrayCnn, XrayCnnConfig, ARCHITECTURE};
use crate::ml::tensors::XrayBatcher;

/// Name of the metric checkpoints are ranked by.
pub const MONITORED_METRIC: &str = "val_loss";

#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub model:         XrayCnnConfig,
    pub learning_rate: f64,
    /// Epochs without val_loss improvement before stopping; 0 disables.
    pub patience:      usize,
    pub seed:          u64,
    /// Where checkpoints, history and metrics.csv are written.
    pub model_dir:     PathBuf,
}

/// Bookkeeping the trainer updates at epoch boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingState {
    pub epoch:                      usize,
    pub best_val_loss:              Option<f64>,
    pub epochs_without_improvement: usize,
}

impl TrainingState {
    /// Strictly lower than every earlier epoch; the first epoch always counts.
    pub fn is_improvement(&self, val_loss: f64) -> bool {
        match self.best_val_loss {
            None       => true,
            Some(best) => val_loss < best,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainerPhase {
    Idle,
    Training { epoch: usize },
    Stopped(StopReason),
}

/// Running sums for one pass over a sequence.
#[derive(Debug, Default)]
struct PassStats {
    loss_sum: f64,
    correct:  usize,
    samples:  usize,
    skipped:  usize,
}

impl PassStats {
    fn mean_loss(&self) -> f64 {
        if self.samples == 0 { f64::NAN } else { self.loss_sum / self.samples as f64 }
    }

    fn accuracy(&self) -> f64 {
        if self.samples == 0 { 0.0 } else { self.correct as f64 / self.samples as f64 }
    }
}

pub struct Trainer<B: AutodiffBackend, R: ArtifactRepository = ArtifactStore> {
    config:     TrainerConfig,
    repository: R,
    device:     B::Device,
    cancel:     CancelToken,
    weights:    Option<[f32; Label::COUNT]>,
    phase:      TrainerPhase,
    state:      TrainingState,
}

impl<B: AutodiffBackend, R: ArtifactRepository> Trainer<B, R> {
    pub fn new(config: TrainerConfig, repository: R, device: B::Device) -> Self {
        Self {
            config,
            repository,
            device,
            cancel:  CancelToken::new(),
            weights: None,
            phase:   TrainerPhase::Idle,
            state:  TrainingState::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Loss weights used when `train` is asked for class weighting.
    /// Without them the weights come from the train sequence's label counts.
    pub fn with_class_weights(mut self, weights: [f32; Label::COUNT]) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Train for up to `epochs` epochs and return the "best"
    /// artifact together with the full history.
    pub fn train(
        &mut self,
        train_seq:         &mut BatchSequence,
        val_seq:           &mut BatchSequence,
        epochs:            usize,
        use_class_weights: bool,
    ) -> Result<(ModelArtifact, TrainingHistory)> {
        let mut history = TrainingHistory::new();
        self.state = TrainingState::default();

        match self.run(train_seq, val_seq, epochs, use_class_weights, &mut history) {
            Ok(best) => Ok((best, history)),
            Err(e) => {
                let reason = match e {
                    PipelineError::Cancelled(_) => StopReason::Cancelled,
                    _ => StopReason::Failed,
                };
                tracing::error!("Training stopped ({:?}): {}", reason, e);
                self.phase = TrainerPhase::Stopped(reason);
                history.finish(reason);
                if !history.is_empty() {
                    if let Err(save_err) = self.repository.save_history(&history, &self.config.model_dir) {
                        tracing::warn!("Could not persist history after failure: {}", save_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        train_seq:         &mut BatchSequence,
        val_seq:           &mut BatchSequence,
        epochs:            usize,
        use_class_weights: bool,
        history:           &mut TrainingHistory,
    ) -> Result<ModelArtifact> {
        self.check_preconditions(train_seq, val_seq, epochs)?;
        let dir = self.config.model_dir.clone();
        let target_size = train_seq.target_size();

        let class_weights = use_class_weights.then(|| {
            self.weights.unwrap_or_else(|| inverse_frequency_weights(&train_seq.label_counts()))
        });
        if let Some(w) = class_weights {
            tracing::info!(
                "Class weights: {}={:.3} {}={:.3}",
                Label::Normal.dir_name(), w[Label::Normal.index()],
                Label::Pneumonia.dir_name(), w[Label::Pneumonia.index()],
            );
        }

        let metrics = MetricsLogger::new(&dir).map_err(|e| {
            PipelineError::fatal(Stage::Training, dir.join(METRICS_FILE), format!("{e:#}"))
        })?;

        // ── Build model ───────────────────────────────────────────────────────
        B::seed(self.config.seed);
        let mut model: XrayCnn<B> = self.config.model.init(&self.device);
        let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
        tracing::info!(
            "Model ready: {} conv blocks, {} output channels, lr={}",
            self.config.model.num_blocks,
            self.config.model.output_channels(),
            self.config.learning_rate
        );

        let train_batcher = XrayBatcher::<B>::new(self.device.clone(), target_size);
        let val_batcher   = XrayBatcher::<B::InnerBackend>::new(self.device.clone(), target_size);

        let mut best: Option<ModelArtifact> = None;
        let mut reason = StopReason::Completed;

        // ── Epoch loop ────────────────────────────────────────────────────────
        for epoch in 1..=epochs {
            self.cancel.check(Stage::Training)?;
            self.phase = TrainerPhase::Training { epoch };

            let (trained, train_stats) =
                self.train_pass(model, &mut optim, train_seq, &train_batcher, class_weights)?;
            model = trained;

            let model_valid = model.valid();
            let val_stats = self.val_pass(&model_valid, val_seq, &val_batcher)?;

            let record = EpochRecord {
                epoch,
                loss:         train_stats.mean_loss(),
                val_loss:     val_stats.mean_loss(),
                accuracy:     train_stats.accuracy(),
                val_accuracy: val_stats.accuracy(),
            };
            if !record.is_finite() {
                return Err(PipelineError::fatal(
                    Stage::Training,
                    &dir,
                    format!("epoch {epoch} diverged: loss={} val_loss={}", record.loss, record.val_loss),
                ));
            }
            history.push(record);

            tracing::info!(
                "Epoch {:>3}/{} | loss={:.4} | val_loss={:.4} | acc={:.1}% | val_acc={:.1}%",
                epoch, epochs, record.loss, record.val_loss,
                record.accuracy * 100.0, record.val_accuracy * 100.0,
            );

            // ── Checkpoints ───────────────────────────────────────────────────
            let artifact = self.snapshot(&model_valid, epoch, record.val_loss, target_size)?;
            if self.state.is_improvement(record.val_loss) {
                self.state.best_val_loss = Some(record.val_loss);
                self.state.epochs_without_improvement = 0;
                self.persist(&artifact, BEST, &dir)?;
                history.mark_best(epoch);
                tracing::info!("New best val_loss {:.4} at epoch {}", record.val_loss, epoch);
                best = Some(artifact.clone());
            } else {
                self.state.epochs_without_improvement += 1;
            }
            self.persist(&artifact, FINAL, &dir)?;
            self.state.epoch = epoch;

            self.repository
                .save_history(history, &dir)
                .map_err(|e| e.into_fatal(Stage::Training, &dir))?;
            metrics
                .log(&EpochMetrics::from_record(&record, train_stats.skipped + val_stats.skipped))
                .map_err(|e| PipelineError::fatal(Stage::Training, metrics.csv_path(), format!("{e:#}")))?;

            if self.config.patience > 0 && self.state.epochs_without_improvement >= self.config.patience {
                tracing::info!(
                    "Early stopping at epoch {}: no improvement for {} epochs",
                    epoch, self.state.epochs_without_improvement
                );
                reason = StopReason::EarlyStopped { epoch };
                break;
            }
        }

        history.finish(reason);
        self.repository
            .save_history(history, &dir)
            .map_err(|e| e.into_fatal(Stage::Training, &dir))?;
        self.phase = TrainerPhase::Stopped(reason);
        tracing::info!("Training finished: {:?}", reason);

        best.ok_or_else(|| PipelineError::fatal(Stage::Training, &dir, "no epoch produced a checkpoint"))
    }

    fn check_preconditions(
        &self,
        train_seq: &BatchSequence,
        val_seq:   &BatchSequence,
        epochs:    usize,
    ) -> Result<()> {
        if epochs == 0 {
            return Err(PipelineError::Config("epochs must be at least 1".into()));
        }
        self.config.model.validate()?;
        if !(self.config.learning_rate >= 0.0 && self.config.learning_rate.is_finite()) {
            return Err(PipelineError::Config(format!(
                "learning rate must be a finite non-negative number, got {}",
                self.config.learning_rate
            )));
        }
        for seq in [train_seq, val_seq] {
            if seq.is_empty() {
                return Err(PipelineError::fatal(
                    Stage::Training,
                    seq.split().dir_name(),
                    format!("{} split is empty", seq.split()),
                ));
            }
        }
        if train_seq.target_size() != val_seq.target_size() {
            return Err(PipelineError::Config("train and val sequences use different image sizes".into()));
        }
        let (w, h) = train_seq.target_size();
        let min = self.config.model.min_image_side();
        if w < min || h < min {
            return Err(PipelineError::Config(format!(
                "images of {w}x{h} are too small for {} conv blocks (need at least {min}x{min})",
                self.config.model.num_blocks
            )));
        }
        Ok(())
    }

    fn train_pass<O: Optimizer<XrayCnn<B>, B>>(
        &self,
        mut model:     XrayCnn<B>,
        optim:         &mut O,
        seq:           &mut BatchSequence,
        batcher:       &XrayBatcher<B>,
        class_weights: Option<[f32; Label::COUNT]>,
    ) -> Result<(XrayCnn<B>, PassStats)> {
        let mut stats = PassStats::default();
        let mut iter = seq.iter().map_err(|e| e.into_fatal(Stage::Training, Split::Train.dir_name()))?;

        for batch in iter.by_ref() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(Stage::Training));
            }
            let n = batch.len();
            let tensors = batcher.batch(batch.samples);
            let (loss, logits) = model.forward_loss(tensors.images, tensors.targets.clone(), class_weights);

            stats.loss_sum += loss.clone().into_scalar().elem::<f64>() * n as f64;
            stats.correct  += count_correct(logits, tensors.targets);
            stats.samples  += n;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(self.config.learning_rate, model, grads);
        }

        stats.skipped = finish_pass(iter.finish(), Split::Train)?.skipped;
        if stats.samples == 0 {
            return Err(PipelineError::fatal(
                Stage::Training,
                Split::Train.dir_name(),
                "no decodable images in the train split",
            ));
        }
        Ok((model, stats))
    }

    fn val_pass(
        &self,
        model:   &XrayCnn<B::InnerBackend>,
        seq:     &mut BatchSequence,
        batcher: &XrayBatcher<B::InnerBackend>,
    ) -> Result<PassStats> {
        let mut stats = PassStats::default();
        let mut iter = seq.iter().map_err(|e| e.into_fatal(Stage::Training, Split::Val.dir_name()))?;

        for batch in iter.by_ref() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(Stage::Training));
            }
            let n = batch.len();
            let tensors = batcher.batch(batch.samples);
            let (loss, logits) = model.forward_loss(tensors.images, tensors.targets.clone(), None);

            stats.loss_sum += loss.into_scalar().elem::<f64>() * n as f64;
            stats.correct  += count_correct(logits, tensors.targets);
            stats.samples  += n;
        }

        stats.skipped = finish_pass(iter.finish(), Split::Val)?.skipped;
        if stats.samples == 0 {
            return Err(PipelineError::fatal(
                Stage::Training,
                Split::Val.dir_name(),
                "no decodable images in the val split",
            ));
        }
        Ok(stats)
    }

    fn snapshot(
        &self,
        model:       &XrayCnn<B::InnerBackend>,
        epoch:       usize,
        val_loss:    f64,
        target_size: (u32, u32),
    ) -> Result<ModelArtifact> {
        let weights = model.to_bytes()?;
        let model_config = serde_json::to_value(&self.config.model)
            .map_err(|e| PipelineError::fatal(Stage::Training, &self.config.model_dir, e))?;
        Ok(ModelArtifact::new(
            ARCHITECTURE,
            model_config,
            epoch,
            MONITORED_METRIC,
            val_loss,
            target_size,
            weights,
        ))
    }

    fn persist(&self, artifact: &ModelArtifact, name: &str, dir: &Path) -> Result<()> {
        self.repository
            .save(artifact, name, dir)
            .map(|path| tracing::debug!("Checkpoint '{}' → '{}'", name, path.display()))
            .map_err(|e| e.into_fatal(Stage::Training, ArtifactStore::artifact_path(name, dir)))
    }
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    // argmax(1) is [batch, 1]; flatten to [batch] before comparing
    let predicted = logits.argmax(1).flatten::<1>(0, 1);
    predicted.equal(targets).int().sum().into_scalar().elem::<i64>() as usize
}

fn finish_pass(result: Result<EpochSummary>, split: Split) -> Result<EpochSummary> {
    result.map_err(|e| match e {
        PipelineError::Cancelled(_) => PipelineError::Cancelled(Stage::Training),
        other => other.into_fatal(Stage::Training, split.dir_name()),
    })
}
