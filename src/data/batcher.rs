// ============================================================
// Layer 4 — Batch Generator
// ============================================================
// Turns a DatasetCatalog into three restartable BatchSequences
// (train / val / test).
//
// One call to BatchSequence::iter() is one epoch:
//
//   producer thread                       consumer (trainer)
//   ───────────────                       ──────────────────
//   decode → resize → augment ──▶ sync_channel(prefetch) ──▶ next()
//
// The channel is bounded, so the producer blocks once `prefetch`
// batches are waiting and the consumer blocks only when none is
// ready. Dropping the iterator hangs up the channel; the producer
// notices on its next send and exits.
//
// Ordering:
//   train — reshuffled every epoch with ChaCha8(seed + epoch)
//   val   — catalogue order, identical on every traversal
//   test  — catalogue order, identical on every traversal
//
// Undecodable images (skip-and-shrink last batch):
//   the record is skipped with a warning and the next record of
//   the same epoch fills its slot, so every batch except the last
//   is full. Only the final batch shrinks; if the skips exceed it,
//   the epoch yields fewer than len() batches. EpochSummary
//   reports how many records were skipped.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::data::augment::AugmentationConfig;
use crate::data::image_loader::ImageLoader;
use crate::domain::cancel::CancelToken;
use crate::domain::catalog::DatasetCatalog;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{ImageRecord, Label, Split};

/// Batches buffered ahead of the consumer.
pub const DEFAULT_PREFETCH: usize = 2;

// ─── Batch ────────────────────────────────────────────────────────────────────

/// One decoded image and its label.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Row-major grayscale pixels in [0, 1], width * height long.
    pub pixels: Vec<f32>,
    pub label:  Label,
}

/// An ordered group of samples from one split.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub split:   Split,
    /// Position inside the epoch, starting at 0.
    pub index:   usize,
    pub width:   u32,
    pub height:  u32,
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What happened during one traversal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochSummary {
    pub epoch:         usize,
    pub batches:       usize,
    pub samples:       usize,
    pub skipped:       usize,
    pub skipped_paths: Vec<PathBuf>,
}

enum Message {
    Batch(Batch),
    Done(EpochSummary),
    Cancelled,
}

// ─── BatchSequence ────────────────────────────────────────────────────────────

/// Restartable, finite producer of batches for one split.
#[derive(Debug, Clone)]
pub struct BatchSequence {
    split:          Split,
    records:        Arc<Vec<ImageRecord>>,
    batch_size:     usize,
    loader:         ImageLoader,
    augmentation:   Option<AugmentationConfig>,
    shuffle_seed:   Option<u64>,
    prefetch:       usize,
    epochs_started: usize,
    cancel:         CancelToken,
}

impl BatchSequence {
    pub fn split(&self) -> Split {
        self.split
    }

    /// Batches per epoch: ceil(record_count / batch_size).
    pub fn len(&self) -> usize {
        self.records.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.loader.width(), self.loader.height())
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle_seed.is_some()
    }

    pub fn is_augmented(&self) -> bool {
        self.augmentation.is_some()
    }

    /// Number of traversals started so far.
    pub fn epochs_started(&self) -> usize {
        self.epochs_started
    }

    /// Per-class record counts, indexed by `Label::index()`.
    pub fn label_counts(&self) -> [usize; Label::COUNT] {
        let mut counts = [0; Label::COUNT];
        for record in self.records.iter() {
            counts[record.label().index()] += 1;
        }
        counts
    }

    /// Record indices in the order epoch `epoch` will visit them.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Replace the cancellation token observed by future epochs.
    pub fn set_cancel_token(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    /// Start the next epoch on a background producer.
    pub fn iter(&mut self) -> Result<EpochIter> {
        let epoch = self.epochs_started;
        self.epochs_started += 1;

        let job = EpochJob {
            epoch,
            split:        self.split,
            order:        self.epoch_order(epoch),
            records:      Arc::clone(&self.records),
            batch_size:   self.batch_size,
            loader:       self.loader,
            augmentation: self.augmentation,
            rng_seed:     self.shuffle_seed.map(|s| s.wrapping_add(epoch as u64)),
            cancel:       self.cancel.clone(),
        };

        let (tx, rx) = mpsc::sync_channel(self.prefetch);
        let handle = thread::Builder::new()
            .name(format!("batches-{}", self.split))
            .spawn(move || job.run(tx))
            .map_err(|e| {
                PipelineError::fatal(Stage::Batching, self.split.dir_name(), format!("cannot spawn producer: {e}"))
            })?;

        tracing::debug!("{} epoch {}: {} batches scheduled", self.split, epoch, self.len());
        Ok(EpochIter {
            split:   self.split,
            rx:      Some(rx),
            handle:  Some(handle),
            summary: None,
            cancelled: false,
        })
    }
}

// ─── Producer ─────────────────────────────────────────────────────────────────

struct EpochJob {
    epoch:        usize,
    split:        Split,
    order:        Vec<usize>,
    records:      Arc<Vec<ImageRecord>>,
    batch_size:   usize,
    loader:       ImageLoader,
    augmentation: Option<AugmentationConfig>,
    rng_seed:     Option<u64>,
    cancel:       CancelToken,
}

impl EpochJob {
    fn run(self, tx: SyncSender<Message>) {
        let width  = self.loader.width();
        let height = self.loader.height();
        // separate stream from the one used for shuffling
        let mut rng = self.rng_seed.map(|seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(1);
            rng
        });

        let mut summary = EpochSummary { epoch: self.epoch, ..EpochSummary::default() };
        let mut pending: Vec<Sample> = Vec::with_capacity(self.batch_size);

        for &i in &self.order {
            if self.cancel.is_cancelled() {
                let _ = tx.send(Message::Cancelled);
                return;
            }

            let record = &self.records[i];
            match self.loader.load(record.path()) {
                Ok(mut pixels) => {
                    if let (Some(aug), Some(rng)) = (self.augmentation.as_ref(), rng.as_mut()) {
                        aug.apply(&mut pixels, width as usize, height as usize, rng);
                    }
                    pending.push(Sample { pixels, label: record.label() });
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable image '{}': {}", record.path().display(), e);
                    summary.skipped += 1;
                    summary.skipped_paths.push(record.path().to_path_buf());
                }
            }

            if pending.len() == self.batch_size {
                let samples = std::mem::replace(&mut pending, Vec::with_capacity(self.batch_size));
                if !self.send(&tx, &mut summary, samples, width, height) {
                    return;
                }
            }
        }

        if !pending.is_empty() && !self.send(&tx, &mut summary, pending, width, height) {
            return;
        }
        if summary.skipped > 0 {
            tracing::warn!(
                "{} epoch {}: skipped {} unreadable images",
                self.split, self.epoch, summary.skipped
            );
        }
        let _ = tx.send(Message::Done(summary));
    }

    /// Returns false once the consumer has hung up.
    fn send(
        &self,
        tx:      &SyncSender<Message>,
        summary: &mut EpochSummary,
        samples: Vec<Sample>,
        width:   u32,
        height:  u32,
    ) -> bool {
        let batch = Batch {
            split: self.split,
            index: summary.batches,
            width,
            height,
            samples,
        };
        summary.batches += 1;
        summary.samples += batch.len();
        tx.send(Message::Batch(batch)).is_ok()
    }
}

// ─── EpochIter ────────────────────────────────────────────────────────────────

/// Consumer side of one epoch.
pub struct EpochIter {
    split:     Split,
    rx:        Option<Receiver<Message>>,
    handle:    Option<JoinHandle<()>>,
    summary:   Option<EpochSummary>,
    cancelled: bool,
}

impl EpochIter {
    /// Available once the iterator has returned `None` normally.
    pub fn summary(&self) -> Option<&EpochSummary> {
        self.summary.as_ref()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Drain what is left and report how the epoch ended.
    pub fn finish(mut self) -> Result<EpochSummary> {
        while self.next().is_some() {}
        if self.cancelled {
            return Err(PipelineError::Cancelled(Stage::Batching));
        }
        self.summary.take().ok_or_else(|| {
            PipelineError::fatal(
                Stage::Batching,
                self.split.dir_name(),
                "batch producer stopped before the epoch completed",
            )
        })
    }
}

impl Iterator for EpochIter {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(Message::Batch(batch)) => Some(batch),
            Ok(Message::Done(summary)) => {
                self.summary = Some(summary);
                self.rx = None;
                None
            }
            Ok(Message::Cancelled) => {
                self.cancelled = true;
                self.rx = None;
                None
            }
            Err(_) => {
                self.rx = None;
                None
            }
        }
    }
}

impl Drop for EpochIter {
    fn drop(&mut self) {
        // hang up first so a blocked producer wakes with a send error
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} batch producer panicked", self.split);
            }
        }
    }
}

// ─── BatchGeneratorFactory ────────────────────────────────────────────────────

/// The three sequences built from one catalog.
#[derive(Debug, Clone)]
pub struct BatchSequences {
    pub train: BatchSequence,
    pub val:   BatchSequence,
    pub test:  BatchSequence,
}

impl BatchSequences {
    pub fn get(&self, split: Split) -> &BatchSequence {
        match split {
            Split::Train => &self.train,
            Split::Val   => &self.val,
            Split::Test  => &self.test,
        }
    }

    pub fn get_mut(&mut self, split: Split) -> &mut BatchSequence {
        match split {
            Split::Train => &mut self.train,
            Split::Val   => &mut self.val,
            Split::Test  => &mut self.test,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchGeneratorFactory {
    seed:     u64,
    prefetch: usize,
    cancel:   CancelToken,
}

impl BatchGeneratorFactory {
    pub fn new(seed: u64) -> Self {
        Self { seed, prefetch: DEFAULT_PREFETCH, cancel: CancelToken::new() }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build train/val/test sequences over `catalog`.
    ///
    /// `target_size` is (width, height). Augmentation only ever
    /// applies to the train sequence.
    pub fn build(
        &self,
        catalog:      &DatasetCatalog,
        batch_size:   usize,
        target_size:  (u32, u32),
        augmentation: &AugmentationConfig,
    ) -> Result<BatchSequences> {
        if batch_size == 0 {
            return Err(PipelineError::Config("batch size must be at least 1".into()));
        }
        if target_size.0 == 0 || target_size.1 == 0 {
            return Err(PipelineError::Config(format!(
                "target size must be non-zero, got {}x{}",
                target_size.0, target_size.1
            )));
        }
        if self.prefetch == 0 {
            return Err(PipelineError::Config("prefetch depth must be at least 1".into()));
        }
        augmentation.validate()?;

        let loader = ImageLoader::new(target_size);
        let make = |split: Split, train: bool| BatchSequence {
            split,
            records:        Arc::new(catalog.records_for(split).cloned().collect()),
            batch_size,
            loader,
            augmentation:   (train && !augmentation.is_identity()).then_some(*augmentation),
            shuffle_seed:   train.then_some(self.seed),
            prefetch:       self.prefetch,
            epochs_started: 0,
            cancel:         self.cancel.clone(),
        };

        let sequences = BatchSequences {
            train: make(Split::Train, true),
            val:   make(Split::Val, false),
            test:  make(Split::Test, false),
        };

        for split in Split::ALL {
            let seq = sequences.get(split);
            tracing::info!(
                "{} sequence: {} records, {} batches of ≤{}",
                split, seq.record_count(), seq.len(), batch_size
            );
        }
        Ok(sequences)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::catalog::MetadataCatalog;
    use crate::data::test_support::{write_corrupt, write_dataset};

    fn sequences(root: &std::path::Path, batch_size: usize) -> BatchSequences {
        let catalog = MetadataCatalog::new().build(root).unwrap();
        BatchGeneratorFactory::new(42)
            .build(&catalog, batch_size, (8, 8), &AugmentationConfig::none())
            .unwrap()
    }

    fn pixel_fingerprint(batches: &[Batch]) -> Vec<(Label, u32)> {
        batches
            .iter()
            .flat_map(|b| b.samples.iter())
            .map(|s| (s.label, (s.pixels.iter().sum::<f32>() * 1000.0) as u32))
            .collect()
    }

    #[test]
    fn test_length_is_ceil_of_count() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(4, 6), (1, 2), (2, 3)]);
        let seqs = sequences(tmp.path(), 4);
        assert_eq!(seqs.train.len(), 3); // 10 / 4
        assert_eq!(seqs.val.len(), 1);   // 3 / 4
        assert_eq!(seqs.test.len(), 2);  // 5 / 4
    }

    #[test]
    fn test_final_batch_holds_remainder() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(4, 6), (1, 1), (1, 1)]);
        let mut seqs = sequences(tmp.path(), 4);
        let sizes: Vec<usize> = seqs.train.iter().unwrap().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_val_order_stable_across_traversals() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(1, 1), (5, 6), (1, 1)]);
        let mut seqs = sequences(tmp.path(), 3);
        let first: Vec<Batch>  = seqs.val.iter().unwrap().collect();
        let second: Vec<Batch> = seqs.val.iter().unwrap().collect();
        assert_eq!(first, second);
        assert_eq!(seqs.val.epochs_started(), 2);
    }

    #[test]
    fn test_train_order_changes_between_epochs() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(20, 30), (1, 1), (1, 1)]);
        let mut seqs = sequences(tmp.path(), 8);
        assert_ne!(seqs.train.epoch_order(0), seqs.train.epoch_order(1));

        let e0: Vec<Batch> = seqs.train.iter().unwrap().collect();
        let e1: Vec<Batch> = seqs.train.iter().unwrap().collect();
        let (mut a, mut b) = (pixel_fingerprint(&e0), pixel_fingerprint(&e1));
        assert_ne!(a, b);
        // same multiset of samples, different order
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_corrupt_image_skipped_and_backfilled() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(1, 1), (3, 3), (1, 1)]);
        write_corrupt(tmp.path(), Split::Val, Label::Normal, "zz_broken.jpeg");
        let mut seqs = sequences(tmp.path(), 4);
        assert_eq!(seqs.val.record_count(), 7);
        assert_eq!(seqs.val.len(), 2);

        let mut iter = seqs.val.iter().unwrap();
        let sizes: Vec<usize> = iter.by_ref().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 2]);
        let summary = iter.finish().unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.samples, 6);
        assert!(summary.skipped_paths[0].ends_with("zz_broken.jpeg"));
    }

    #[test]
    fn test_empty_split_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(2, 2), (0, 0), (1, 1)]);
        let mut seqs = sequences(tmp.path(), 4);
        assert!(seqs.val.is_empty());
        assert_eq!(seqs.val.len(), 0);
        let mut iter = seqs.val.iter().unwrap();
        assert!(iter.next().is_none());
        assert_eq!(iter.finish().unwrap().batches, 0);
    }

    #[test]
    fn test_zero_batch_size_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(1, 1), (1, 1), (1, 1)]);
        let catalog = MetadataCatalog::new().build(tmp.path()).unwrap();
        let err = BatchGeneratorFactory::new(1)
            .build(&catalog, 0, (8, 8), &AugmentationConfig::none())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_only_train_is_shuffled_and_augmented() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(1, 1), (1, 1), (1, 1)]);
        let catalog = MetadataCatalog::new().build(tmp.path()).unwrap();
        let seqs = BatchGeneratorFactory::new(1)
            .build(&catalog, 2, (8, 8), &AugmentationConfig::default())
            .unwrap();
        assert!(seqs.train.is_shuffled() && seqs.train.is_augmented());
        assert!(!seqs.val.is_shuffled() && !seqs.val.is_augmented());
        assert!(!seqs.test.is_shuffled() && !seqs.test.is_augmented());
    }

    #[test]
    fn test_cancelled_epoch_reports_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(3, 3), (1, 1), (1, 1)]);
        let mut seqs = sequences(tmp.path(), 2);
        let token = CancelToken::new();
        token.cancel();
        seqs.train.set_cancel_token(token);
        let iter = seqs.train.iter().unwrap();
        assert!(matches!(iter.finish(), Err(PipelineError::Cancelled(Stage::Batching))));
    }

    #[test]
    fn test_dropping_iterator_mid_epoch_does_not_hang() {
        let tmp = tempfile::tempdir().unwrap();
        write_dataset(tmp.path(), [(10, 10), (1, 1), (1, 1)]);
        let catalog = MetadataCatalog::new().build(tmp.path()).unwrap();
        let mut seqs = BatchGeneratorFactory::new(3)
            .with_prefetch(1)
            .build(&catalog, 2, (8, 8), &AugmentationConfig::none())
            .unwrap();
        let mut iter = seqs.train.iter().unwrap();
        assert!(iter.next().is_some());
        drop(iter);
        // the sequence is still usable afterwards
        assert_eq!(seqs.train.iter().unwrap().count(), 10);
    }

    #[test]
    fn test_producer_stops_at_prefetch_bound() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = write_dataset(tmp.path(), [(1, 1), (3, 3), (1, 1)]);
        let catalog = MetadataCatalog::new().build(tmp.path()).unwrap();
        let mut seqs = BatchGeneratorFactory::new(5)
            .with_prefetch(1)
            .build(&catalog, 1, (8, 8), &AugmentationConfig::none())
            .unwrap();

        let mut iter = seqs.val.iter().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));

        // anything the producer has not decoded yet now fails to decode
        for path in paths.iter().filter(|p| p.components().any(|c| c.as_os_str() == "val")) {
            std::fs::write(path, b"not an image").unwrap();
        }
        let yielded: usize = iter.by_ref().map(|b| b.len()).sum();
        let summary = iter.finish().unwrap();

        // one batch buffered in the channel plus one blocked in send
        assert!(yielded <= 2, "producer ran ahead: {yielded} batches decoded");
        assert_eq!(summary.samples, yielded);
        assert_eq!(summary.skipped, 6 - yielded);
    }
}
