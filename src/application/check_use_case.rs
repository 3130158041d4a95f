// ============================================================
// Layer 2 — CheckUseCase
// ============================================================
// Pipeline smoke test, no training:
//
//   Step 1: Build catalog and print the summary
//   Step 2: Build train/val/test sequences
//   Step 3: Pull the first batch of each split and describe it
//           (size, label mix, pixel range)

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;

use crate::data::{
    augment::AugmentationConfig,
    batcher::{Batch, BatchGeneratorFactory},
    catalog::MetadataCatalog,
};
use crate::domain::record::{Label, Split};

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub data_dir:   PathBuf,
    pub batch_size: usize,
    pub image_size: u32,
    pub seed:       u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            data_dir:   PathBuf::from("data/raw/chest_xray"),
            batch_size: 4,
            image_size: 128,
            seed:       42,
        }
    }
}

/// Description of the first batch of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstBatch {
    pub size:         usize,
    pub label_counts: [usize; Label::COUNT],
    pub min_pixel:    f32,
    pub max_pixel:    f32,
}

impl FirstBatch {
    fn describe(batch: &Batch) -> Self {
        let mut label_counts = [0; Label::COUNT];
        let (mut min_pixel, mut max_pixel) = (f32::INFINITY, f32::NEG_INFINITY);
        for sample in &batch.samples {
            label_counts[sample.label.index()] += 1;
            for &p in &sample.pixels {
                min_pixel = min_pixel.min(p);
                max_pixel = max_pixel.max(p);
            }
        }
        Self { size: batch.len(), label_counts, min_pixel, max_pixel }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitCheck {
    pub split:       Split,
    pub records:     usize,
    pub batches:     usize,
    pub first_batch: Option<FirstBatch>,
}

#[derive(Debug, Clone)]
pub struct CheckReport {
    pub summary: String,
    pub splits:  Vec<SplitCheck>,
}

impl CheckReport {
    /// Every split produced at least one batch.
    pub fn passed(&self) -> bool {
        self.splits.iter().all(|s| s.first_batch.is_some())
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)?;
        for s in &self.splits {
            match &s.first_batch {
                Some(b) => writeln!(
                    f,
                    "  {:<5} {} batches | first batch: {} images ({}={} {}={}) pixels [{:.3}, {:.3}]",
                    s.split, s.batches, b.size,
                    Label::Normal.dir_name(), b.label_counts[Label::Normal.index()],
                    Label::Pneumonia.dir_name(), b.label_counts[Label::Pneumonia.index()],
                    b.min_pixel, b.max_pixel,
                )?,
                None => writeln!(f, "  {:<5} produced no batch ({} records)", s.split, s.records)?,
            }
        }
        Ok(())
    }
}

pub struct CheckUseCase {
    config: CheckConfig,
}

impl CheckUseCase {
    pub fn new(config: CheckConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<CheckReport> {
        let cfg = &self.config;

        let builder = MetadataCatalog::new();
        let catalog = builder.build(&cfg.data_dir)?;
        let summary = builder.summarize(&catalog);

        let mut sequences = BatchGeneratorFactory::new(cfg.seed).build(
            &catalog,
            cfg.batch_size,
            (cfg.image_size, cfg.image_size),
            &AugmentationConfig::default(),
        )?;

        let mut splits = Vec::with_capacity(Split::ALL.len());
        for split in Split::ALL {
            let seq = sequences.get_mut(split);
            // dropping the iterator after one batch stops the producer
            let first_batch = seq.iter()?.next().map(|b| FirstBatch::describe(&b));
            if first_batch.is_none() {
                tracing::warn!("{} split produced no batch", split);
            }
            splits.push(SplitCheck {
                split,
                records: seq.record_count(),
                batches: seq.len(),
                first_batch,
            });
        }
        Ok(CheckReport { summary, splits })
    }
}
