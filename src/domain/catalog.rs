// ============================================================
// Layer 3 — DatasetCatalog
// ============================================================
// Structured inventory of the dataset: the full ordered list of
// ImageRecords plus split → label → count.
//
// Counts are always derived from the records inside the
// constructor. There is no setter, so the two views can never
// disagree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::record::{ImageRecord, Label, Split};

/// Inventory of one dataset root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetCatalog {
    root:          PathBuf,
    records:       Vec<ImageRecord>,
    counts:        BTreeMap<Split, BTreeMap<Label, usize>>,
    skipped_files: usize,
    missing_dirs:  Vec<PathBuf>,
}

impl DatasetCatalog {
    /// Build a catalog from records in any order.
    ///
    /// Records are sorted by path and the count table is recomputed.
    pub fn from_records(root: impl Into<PathBuf>, mut records: Vec<ImageRecord>) -> Self {
        records.sort_by(|a, b| a.path().cmp(b.path()));

        let mut counts: BTreeMap<Split, BTreeMap<Label, usize>> = BTreeMap::new();
        for record in &records {
            *counts
                .entry(record.split())
                .or_default()
                .entry(record.label())
                .or_insert(0) += 1;
        }

        Self {
            root: root.into(),
            records,
            counts,
            skipped_files: 0,
            missing_dirs: Vec::new(),
        }
    }

    /// Attach scan diagnostics gathered while walking the directory tree.
    pub fn with_diagnostics(mut self, skipped_files: usize, mut missing_dirs: Vec<PathBuf>) -> Self {
        missing_dirs.sort();
        self.skipped_files = skipped_files;
        self.missing_dirs  = missing_dirs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All records, sorted by path.
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    /// Records of one split, in catalogue order.
    pub fn records_for(&self, split: Split) -> impl Iterator<Item = &ImageRecord> + '_ {
        self.records.iter().filter(move |r| r.split() == split)
    }

    pub fn count(&self, split: Split, label: Label) -> usize {
        self.counts
            .get(&split)
            .and_then(|by_label| by_label.get(&label))
            .copied()
            .unwrap_or(0)
    }

    /// Per-class counts of a split, indexed by `Label::index()`.
    pub fn label_counts(&self, split: Split) -> [usize; Label::COUNT] {
        let mut out = [0; Label::COUNT];
        for label in Label::ALL {
            out[label.index()] = self.count(split, label);
        }
        out
    }

    pub fn split_total(&self, split: Split) -> usize {
        self.counts
            .get(&split)
            .map(|by_label| by_label.values().sum())
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Non-image files found inside class directories.
    pub fn skipped_files(&self) -> usize {
        self.skipped_files
    }

    /// Expected `split/class` directories that were absent.
    pub fn missing_dirs(&self) -> &[PathBuf] {
        &self.missing_dirs
    }

    /// max(class counts) / min(class counts) for one split.
    ///
    /// `None` for an empty split, `f64::INFINITY` when a class is absent.
    pub fn imbalance_ratio(&self, split: Split) -> Option<f64> {
        imbalance_ratio(&self.label_counts(split))
    }

    /// Inverse-frequency loss weights for one split.
    pub fn class_weights(&self, split: Split) -> [f32; Label::COUNT] {
        inverse_frequency_weights(&self.label_counts(split))
    }
}

pub fn imbalance_ratio(counts: &[usize]) -> Option<f64> {
    let max = counts.iter().copied().max()?;
    if max == 0 {
        return None;
    }
    let min = counts.iter().copied().min().unwrap_or(0);
    if min == 0 {
        return Some(f64::INFINITY);
    }
    Some(max as f64 / min as f64)
}

/// `weight_c = total / (num_classes * count_c)`.
///
/// A class with no samples gets weight 1.0; it never appears in a
/// loss term anyway.
pub fn inverse_frequency_weights(counts: &[usize; Label::COUNT]) -> [f32; Label::COUNT] {
    let total: usize = counts.iter().sum();
    let mut weights = [1.0f32; Label::COUNT];
    for (weight, &count) in weights.iter_mut().zip(counts.iter()) {
        if count > 0 {
            *weight = total as f32 / (Label::COUNT as f32 * count as f32);
        }
    }
    weights
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn synthetic(split: Split, normal: usize, pneumonia: usize) -> Vec<ImageRecord> {
        let mut records = Vec::new();
        for i in 0..normal {
            records.push(ImageRecord::new(
                format!("{split}/NORMAL/{i:04}.jpeg"), split, Label::Normal,
            ));
        }
        for i in 0..pneumonia {
            records.push(ImageRecord::new(
                format!("{split}/PNEUMONIA/{i:04}.jpeg"), split, Label::Pneumonia,
            ));
        }
        records
    }

    #[test]
    fn test_imbalance_ratio_three_to_one() {
        let catalog = DatasetCatalog::from_records("raw", synthetic(Split::Train, 100, 300));
        assert_eq!(catalog.imbalance_ratio(Split::Train), Some(3.0));
    }

    #[test]
    fn test_rarer_class_weighted_higher() {
        let catalog = DatasetCatalog::from_records("raw", synthetic(Split::Train, 100, 300));
        let w = catalog.class_weights(Split::Train);
        assert!(w[Label::Normal.index()] > w[Label::Pneumonia.index()]);
        assert!((w[Label::Normal.index()] - 2.0).abs() < 1e-6);
        assert!((w[Label::Pneumonia.index()] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_imbalance_edge_cases() {
        let catalog = DatasetCatalog::from_records("raw", synthetic(Split::Val, 0, 8));
        assert_eq!(catalog.imbalance_ratio(Split::Val), Some(f64::INFINITY));
        assert_eq!(catalog.imbalance_ratio(Split::Test), None);
    }

    #[test]
    fn test_records_sorted_by_path() {
        let mut records = synthetic(Split::Test, 3, 3);
        records.reverse();
        let catalog = DatasetCatalog::from_records("raw", records);
        let paths: Vec<_> = catalog.records().iter().map(|r| r.path().to_path_buf()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    proptest! {
        #[test]
        fn prop_split_totals_match_records(
            train in (0usize..40, 0usize..40),
            val   in (0usize..10, 0usize..10),
            test  in (0usize..20, 0usize..20),
        ) {
            let mut records = synthetic(Split::Train, train.0, train.1);
            records.extend(synthetic(Split::Val, val.0, val.1));
            records.extend(synthetic(Split::Test, test.0, test.1));
            let catalog = DatasetCatalog::from_records("raw", records);

            for split in Split::ALL {
                prop_assert_eq!(catalog.split_total(split), catalog.records_for(split).count());
            }
            prop_assert_eq!(catalog.total(), train.0 + train.1 + val.0 + val.1 + test.0 + test.1);
        }
    }
}
