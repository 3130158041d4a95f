// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends one CSV row per finished epoch, next to the
// checkpoints, so learning curves can be plotted while a run is
// still going.
//
// Output file: <model_dir>/metrics.csv
//
// Example CSV output:
//   epoch,train_loss,val_loss,train_acc,val_acc,skipped
//   1,0.693100,0.684200,0.612000,0.625000,0
//   2,0.541800,0.566300,0.744000,0.687500,1
//
// Reading the curves:
//   - val_loss rising while train_loss falls → overfitting
//   - skipped > 0 → undecodable images were dropped that epoch

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::report::EpochRecord;

pub const METRICS_FILE: &str = "metrics.csv";
const HEADER: &str = "epoch,train_loss,val_loss,train_acc,val_acc,skipped";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Class-weighted cross-entropy averaged over training samples
    pub train_loss: f64,

    /// Unweighted cross-entropy on the validation split
    pub val_loss: f64,

    pub train_acc: f64,
    pub val_acc:   f64,

    /// Undecodable records dropped from train + val this epoch
    pub skipped: usize,
}

impl EpochMetrics {
    pub fn from_record(record: &EpochRecord, skipped: usize) -> Self {
        Self {
            epoch:      record.epoch,
            train_loss: record.loss,
            val_loss:   record.val_loss,
            train_acc:  record.accuracy,
            val_acc:    record.val_accuracy,
            skipped,
        }
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Start a fresh log for a new run; an older file is replaced.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join(METRICS_FILE);
        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
        writeln!(f, "{HEADER}")?;
        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.train_acc,
            m.val_acc,
            m.skipped,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, val_loss: f64) -> EpochRecord {
        EpochRecord { epoch, loss: 0.5, val_loss, accuracy: 0.75, val_accuracy: 0.7 }
    }

    #[test]
    fn test_rows_appended_after_header() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(tmp.path()).unwrap();
        logger.log(&EpochMetrics::from_record(&record(1, 0.6), 0)).unwrap();
        logger.log(&EpochMetrics::from_record(&record(2, 0.4), 3)).unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("2,0.500000,0.400000"));
        assert!(lines[2].ends_with(",3"));
    }

    #[test]
    fn test_new_run_truncates_old_log() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(tmp.path()).unwrap();
        logger.log(&EpochMetrics::from_record(&record(1, 0.6), 0)).unwrap();
        let logger = MetricsLogger::new(tmp.path()).unwrap();
        let text = fs::read_to_string(logger.csv_path()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
