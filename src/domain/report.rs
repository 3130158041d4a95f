// ============================================================
// Layer 3 — Training History & Evaluation Report
// ============================================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── TrainingHistory ──────────────────────────────────────────────────────────

/// Metrics for one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch:        usize,
    pub loss:         f64,
    pub val_loss:     f64,
    pub accuracy:     f64,
    pub val_accuracy: f64,
}

impl EpochRecord {
    /// Both losses are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite() && self.val_loss.is_finite()
    }
}

/// Why a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All requested epochs ran.
    Completed,
    /// Validation loss stopped improving for `patience` epochs.
    EarlyStopped { epoch: usize },
    Cancelled,
    Failed,
}

/// Append-only per-epoch record of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    epochs:      Vec<EpochRecord>,
    best_epoch:  Option<usize>,
    stop_reason: Option<StopReason>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn mark_best(&mut self, epoch: usize) {
        self.best_epoch = Some(epoch);
    }

    pub fn finish(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    pub fn epochs(&self) -> &[EpochRecord] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }
}

// ─── EvaluationReport ─────────────────────────────────────────────────────────

/// Summary metrics over one full pass of the test split.
///
/// Accuracy, precision and recall come from the same confusion
/// matrix; AUC is computed from the same probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy:        f64,
    pub auc:             f64,
    pub precision:       f64,
    pub recall:          f64,
    pub true_positives:  usize,
    pub false_positives: usize,
    pub true_negatives:  usize,
    pub false_negatives: usize,
    pub samples:         usize,
    pub skipped:         usize,
}

impl EvaluationReport {
    /// Probability at or above which a sample is called PNEUMONIA.
    pub const THRESHOLD: f64 = 0.5;

    /// Build a report from P(PNEUMONIA) per sample and the true labels
    /// (`true` = PNEUMONIA).
    pub fn from_predictions(probabilities: &[f64], positives: &[bool], skipped: usize) -> Self {
        assert_eq!(
            probabilities.len(),
            positives.len(),
            "probabilities and labels must have same length"
        );

        let (mut tp, mut fp, mut tn, mut fn_count) = (0usize, 0usize, 0usize, 0usize);
        for (&p, &is_positive) in probabilities.iter().zip(positives) {
            match (p >= Self::THRESHOLD, is_positive) {
                (true, true)   => tp += 1,
                (true, false)  => fp += 1,
                (false, false) => tn += 1,
                (false, true)  => fn_count += 1,
            }
        }

        let total = probabilities.len();
        Self {
            accuracy:        ratio(tp + tn, total),
            auc:             roc_auc(probabilities, positives),
            precision:       ratio(tp, tp + fp),
            recall:          ratio(tp, tp + fn_count),
            true_positives:  tp,
            false_positives: fp,
            true_negatives:  tn,
            false_negatives: fn_count,
            samples:         total,
            skipped,
        }
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acc={:.4} auc={:.4} prec={:.4} rec={:.4} (tp={} fp={} tn={} fn={}, n={}, skipped={})",
            self.accuracy, self.auc, self.precision, self.recall,
            self.true_positives, self.false_positives,
            self.true_negatives, self.false_negatives,
            self.samples, self.skipped,
        )
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Area under the ROC curve as the Mann-Whitney statistic.
///
/// Tied scores count one half. Returns 0.5 when either class is
/// missing, since the curve is undefined there.
pub fn roc_auc(scores: &[f64], positives: &[bool]) -> f64 {
    let n_pos = positives.iter().filter(|&&p| p).count();
    let n_neg = positives.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Average ranks (1-based) over tie groups, summed for positives.
    let mut pos_rank_sum = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if positives[idx] {
                pos_rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    (u / (n_pos as f64 * n_neg as f64)).clamp(0.0, 1.0)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn in_unit_range(r: &EvaluationReport) -> bool {
        [r.accuracy, r.auc, r.precision, r.recall]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }

    #[test]
    fn test_perfect_separation() {
        let probs  = [0.1, 0.2, 0.8, 0.9];
        let labels = [false, false, true, true];
        let r = EvaluationReport::from_predictions(&probs, &labels, 0);
        assert!((r.accuracy - 1.0).abs() < 1e-9);
        assert!((r.auc - 1.0).abs() < 1e-9);
        assert!((r.precision - 1.0).abs() < 1e-9);
        assert!((r.recall - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inverted_scores() {
        let probs  = [0.9, 0.8, 0.2, 0.1];
        let labels = [false, false, true, true];
        let r = EvaluationReport::from_predictions(&probs, &labels, 0);
        assert!(r.accuracy.abs() < 1e-9);
        assert!(r.auc.abs() < 1e-9);
        assert!(in_unit_range(&r));
    }

    #[test]
    fn test_mixed_confusion_counts() {
        // 2 TP, 1 FP, 1 TN, 1 FN
        let probs  = [0.7, 0.6, 0.55, 0.3, 0.4];
        let labels = [true, true, false, false, true];
        let r = EvaluationReport::from_predictions(&probs, &labels, 2);
        assert_eq!(
            (r.true_positives, r.false_positives, r.true_negatives, r.false_negatives),
            (2, 1, 1, 1)
        );
        assert!((r.accuracy - 3.0 / 5.0).abs() < 1e-9);
        assert!((r.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((r.recall - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(r.skipped, 2);
        assert!(in_unit_range(&r));
    }

    #[test]
    fn test_auc_ties_count_half() {
        let probs  = [0.5, 0.5];
        let labels = [false, true];
        assert!((roc_auc(&probs, &labels) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_auc_single_class_is_half() {
        assert_eq!(roc_auc(&[0.2, 0.9], &[true, true]), 0.5);
        let r = EvaluationReport::from_predictions(&[], &[], 0);
        assert_eq!(r.samples, 0);
        assert!(in_unit_range(&r));
    }

    #[test]
    fn test_history_append_only() {
        let mut h = TrainingHistory::new();
        for epoch in 1..=3 {
            h.push(EpochRecord {
                epoch, loss: 1.0 / epoch as f64, val_loss: 1.0,
                accuracy: 0.5, val_accuracy: 0.5,
            });
        }
        h.mark_best(1);
        h.finish(StopReason::EarlyStopped { epoch: 3 });
        assert_eq!(h.len(), 3);
        assert_eq!(h.epochs()[0].epoch, 1);
        assert_eq!(h.best_epoch(), Some(1));
        assert_eq!(h.stop_reason(), Some(StopReason::EarlyStopped { epoch: 3 }));

        let json = serde_json::to_string(&h).unwrap();
        let back: TrainingHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
