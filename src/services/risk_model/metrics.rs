use serde::{Deserialize, Serialize};

/// Holdout metrics for a scored, labeled slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub rows: usize,
    pub positives: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub brier_score: f64,
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Area under the ROC curve as the Mann–Whitney rank statistic with tie-averaged
/// ranks. Returns `None` when only one class is present.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|y| **y == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1..=end share their average.
        let average = (start + 1 + end) as f64 / 2.0;
        for idx in &order[start..end] {
            ranks[*idx] = average;
        }
        start = end;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(y, _)| **y == 1)
        .map(|(_, r)| r)
        .sum();
    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

pub fn compute(labels: &[u8], probabilities: &[f64], threshold: f64) -> EvaluationMetrics {
    let rows = labels.len().min(probabilities.len());
    if rows == 0 {
        return EvaluationMetrics::default();
    }
    let labels = &labels[..rows];
    let probabilities = &probabilities[..rows];

    let (mut tp, mut fp, mut tn, mut fn_) = (0.0, 0.0, 0.0, 0.0);
    let mut brier = 0.0;
    for (y, p) in labels.iter().zip(probabilities) {
        let predicted = *p >= threshold;
        match (predicted, *y == 1) {
            (true, true) => tp += 1.0,
            (true, false) => fp += 1.0,
            (false, false) => tn += 1.0,
            (false, true) => fn_ += 1.0,
        }
        brier += (p - f64::from(*y)).powi(2);
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let roc_auc = roc_auc(labels, probabilities).unwrap_or_else(|| {
        tracing::debug!(rows, "single label class in evaluation slice; roc_auc reported as 0.5");
        0.5
    });
    EvaluationMetrics {
        rows,
        positives: labels.iter().filter(|y| **y == 1).count(),
        accuracy: ratio(tp + tn, rows as f64),
        precision,
        recall,
        f1: ratio(2.0 * precision * recall, precision + recall),
        roc_auc,
        brier_score: brier / rows as f64,
    }
}
