use serde::{Deserialize, Serialize};

/// Monotone non-decreasing map from a decision score to a probability, linearly
/// interpolated between knots and clipped to the end knots outside their range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibrator {
    pub knots_x: Vec<f64>,
    pub knots_y: Vec<f64>,
}

struct Block {
    x: f64,
    sum: f64,
    weight: f64,
}

impl IsotonicCalibrator {
    /// Pool-adjacent-violators fit of `labels` on `scores`. Tied scores are merged into
    /// one weighted point first. Returns `None` only for an empty or non-finite input; a
    /// flat fit is kept and maps every score to the observed rate.
    pub fn fit(scores: &[f64], labels: &[u8]) -> Option<Self> {
        if scores.is_empty() || scores.len() != labels.len() {
            return None;
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return None;
        }

        let mut pairs: Vec<(f64, f64)> = scores
            .iter()
            .zip(labels)
            .map(|(s, y)| (*s, f64::from(*y)))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut points: Vec<Block> = Vec::new();
        for (x, y) in pairs {
            match points.last_mut() {
                Some(last) if last.x == x => {
                    last.sum += y;
                    last.weight += 1.0;
                }
                _ => points.push(Block {
                    x,
                    sum: y,
                    weight: 1.0,
                }),
            }
        }

        // Each pooled block keeps the range of point indices it covers.
        let mut blocks: Vec<(usize, usize, f64, f64)> = Vec::with_capacity(points.len());
        for (idx, point) in points.iter().enumerate() {
            blocks.push((idx, idx, point.sum, point.weight));
            while blocks.len() >= 2 {
                let n = blocks.len();
                let (_, _, s_hi, w_hi) = blocks[n - 1];
                let (lo, _, s_lo, w_lo) = blocks[n - 2];
                if s_lo / w_lo <= s_hi / w_hi {
                    break;
                }
                blocks.truncate(n - 2);
                blocks.push((lo, idx, s_lo + s_hi, w_lo + w_hi));
            }
        }

        let mut knots_x = Vec::with_capacity(points.len());
        let mut knots_y = Vec::with_capacity(points.len());
        for (lo, hi, sum, weight) in blocks {
            let value = sum / weight;
            for point in &points[lo..=hi] {
                knots_x.push(point.x);
                knots_y.push(value);
            }
        }

        Some(Self { knots_x, knots_y })
    }

    pub fn predict(&self, score: f64) -> f64 {
        let (Some(&x0), Some(&xn)) = (self.knots_x.first(), self.knots_x.last()) else {
            return 0.5;
        };
        if score.is_nan() {
            return self.knots_y[0];
        }
        if score <= x0 {
            return self.knots_y[0];
        }
        if score >= xn {
            return self.knots_y[self.knots_y.len() - 1];
        }
        let upper = self.knots_x.partition_point(|x| *x < score);
        let lower = upper - 1;
        let (xa, xb) = (self.knots_x[lower], self.knots_x[upper]);
        let (ya, yb) = (self.knots_y[lower], self.knots_y[upper]);
        if xb == xa {
            return yb;
        }
        ya + (yb - ya) * (score - xa) / (xb - xa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_adjacent_violators() {
        let scores = [1.0, 2.0, 3.0, 4.0];
        let labels = [0, 1, 0, 1];
        let iso = IsotonicCalibrator::fit(&scores, &labels).unwrap();
        assert_eq!(iso.knots_y, vec![0.0, 0.5, 0.5, 1.0]);
        assert!(iso.knots_y.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn interpolates_and_clips() {
        let iso = IsotonicCalibrator {
            knots_x: vec![0.0, 2.0],
            knots_y: vec![0.2, 0.6],
        };
        assert!((iso.predict(1.0) - 0.4).abs() < 1e-12);
        assert_eq!(iso.predict(-5.0), 0.2);
        assert_eq!(iso.predict(9.0), 0.6);
    }

    #[test]
    fn tied_scores_share_one_knot() {
        let iso = IsotonicCalibrator::fit(&[1.0, 1.0, 2.0], &[0, 1, 1]).unwrap();
        assert_eq!(iso.knots_x, vec![1.0, 2.0]);
        assert_eq!(iso.knots_y, vec![0.5, 1.0]);
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(IsotonicCalibrator::fit(&[], &[]).is_none());
        assert!(IsotonicCalibrator::fit(&[f64::NAN, 1.0], &[0, 1]).is_none());
        assert!(IsotonicCalibrator::fit(&[2.0, 1.0], &[1, 0]).is_some());
    }

    #[test]
    fn single_class_slice_keeps_a_flat_fit() {
        let iso = IsotonicCalibrator::fit(&[1.0, 2.0, 3.0], &[0, 0, 0]).unwrap();
        assert_eq!(iso.knots_y, vec![0.0, 0.0, 0.0]);
        assert_eq!(iso.predict(-4.0), 0.0);
        assert_eq!(iso.predict(2.5), 0.0);
        assert_eq!(iso.predict(9.0), 0.0);

        let positives = IsotonicCalibrator::fit(&[1.0, 2.0], &[1, 1]).unwrap();
        assert_eq!(positives.predict(1.5), 1.0);
    }
}
