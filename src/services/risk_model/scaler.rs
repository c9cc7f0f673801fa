use serde::{Deserialize, Serialize};

use crate::services::stats::{finite_or_zero, mean_and_population_std};

/// Raw feature magnitudes are bounded before scaling.
pub const RAW_CLIP: f64 = 1e6;
/// Scaled features are bounded before they reach the classifier.
pub const SCALED_CLIP: f64 = 10.0;

/// Non-finite values become zero, then clip to `±RAW_CLIP`.
pub fn condition_raw(value: f64) -> f64 {
    finite_or_zero(value).clamp(-RAW_CLIP, RAW_CLIP)
}

/// Per-column standardization fitted on the training slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Columns with zero (or non-finite) spread keep a unit scale.
    pub fn fit(rows: &[Vec<f64>], width: usize) -> Self {
        let mut mean = Vec::with_capacity(width);
        let mut scale = Vec::with_capacity(width);
        for col in 0..width {
            let column: Vec<f64> = rows
                .iter()
                .map(|row| row.get(col).copied().unwrap_or(0.0))
                .collect();
            let (m, s) = mean_and_population_std(&column);
            mean.push(m);
            scale.push(if s > 0.0 { s } else { 1.0 });
        }
        Self { mean, scale }
    }

    pub fn transform(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .enumerate()
            .map(|(idx, value)| {
                let mean = self.mean.get(idx).copied().unwrap_or(0.0);
                let scale = self.scale.get(idx).copied().unwrap_or(1.0);
                let z = (condition_raw(*value) - mean) / scale;
                if z.is_nan() {
                    0.0
                } else {
                    z.clamp(-SCALED_CLIP, SCALED_CLIP)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_columns_scale_by_one() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&rows, 2);
        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(scaler.scale, vec![1.0, 1.0]);
        assert_eq!(scaler.transform(&[3.0, 7.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn conditioning_bounds_inputs_and_outputs() {
        assert_eq!(condition_raw(f64::NAN), 0.0);
        assert_eq!(condition_raw(f64::NEG_INFINITY), 0.0);
        assert_eq!(condition_raw(5e9), RAW_CLIP);

        let scaler = StandardScaler {
            mean: vec![0.0],
            scale: vec![0.5],
        };
        assert_eq!(scaler.transform(&[100.0]), vec![SCALED_CLIP]);
        assert_eq!(scaler.transform(&[f64::INFINITY]), vec![0.0]);
    }
}
