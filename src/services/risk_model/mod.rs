//! Calibrated cell-day risk classifier.
//!
//! Rows are split by time: the earlier slice fits a class-balanced logistic regression,
//! the later slice fits an isotonic calibration of its decision scores.

pub mod isotonic;
pub mod logistic;
pub mod metrics;
pub mod scaler;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{ModelConfig, RiskBands};
use crate::error::{PipelineError, PipelineResult};
use crate::ids::CellId;
use crate::services::features::FeatureRow;
use crate::store::write_atomic;

pub use isotonic::IsotonicCalibrator;
pub use logistic::{FitOptions, LogisticRegression};
pub use metrics::EvaluationMetrics;
pub use scaler::StandardScaler;

use scaler::condition_raw;

/// Model inputs, in column order.
pub const FEATURE_NAMES: [&str; 8] = [
    "cnt_7d",
    "cnt_30d",
    "decay",
    "freeze",
    "temp_drop_c",
    "precip_mm",
    "heavy_rain",
    "freeze_x_cnt_30d",
];

pub const MIN_TRAINING_ROWS: usize = 10;
pub const MAX_DRIVERS: usize = 5;
pub const PROBABILITY_FLOOR: f64 = 1e-6;

/// Anything that turns a scaled feature vector into an event probability.
pub trait ScoringModel {
    fn probability(&self, scaled: &[f64]) -> f64;

    /// Linear attribution capability; models without one produce no drivers.
    fn explainer(&self) -> Option<&dyn Explainable> {
        None
    }
}

pub trait Explainable {
    /// One weight per scaled feature, in the model's column order.
    fn coefficients(&self) -> &[f64];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
    pub base: LogisticRegression,
    #[serde(default)]
    pub calibrator: Option<IsotonicCalibrator>,
}

impl ScoringModel for RiskModel {
    fn probability(&self, scaled: &[f64]) -> f64 {
        match &self.calibrator {
            Some(calibrator) => calibrator.predict(self.base.decision(scaled)).clamp(0.0, 1.0),
            None => self.base.probability(scaled),
        }
    }

    fn explainer(&self) -> Option<&dyn Explainable> {
        Some(&self.base)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub feature_names: Vec<String>,
    pub scaler: StandardScaler,
    pub coefficients: BTreeMap<String, f64>,
    pub train_rows: usize,
    pub calibration_rows: usize,
    pub calibrated: bool,
    pub train_start: Option<NaiveDate>,
    pub train_end: Option<NaiveDate>,
}

impl ModelMetadata {
    fn raw_vector(&self, row: &FeatureRow) -> Vec<f64> {
        self.feature_names
            .iter()
            .map(|name| condition_raw(row.value_of(name)))
            .collect()
    }

    pub fn scaled_vector(&self, row: &FeatureRow) -> Vec<f64> {
        self.scaler.transform(&self.raw_vector(row))
    }
}

/// Fitted model plus everything needed to score new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: RiskModel,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("failed to encode model artifact")?;
        write_atomic(path, &bytes)?;
        tracing::info!(path = %path.display(), "model artifact saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read model artifact {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse model artifact {}", path.display()))
    }

    /// `Ok(None)` when no artifact has been saved yet.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        }
    }
}

impl RiskBands {
    pub fn band_of(&self, probability: f64) -> RiskBand {
        if probability < self.low_upper {
            RiskBand::Low
        } else if probability < self.medium_upper {
            RiskBand::Medium
        } else {
            RiskBand::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub name: String,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub date: NaiveDate,
    pub cell_id: CellId,
    /// Calibrated probability clipped away from 0 and 1.
    pub probability: f64,
    /// Calibrated probability before clipping.
    pub risk_score: f64,
    pub risk_band: RiskBand,
    #[serde(with = "crate::json")]
    pub drivers: Vec<Driver>,
}

/// Labeled rows in stable date order.
fn labeled_by_date(rows: &[FeatureRow]) -> PipelineResult<Vec<(&FeatureRow, u8)>> {
    if !rows.is_empty() && rows.iter().all(|row| row.y_event.is_none()) {
        return Err(PipelineError::MissingLabel);
    }
    let mut labeled: Vec<(&FeatureRow, u8)> = rows
        .iter()
        .filter_map(|row| row.y_event.map(|y| (row, u8::from(y > 0))))
        .collect();
    let dropped = rows.len() - labeled.len();
    if dropped > 0 {
        tracing::debug!(dropped, "rows without a label skipped");
    }
    labeled.sort_by_key(|(row, _)| row.date);
    Ok(labeled)
}

/// Index of the first calibration row: `max(1, floor(n × (1 − f)))`.
pub fn split_index(n: usize, validation_fraction: f64) -> usize {
    let f = validation_fraction.clamp(0.0, 1.0);
    ((n as f64 * (1.0 - f)).floor() as usize).clamp(1, n.max(1))
}

/// The later slice held out for calibration and evaluation.
pub fn validation_slice(rows: &[FeatureRow], validation_fraction: f64) -> Vec<FeatureRow> {
    let Ok(labeled) = labeled_by_date(rows) else {
        return Vec::new();
    };
    if labeled.is_empty() {
        return Vec::new();
    }
    let split = split_index(labeled.len(), validation_fraction);
    labeled[split..].iter().map(|(row, _)| (*row).clone()).collect()
}

pub fn train(rows: &[FeatureRow], config: &ModelConfig) -> PipelineResult<(RiskModel, ModelMetadata)> {
    let labeled = labeled_by_date(rows)?;
    let n = labeled.len();
    if n < MIN_TRAINING_ROWS {
        return Err(PipelineError::InsufficientSamples {
            n,
            min: MIN_TRAINING_ROWS,
        });
    }
    let split = split_index(n, config.validation_fraction);
    let (train_slice, calibration_slice) = labeled.split_at(split);

    let train_labels: Vec<u8> = train_slice.iter().map(|(_, y)| *y).collect();
    let first_label = train_labels[0];
    if train_labels.iter().all(|y| *y == first_label) {
        return Err(PipelineError::SingleClassTraining { label: first_label });
    }

    let feature_names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
    let raw = |slice: &[(&FeatureRow, u8)]| -> Vec<Vec<f64>> {
        slice
            .iter()
            .map(|(row, _)| {
                FEATURE_NAMES
                    .iter()
                    .map(|name| condition_raw(row.value_of(name)))
                    .collect()
            })
            .collect()
    };
    let train_raw = raw(train_slice);
    let scaler = StandardScaler::fit(&train_raw, FEATURE_NAMES.len());
    let train_x: Vec<Vec<f64>> = train_raw.iter().map(|r| scaler.transform(r)).collect();

    let base = LogisticRegression::fit(
        &train_x,
        &train_labels,
        FitOptions {
            regularization_c: config.regularization_c,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        },
    )?;

    let calibrator = if config.calibrate {
        let scores: Vec<f64> = raw(calibration_slice)
            .iter()
            .map(|r| base.decision(&scaler.transform(r)))
            .collect();
        let labels: Vec<u8> = calibration_slice.iter().map(|(_, y)| *y).collect();
        let fitted = IsotonicCalibrator::fit(&scores, &labels);
        if fitted.is_none() {
            tracing::warn!(
                calibration_rows = calibration_slice.len(),
                "isotonic calibration unavailable; using base classifier probabilities"
            );
        }
        fitted
    } else {
        None
    };

    let coefficients = feature_names
        .iter()
        .cloned()
        .zip(base.coefficients.iter().copied())
        .collect();
    let metadata = ModelMetadata {
        feature_names,
        scaler,
        coefficients,
        train_rows: train_slice.len(),
        calibration_rows: calibration_slice.len(),
        calibrated: calibrator.is_some(),
        train_start: train_slice.first().map(|(row, _)| row.date),
        train_end: train_slice.last().map(|(row, _)| row.date),
    };
    tracing::info!(
        train_rows = metadata.train_rows,
        calibration_rows = metadata.calibration_rows,
        calibrated = metadata.calibrated,
        positives = train_labels.iter().filter(|y| **y == 1).count(),
        "risk model trained"
    );
    Ok((RiskModel { base, calibrator }, metadata))
}

fn top_drivers(explainer: &dyn Explainable, names: &[String], scaled: &[f64]) -> Vec<Driver> {
    let mut contributions: Vec<Driver> = names
        .iter()
        .zip(explainer.coefficients().iter().zip(scaled))
        .map(|(name, (coef, x))| Driver {
            name: name.clone(),
            contribution: coef * x,
        })
        .collect();
    contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    contributions.truncate(MAX_DRIVERS);
    contributions
}

pub fn predict(
    model: &dyn ScoringModel,
    rows: &[FeatureRow],
    metadata: &ModelMetadata,
    bands: &RiskBands,
) -> Vec<RiskScore> {
    let explainer = model.explainer();
    rows.iter()
        .map(|row| {
            let scaled = metadata.scaled_vector(row);
            let raw = model.probability(&scaled);
            let risk_score = if raw.is_finite() { raw } else { 0.0 };
            let probability = risk_score.clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
            RiskScore {
                date: row.date,
                cell_id: row.cell_id.clone(),
                probability,
                risk_score,
                risk_band: bands.band_of(probability),
                drivers: explainer
                    .map(|e| top_drivers(e, &metadata.feature_names, &scaled))
                    .unwrap_or_default(),
            }
        })
        .collect()
}

/// Metrics over the labeled rows; unlabeled rows are ignored.
pub fn evaluate(
    model: &dyn ScoringModel,
    rows: &[FeatureRow],
    metadata: &ModelMetadata,
    threshold: f64,
) -> EvaluationMetrics {
    let (labels, probabilities): (Vec<u8>, Vec<f64>) = rows
        .iter()
        .filter_map(|row| {
            let y = row.y_event?;
            let p = model.probability(&metadata.scaled_vector(row));
            Some((u8::from(y > 0), if p.is_finite() { p } else { 0.0 }))
        })
        .unzip();
    let metrics = metrics::compute(&labels, &probabilities, threshold);
    tracing::info!(
        rows = metrics.rows,
        roc_auc = metrics.roc_auc,
        brier_score = metrics.brier_score,
        "risk model evaluated"
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, synthetic_features};

    fn config() -> ModelConfig {
        ModelConfig::default()
    }

    #[test]
    fn split_keeps_at_least_one_training_row() {
        assert_eq!(split_index(10, 0.2), 8);
        assert_eq!(split_index(10, 0.0), 10);
        assert_eq!(split_index(3, 0.99), 1);
    }

    #[test]
    fn trains_scores_and_explains() -> anyhow::Result<()> {
        let rows = synthetic_features(60, 4);
        let (model, metadata) = train(&rows, &config())?;
        assert_eq!(metadata.feature_names.len(), FEATURE_NAMES.len());
        assert_eq!(metadata.train_rows + metadata.calibration_rows, rows.len());
        assert!(metadata.coefficients["cnt_30d"] > 0.0);

        let scores = predict(&model, &rows, &metadata, &RiskBands::default());
        assert_eq!(scores.len(), rows.len());
        for score in &scores {
            assert!(score.probability >= PROBABILITY_FLOOR);
            assert!(score.probability <= 1.0 - PROBABILITY_FLOOR);
            assert_eq!(score.risk_band, RiskBands::default().band_of(score.probability));
            assert!(score.drivers.len() <= MAX_DRIVERS);
            assert!(score
                .drivers
                .windows(2)
                .all(|w| w[0].contribution.abs() >= w[1].contribution.abs()));
        }

        let holdout = validation_slice(&rows, config().validation_fraction);
        assert_eq!(holdout.len(), metadata.calibration_rows);
        let metrics = evaluate(&model, &holdout, &metadata, 0.5);
        assert_eq!(metrics.rows, holdout.len());
        assert!((0.0..=1.0).contains(&metrics.roc_auc));
        Ok(())
    }

    #[test]
    fn training_is_deterministic() -> anyhow::Result<()> {
        let rows = synthetic_features(40, 3);
        let (a, meta_a) = train(&rows, &config())?;
        let (b, meta_b) = train(&rows, &config())?;
        assert_eq!(a, b);
        assert_eq!(meta_a, meta_b);
        Ok(())
    }

    #[test]
    fn rejects_unusable_training_sets() {
        let rows = synthetic_features(2, 2);
        assert_eq!(
            train(&rows, &config()).unwrap_err(),
            PipelineError::InsufficientSamples { n: 4, min: 10 }
        );

        let mut unlabeled = synthetic_features(10, 2);
        for row in &mut unlabeled {
            row.y_event = None;
        }
        assert_eq!(train(&unlabeled, &config()).unwrap_err(), PipelineError::MissingLabel);

        let mut all_zero = synthetic_features(10, 2);
        for row in &mut all_zero {
            row.y_event = Some(0);
        }
        assert_eq!(
            train(&all_zero, &config()).unwrap_err(),
            PipelineError::SingleClassTraining { label: 0 }
        );
    }

    #[test]
    fn uncalibrated_model_falls_back_to_base_probabilities() -> anyhow::Result<()> {
        let rows = synthetic_features(30, 3);
        let mut cfg = config();
        cfg.calibrate = false;
        let (model, metadata) = train(&rows, &cfg)?;
        assert!(model.calibrator.is_none());
        assert!(!metadata.calibrated);
        let scaled = metadata.scaled_vector(&rows[0]);
        assert_eq!(model.probability(&scaled), model.base.probability(&scaled));
        Ok(())
    }

    #[test]
    fn event_free_calibration_slice_scores_at_the_observed_rate() -> anyhow::Result<()> {
        let mut rows = synthetic_features(60, 4);
        for row in rows.iter_mut().filter(|row| row.date >= day(49)) {
            row.y_event = Some(0);
        }
        let (model, metadata) = train(&rows, &config())?;
        assert_eq!(metadata.calibration_rows, 48);
        assert!(metadata.calibrated);

        let holdout = validation_slice(&rows, config().validation_fraction);
        let scores = predict(&model, &holdout, &metadata, &RiskBands::default());
        for score in &scores {
            assert_eq!(score.risk_score, 0.0);
            assert_eq!(score.probability, PROBABILITY_FLOOR);
            assert_eq!(score.risk_band, RiskBand::Low);
        }
        Ok(())
    }

    #[test]
    fn empty_calibration_slice_falls_back_to_base_probabilities() -> anyhow::Result<()> {
        let rows = synthetic_features(30, 3);
        let mut cfg = config();
        cfg.validation_fraction = 0.0;
        let (model, metadata) = train(&rows, &cfg)?;
        assert_eq!(metadata.calibration_rows, 0);
        assert!(!metadata.calibrated);
        let scaled = metadata.scaled_vector(&rows[5]);
        assert_eq!(model.probability(&scaled), model.base.probability(&scaled));
        Ok(())
    }

    #[test]
    fn models_without_coefficients_emit_no_drivers() {
        struct Constant;
        impl ScoringModel for Constant {
            fn probability(&self, _scaled: &[f64]) -> f64 {
                0.42
            }
        }
        let rows = synthetic_features(1, 1);
        let metadata = ModelMetadata {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            scaler: StandardScaler {
                mean: vec![0.0; FEATURE_NAMES.len()],
                scale: vec![1.0; FEATURE_NAMES.len()],
            },
            coefficients: BTreeMap::new(),
            train_rows: 0,
            calibration_rows: 0,
            calibrated: false,
            train_start: None,
            train_end: None,
        };
        let scores = predict(&Constant, &rows, &metadata, &RiskBands::default());
        assert_eq!(scores[0].risk_band, RiskBand::Medium);
        assert!(scores[0].drivers.is_empty());
    }

    #[test]
    fn artifact_round_trips_through_json_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("models").join("risk_model.json");
        assert!(ModelArtifact::load_optional(&path)?.is_none());

        let rows = synthetic_features(30, 3);
        let (model, metadata) = train(&rows, &config())?;
        let artifact = ModelArtifact { model, metadata };
        artifact.save(&path)?;
        let loaded = ModelArtifact::load(&path)?;
        assert_eq!(loaded, artifact);

        let before = predict(&artifact.model, &rows, &artifact.metadata, &RiskBands::default());
        let after = predict(&loaded.model, &rows, &loaded.metadata, &RiskBands::default());
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn bands_cut_at_configured_points() {
        let bands = RiskBands::default();
        assert_eq!(bands.band_of(0.19), RiskBand::Low);
        assert_eq!(bands.band_of(0.2), RiskBand::Medium);
        assert_eq!(bands.band_of(0.5), RiskBand::High);
        assert_eq!(RiskBand::High.as_str(), "high");
    }
}
