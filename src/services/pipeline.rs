//! Batch orchestration over a [`TableStore`]: raw tables in, one persisted table per
//! stage out. Each stage replaces its table whole; an empty upstream table turns every
//! later stage into a no-op.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::services::features::{
    assign_cells, build_cell_day_features, censored_tail_start, EventPoint, EventRecord,
    FeatureRow, WeatherRecord,
};
use crate::services::pricing::{price_predictions, severity_mixture_for, PredictionRow};
use crate::services::recommendations::{build_recommendations, RecommendationRow};
use crate::services::risk_model::{
    evaluate, predict, train, validation_slice, EvaluationMetrics, ModelArtifact,
};
use crate::spatial::SpatialIndex;
use crate::store::{read_csv_file, TableName, TableStore};
use crate::time::shift_days;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub feature_rows: usize,
    pub prediction_rows: usize,
    pub recommendation_rows: usize,
    pub trained: bool,
    #[serde(default)]
    pub validation: Option<EvaluationMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Train even when a saved model exists.
    pub retrain: bool,
}

/// Replaces the raw event table with the points in a CSV file, assigned to cells.
pub fn import_event_points<S: TableStore>(
    store: &mut S,
    path: &Path,
    index: &dyn SpatialIndex,
) -> Result<usize> {
    let points: Vec<EventPoint> = read_csv_file(path)?;
    let events = assign_cells(&points, index);
    store.put(TableName::RawEvents, &events)?;
    tracing::info!(
        path = %path.display(),
        points = points.len(),
        events = events.len(),
        "event points imported"
    );
    Ok(events.len())
}

/// Replaces the raw weather table with the daily rows in a CSV file.
pub fn import_weather<S: TableStore>(store: &mut S, path: &Path) -> Result<usize> {
    let records: Vec<WeatherRecord> = read_csv_file(path)?;
    store.put(TableName::Weather, &records)?;
    tracing::info!(path = %path.display(), rows = records.len(), "weather imported");
    Ok(records.len())
}

/// Builds features for `start..=end` from the raw tables and persists them.
pub fn build_features<S: TableStore>(
    store: &mut S,
    config: &PipelineConfig,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<FeatureRow>> {
    let events: Vec<EventRecord> = store.get(TableName::RawEvents)?;
    let weather: Vec<WeatherRecord> = store.get(TableName::Weather)?;
    let rows = build_cell_day_features(&events, &weather, start, end, &config.grid)?;
    store
        .put(TableName::Features, &rows)
        .context("failed to persist feature table")?;
    Ok(rows)
}

/// Rows eligible for training: inside the trailing `train_days` window ending at
/// `end`, minus the right-censored tail whose label window runs past `end`.
pub fn training_rows(
    rows: &[FeatureRow],
    end: NaiveDate,
    config: &PipelineConfig,
) -> Vec<FeatureRow> {
    let window_start = shift_days(end, 1 - i64::from(config.model.train_days));
    let censored_from = censored_tail_start(end, config.grid.horizon_days);
    rows.iter()
        .filter(|row| row.date >= window_start && row.date < censored_from)
        .cloned()
        .collect()
}

/// Latest date present in a feature table.
pub fn last_feature_date(rows: &[FeatureRow]) -> Option<NaiveDate> {
    rows.iter().map(|row| row.date).max()
}

/// Trains on the persisted feature table and saves the artifact.
pub fn train_model<S: TableStore>(
    store: &S,
    config: &PipelineConfig,
) -> Result<Option<ModelArtifact>> {
    let rows: Vec<FeatureRow> = store.get(TableName::Features)?;
    let Some(end) = last_feature_date(&rows) else {
        tracing::warn!("feature table is empty; nothing to train on");
        return Ok(None);
    };
    train_and_save(&rows, end, config).map(Some)
}

fn train_and_save(
    rows: &[FeatureRow],
    end: NaiveDate,
    config: &PipelineConfig,
) -> Result<ModelArtifact> {
    let eligible = training_rows(rows, end, config);
    tracing::info!(
        eligible = eligible.len(),
        total = rows.len(),
        %end,
        "training risk model"
    );
    let (model, metadata) = train(&eligible, &config.model).context("risk model training failed")?;
    let artifact = ModelArtifact { model, metadata };
    artifact.save(&config.storage.model_path())?;
    Ok(artifact)
}

/// Scores and prices the persisted feature table with `artifact`.
pub fn predict_and_price<S: TableStore>(
    store: &mut S,
    artifact: &ModelArtifact,
    config: &PipelineConfig,
) -> Result<Vec<PredictionRow>> {
    let rows: Vec<FeatureRow> = store.get(TableName::Features)?;
    let events: Vec<EventRecord> = store.get(TableName::RawEvents)?;
    let scores = predict(&artifact.model, &rows, &artifact.metadata, &config.bands);
    let mixture = severity_mixture_for(&events, &config.pricing);
    let priced = price_predictions(scores, &mixture, config.pricing.usd_per_kwh, &config.pricing);
    store
        .put(TableName::Predictions, &priced)
        .context("failed to persist prediction table")?;
    Ok(priced)
}

pub fn recommend<S: TableStore>(
    store: &mut S,
    index: &dyn SpatialIndex,
    config: &PipelineConfig,
) -> Result<Vec<RecommendationRow>> {
    let predictions: Vec<PredictionRow> = store.get(TableName::Predictions)?;
    let recs = build_recommendations(&predictions, &config.recommendations, index)?;
    store
        .put(TableName::Recommendations, &recs)
        .context("failed to persist recommendation table")?;
    Ok(recs)
}

/// Metrics on the held-out later slice of the training window.
pub fn evaluate_saved_model<S: TableStore>(
    store: &S,
    artifact: &ModelArtifact,
    config: &PipelineConfig,
    threshold: f64,
) -> Result<EvaluationMetrics> {
    let rows: Vec<FeatureRow> = store.get(TableName::Features)?;
    let Some(end) = last_feature_date(&rows) else {
        return Ok(EvaluationMetrics::default());
    };
    let holdout = validation_slice(
        &training_rows(&rows, end, config),
        config.model.validation_fraction,
    );
    Ok(evaluate(&artifact.model, &holdout, &artifact.metadata, threshold))
}

fn load_or_train(
    rows: &[FeatureRow],
    end: NaiveDate,
    config: &PipelineConfig,
    retrain: bool,
) -> Result<(ModelArtifact, bool)> {
    let path = config.storage.model_path();
    if !retrain {
        match ModelArtifact::load_optional(&path) {
            Ok(Some(artifact)) => {
                tracing::info!(path = %path.display(), "using saved risk model");
                return Ok((artifact, false));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to load saved risk model; retraining"
                );
            }
        }
    }
    Ok((train_and_save(rows, end, config)?, true))
}

/// Features → model (load or train) → predictions → pricing → recommendations.
pub fn run<S: TableStore>(
    store: &mut S,
    index: &dyn SpatialIndex,
    config: &PipelineConfig,
    start: NaiveDate,
    end: NaiveDate,
    options: RunOptions,
) -> Result<PipelineOutput> {
    let features = build_features(store, config, start, end)?;
    if features.is_empty() {
        tracing::warn!(%start, %end, "no features built; downstream stages skipped");
        return Ok(PipelineOutput::default());
    }

    let (artifact, trained) = load_or_train(&features, end, config, options.retrain)?;
    let predictions = predict_and_price(store, &artifact, config)?;
    let recommendations = recommend(store, index, config)?;

    let validation = if trained {
        let holdout = validation_slice(
            &training_rows(&features, end, config),
            config.model.validation_fraction,
        );
        Some(evaluate(
            &artifact.model,
            &holdout,
            &artifact.metadata,
            config.model.evaluation_threshold,
        ))
    } else {
        None
    };

    let output = PipelineOutput {
        feature_rows: features.len(),
        prediction_rows: predictions.len(),
        recommendation_rows: recommendations.len(),
        trained,
        validation,
    };
    tracing::info!(
        %start,
        %end,
        features = output.feature_rows,
        predictions = output.prediction_rows,
        recommendations = output.recommendation_rows,
        trained = output.trained,
        "pipeline run complete"
    );
    Ok(output)
}
