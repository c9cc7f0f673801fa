//! GeoJSON map layers and per-cell history over persisted tables.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;

use crate::config::RecommendationConfig;
use crate::error::PipelineResult;
use crate::ids::CellId;
use crate::services::pricing::PredictionRow;
use crate::services::recommendations::{per_cell_recommendations, RecommendationRow};
use crate::services::risk_model::RiskBand;
use crate::spatial::{Geometry, SpatialIndex};

pub const DEFAULT_HISTORY_DAYS: u32 = 180;
pub const MAX_HISTORY_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum LayerKind {
    Risk,
    Cost,
    Recommendations,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Risk => "risk",
            LayerKind::Cost => "cost",
            LayerKind::Recommendations => "recommendations",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: JsonValue,
}

impl Feature {
    fn new(geometry: Geometry, properties: JsonValue) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry,
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
    pub crs: JsonValue,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features,
            crs: json!({ "type": "name", "properties": { "name": "EPSG:4326" } }),
        }
    }
}

fn on_date(predictions: &[PredictionRow], date: NaiveDate) -> Vec<&PredictionRow> {
    predictions.iter().filter(|row| row.date == date).collect()
}

/// Hexes with probability, band and drivers for `date`.
pub fn risk_layer(
    predictions: &[PredictionRow],
    date: NaiveDate,
    index: &dyn SpatialIndex,
) -> PipelineResult<FeatureCollection> {
    let features = on_date(predictions, date)
        .into_iter()
        .map(|row| {
            Ok(Feature::new(
                Geometry::cell_polygon(index, &row.cell_id)?,
                json!({
                    "cell_id": row.cell_id,
                    "probability": row.probability,
                    "risk_band": row.risk_band,
                    "drivers": row.drivers,
                }),
            ))
        })
        .collect::<PipelineResult<Vec<_>>>()?;
    Ok(FeatureCollection::new(features))
}

pub fn cost_layer(
    predictions: &[PredictionRow],
    date: NaiveDate,
    index: &dyn SpatialIndex,
) -> PipelineResult<FeatureCollection> {
    let features = on_date(predictions, date)
        .into_iter()
        .map(|row| {
            Ok(Feature::new(
                Geometry::cell_polygon(index, &row.cell_id)?,
                json!({
                    "cell_id": row.cell_id,
                    "expected_cost_usd": row.expected_cost_usd,
                    "p90_cost_usd": row.p90_cost_usd,
                }),
            ))
        })
        .collect::<PipelineResult<Vec<_>>>()?;
    Ok(FeatureCollection::new(features))
}

fn recommendation_properties(rec: &RecommendationRow) -> JsonValue {
    json!({
        "rec_id": rec.rec_id,
        "cell_ids": rec.cell_ids,
        "action_type": rec.action_type,
        "delta_p_psi": rec.delta_p_psi,
        "time_window": rec.time_window,
        "expected_savings_usd": rec.expected_savings_usd,
        "rationale": rec.rationale,
    })
}

/// One MultiPolygon feature per persisted cluster recommendation on `date`.
pub fn recommendation_layer(recommendations: &[RecommendationRow], date: NaiveDate) -> FeatureCollection {
    let features = recommendations
        .iter()
        .filter(|rec| rec.date == date)
        .map(|rec| Feature::new(rec.geometry.clone(), recommendation_properties(rec)))
        .collect();
    FeatureCollection::new(features)
}

/// One Polygon feature per high-risk cell on `date`, derived from predictions.
pub fn per_cell_recommendation_layer(
    predictions: &[PredictionRow],
    date: NaiveDate,
    config: &RecommendationConfig,
    index: &dyn SpatialIndex,
) -> PipelineResult<FeatureCollection> {
    let probability: BTreeMap<&CellId, f64> = on_date(predictions, date)
        .into_iter()
        .map(|row| (&row.cell_id, row.probability))
        .collect();
    let features = per_cell_recommendations(predictions, date, config, index)?
        .into_iter()
        .map(|rec| {
            let mut properties = recommendation_properties(&rec);
            if let (Some(cell), Some(map)) = (rec.cell_ids.first(), properties.as_object_mut()) {
                map.insert("cell_id".to_string(), json!(cell));
                if let Some(p) = probability.get(cell) {
                    map.insert("probability".to_string(), json!(p));
                }
            }
            Feature::new(rec.geometry, properties)
        })
        .collect();
    Ok(FeatureCollection::new(features))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub probability: f64,
    pub risk_band: RiskBand,
    pub expected_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellHistory {
    pub cell_id: CellId,
    pub history: Vec<HistoryPoint>,
}

/// The latest `days` predictions for one cell in date order; `days` is clamped to
/// `1..=MAX_HISTORY_DAYS`.
pub fn cell_history(predictions: &[PredictionRow], cell: &CellId, days: u32) -> CellHistory {
    let days = days.clamp(1, MAX_HISTORY_DAYS) as usize;
    let mut rows: Vec<&PredictionRow> = predictions
        .iter()
        .filter(|row| row.cell_id.as_str().trim() == cell.as_str().trim())
        .collect();
    rows.sort_by_key(|row| row.date);
    let skip = rows.len().saturating_sub(days);
    CellHistory {
        cell_id: cell.clone(),
        history: rows
            .into_iter()
            .skip(skip)
            .map(|row| HistoryPoint {
                date: row.date,
                probability: row.probability,
                risk_band: row.risk_band,
                expected_cost_usd: row.expected_cost_usd,
            })
            .collect(),
    }
}
