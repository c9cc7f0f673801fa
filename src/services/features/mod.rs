//! Grid & label builder: sparse events plus daily weather into a dense cell-day table.
//!
//! Every feature at date `t` reads only event days `< t` and same-day weather; the label
//! reads only `(t, t + H]`. Cells that never produced an event are not part of the grid.

mod grid;
pub mod weather;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::GridConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ids::CellId;
use crate::spatial::SpatialIndex;
use crate::time::{dates_inclusive, day_of, shift_days};

pub use weather::{derive_stressors, WeatherRecord, WeatherStressors};

use grid::{
    decay_weights, CountMatrix, LOOKBACK_DAYS, MEDIUM_WINDOW_DAYS, SHORT_WINDOW_DAYS,
};

/// A leak-related occurrence attributed to one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub category: String,
    pub cell_id: CellId,
}

/// Point observation as delivered by ingestion, before cell assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPoint {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub category: String,
    pub lat: f64,
    pub lon: f64,
}

/// Maps points onto grid cells; points without finite coordinates are dropped.
pub fn assign_cells(points: &[EventPoint], index: &dyn SpatialIndex) -> Vec<EventRecord> {
    let events: Vec<EventRecord> = points
        .iter()
        .filter(|point| point.lat.is_finite() && point.lon.is_finite())
        .map(|point| EventRecord {
            created_at: point.created_at,
            closed_at: point.closed_at,
            category: point.category.clone(),
            cell_id: index.cell_at(point.lat, point.lon),
        })
        .collect();
    let dropped = points.len() - events.len();
    if dropped > 0 {
        tracing::warn!(dropped, "event points without usable coordinates skipped");
    }
    events
}

/// One (date, cell) row of the feature/label table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub cell_id: CellId,
    pub cnt_7d: f64,
    pub cnt_30d: f64,
    pub decay: f64,
    pub freeze: f64,
    pub temp_drop_c: f64,
    pub precip_mm: f64,
    pub heavy_rain: f64,
    pub freeze_x_cnt_30d: f64,
    /// 1 when at least one event lands in `(date, date + H]`; absent on tables built
    /// for inference only.
    #[serde(default)]
    pub y_event: Option<u8>,
}

impl FeatureRow {
    /// Feature value by column name; unknown names read as zero.
    pub fn value_of(&self, name: &str) -> f64 {
        match name {
            "cnt_7d" => self.cnt_7d,
            "cnt_30d" => self.cnt_30d,
            "decay" => self.decay,
            "freeze" => self.freeze,
            "temp_drop_c" => self.temp_drop_c,
            "precip_mm" => self.precip_mm,
            "heavy_rain" => self.heavy_rain,
            "freeze_x_cnt_30d" => self.freeze_x_cnt_30d,
            _ => 0.0,
        }
    }
}

/// First feature date whose label window reaches past `end`; rows from here on are
/// right-censored and should stay out of training.
pub fn censored_tail_start(end: NaiveDate, horizon_days: u32) -> NaiveDate {
    shift_days(end, 1 - i64::from(horizon_days.max(1)))
}

fn accepts_category(config: &GridConfig, category: &str) -> bool {
    config.categories.is_empty()
        || config
            .categories
            .iter()
            .any(|allowed| allowed.trim().eq_ignore_ascii_case(category.trim()))
}

/// Per-(cell, day) event counts, flooring creation timestamps to their UTC day.
pub fn events_per_cell_day(
    events: &[EventRecord],
    config: &GridConfig,
) -> BTreeMap<CellId, BTreeMap<NaiveDate, u32>> {
    let mut out: BTreeMap<CellId, BTreeMap<NaiveDate, u32>> = BTreeMap::new();
    for event in events {
        if !accepts_category(config, &event.category) {
            continue;
        }
        *out.entry(event.cell_id.clone())
            .or_default()
            .entry(day_of(event.created_at))
            .or_insert(0) += 1;
    }
    out
}

/// Builds the dense `(date, cell)` table for `start..=end`, ordered by date then cell.
pub fn build_cell_day_features(
    events: &[EventRecord],
    weather: &[WeatherRecord],
    start: NaiveDate,
    end: NaiveDate,
    config: &GridConfig,
) -> PipelineResult<Vec<FeatureRow>> {
    if start > end {
        return Err(PipelineError::InvalidDateRange { start, end });
    }
    let daily = events_per_cell_day(events, config);
    if daily.is_empty() {
        tracing::info!(events = events.len(), "no qualifying events; feature table is empty");
        return Ok(Vec::new());
    }

    let horizon = config.horizon_days.max(1) as usize;
    let dates = dates_inclusive(start, end);
    let origin = shift_days(start, -(LOOKBACK_DAYS as i64));
    let last_day = shift_days(end, horizon as i64);
    let matrix = CountMatrix::new(&daily, origin, last_day);
    let days = matrix.index_of(start)..matrix.index_of(start) + dates.len();
    let weights = decay_weights(config.decay_half_life_days);

    let stressors = derive_stressors(weather, config.heavy_rain_mm);
    let same_day: Vec<WeatherStressors> = dates
        .iter()
        .map(|date| stressors.get(date).copied().unwrap_or_default())
        .collect();

    struct CellColumns<'a> {
        cell: &'a CellId,
        cnt_7d: Vec<f64>,
        cnt_30d: Vec<f64>,
        decay: Vec<f64>,
        future: Vec<f64>,
    }

    let columns: Vec<CellColumns<'_>> = matrix
        .cells()
        .map(|(cell, series)| CellColumns {
            cell,
            cnt_7d: series.trailing_sums(days.clone(), SHORT_WINDOW_DAYS),
            cnt_30d: series.trailing_sums(days.clone(), MEDIUM_WINDOW_DAYS),
            decay: series.decayed(days.clone(), &weights),
            future: series.forward_sums(days.clone(), horizon),
        })
        .collect();

    let mut rows = Vec::with_capacity(dates.len() * columns.len());
    for (day_idx, date) in dates.iter().enumerate() {
        let weather = same_day[day_idx];
        for column in &columns {
            let cnt_30d = column.cnt_30d[day_idx];
            rows.push(FeatureRow {
                date: *date,
                cell_id: column.cell.clone(),
                cnt_7d: column.cnt_7d[day_idx],
                cnt_30d,
                decay: column.decay[day_idx],
                freeze: weather.freeze,
                temp_drop_c: weather.temp_drop_c,
                precip_mm: weather.precip_mm,
                heavy_rain: weather.heavy_rain,
                freeze_x_cnt_30d: weather.freeze * cnt_30d,
                y_event: Some(u8::from(column.future[day_idx] >= 1.0)),
            });
        }
    }

    tracing::info!(
        %start,
        %end,
        cells = matrix.cell_count(),
        dates = dates.len(),
        rows = rows.len(),
        horizon_days = horizon,
        "built cell-day features"
    );
    Ok(rows)
}
