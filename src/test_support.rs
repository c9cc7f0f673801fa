use anyhow::Result;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use crate::config::{GridConfig, PipelineConfig, RiskBands};
use crate::ids::CellId;
use crate::services::features::{EventRecord, FeatureRow, WeatherRecord};
use crate::services::pricing::PredictionRow;
use crate::spatial::HexLattice;
use crate::store::{TableName, TableStore};
use crate::time::shift_days;

/// Day `n` of the fixture calendar; day 1 is 2026-01-01.
pub fn day(n: i64) -> NaiveDate {
    let origin = NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid origin");
    shift_days(origin, n - 1)
}

pub fn event_on(cell: &str, n: i64, category: &str) -> EventRecord {
    let created_at = Utc.from_utc_datetime(&day(n).and_hms_opt(12, 0, 0).expect("valid time"));
    EventRecord {
        created_at,
        closed_at: None,
        category: category.to_string(),
        cell_id: CellId::new(cell),
    }
}

pub fn grid_config(horizon_days: u32) -> GridConfig {
    GridConfig {
        horizon_days,
        ..GridConfig::default()
    }
}

pub fn lattice() -> HexLattice {
    HexLattice::new(41.8781, -87.6298, 174.0)
}

pub fn test_config(data_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config
}

pub fn feature_row(cell: &str, n: i64, cnt_30d: f64, y_event: Option<u8>) -> FeatureRow {
    FeatureRow {
        date: day(n),
        cell_id: CellId::new(cell),
        cnt_7d: (cnt_30d / 3.0).floor(),
        cnt_30d,
        decay: cnt_30d * 0.4,
        freeze: 0.0,
        temp_drop_c: 0.0,
        precip_mm: 0.0,
        heavy_rain: 0.0,
        freeze_x_cnt_30d: 0.0,
        y_event,
    }
}

/// `days × cells` labeled rows whose label mostly follows `cnt_30d`, with a
/// deterministic share of flipped labels.
pub fn synthetic_features(days: i64, cells: usize) -> Vec<FeatureRow> {
    let mut rows = Vec::new();
    for n in 1..=days {
        for c in 0..cells {
            let cnt_30d = ((n as usize * 7 + c * 3) % 10) as f64;
            let flipped = (n as usize + c) % 9 == 0;
            let label = u8::from(cnt_30d >= 6.0) ^ u8::from(flipped);
            let mut row = feature_row(&format!("0:{c}"), n, cnt_30d, Some(label));
            row.decay += (n % 3) as f64 * 0.1;
            row.freeze = if n % 5 == 0 { 1.0 } else { 0.0 };
            row.freeze_x_cnt_30d = row.freeze * cnt_30d;
            row.temp_drop_c = (n % 7) as f64 - 3.0;
            row.precip_mm = (n % 4) as f64 * 3.0;
            rows.push(row);
        }
    }
    rows
}

pub fn prediction(cell: &str, n: i64, probability: f64, expected_cost_usd: f64) -> PredictionRow {
    PredictionRow {
        date: day(n),
        cell_id: CellId::new(cell),
        probability,
        risk_score: probability,
        risk_band: RiskBands::default().band_of(probability),
        drivers: Vec::new(),
        expected_cost_usd,
        p90_cost_usd: expected_cost_usd * 1.5,
    }
}

/// Seeds raw event and weather tables for days `1..=days`: an adjacent trio of busy
/// cells plus two quiet, isolated ones.
pub fn seeded_raw_tables<S: TableStore>(store: &mut S, days: i64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let cells = [
        ("0:0", 0.35),
        ("1:0", 0.3),
        ("0:1", 0.3),
        ("5:5", 0.05),
        ("8:-3", 0.05),
    ];
    let mut events = Vec::new();
    let mut weather = Vec::new();
    for n in 1..=days {
        for (cell, rate) in cells {
            if rng.gen_bool(rate) {
                let mut event = event_on(cell, n, "Water On Street Complaint");
                if rng.gen_bool(0.8) {
                    event.closed_at = Some(event.created_at + Duration::hours(rng.gen_range(1..200)));
                }
                events.push(event);
            }
        }
        weather.push(WeatherRecord {
            date: day(n),
            tmin_c: -5.0 + (n % 10) as f64,
            tmax_c: 5.0 + (n % 10) as f64,
            tavg_c: (n % 10) as f64,
            precip_mm: ((n % 6) * 6) as f64,
        });
    }
    store.put(TableName::RawEvents, &events)?;
    store.put(TableName::Weather, &weather)?;
    Ok(())
}
