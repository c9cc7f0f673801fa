//! Risk probability to monetary exposure.
//!
//! Expected leak volume drives both pumping energy (`ρ g H V / η`) and lost treated
//! water; the tail estimate reprices a scaled-up volume with the same formula.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::ids::CellId;
use crate::services::features::EventRecord;
use crate::services::risk_model::{Driver, RiskBand, RiskScore};
use crate::services::stats::quantile;
use crate::time::hours_between;

const JOULES_PER_KWH: f64 = 3.6e6;

/// Probability of each severity class given an event; weights sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityMixture {
    pub minor: f64,
    pub moderate: f64,
    pub major: f64,
}

impl Default for SeverityMixture {
    fn default() -> Self {
        Self {
            minor: 0.6,
            moderate: 0.3,
            major: 0.1,
        }
    }
}

impl SeverityMixture {
    pub fn weights(&self) -> [f64; 3] {
        [self.minor, self.moderate, self.major]
    }

    /// Share of each severity class among `severities` (values 1, 2, 3); `None` when
    /// nothing is classified.
    pub fn from_severities(severities: &[u8]) -> Option<Self> {
        let mut counts = [0usize; 3];
        for severity in severities {
            if let Some(slot) = (*severity as usize).checked_sub(1).and_then(|i| counts.get_mut(i)) {
                *slot += 1;
            }
        }
        let total: usize = counts.iter().sum();
        if total == 0 {
            return None;
        }
        let share = |count: usize| count as f64 / total as f64;
        Some(Self {
            minor: share(counts[0]),
            moderate: share(counts[1]),
            major: share(counts[2]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub expected_usd: f64,
    pub p90_usd: f64,
}

/// `p × Σ wᵢ vᵢ`, never negative.
pub fn expected_volume_m3(probability: f64, mixture: &SeverityMixture, config: &PricingConfig) -> f64 {
    let per_event: f64 = mixture
        .weights()
        .iter()
        .zip(config.volumes_m3.iter())
        .map(|(w, v)| w * v)
        .sum();
    let volume = probability * per_event;
    if volume.is_finite() {
        volume.max(0.0)
    } else {
        0.0
    }
}

pub fn energy_waste_kwh(volume_m3: f64, config: &PricingConfig) -> f64 {
    let work_j = config.water_density_kg_m3 * config.gravity_m_s2 * config.head_m * volume_m3;
    work_j / (JOULES_PER_KWH * config.pump_efficiency)
}

fn volume_cost_usd(volume_m3: f64, usd_per_kwh: f64, config: &PricingConfig) -> f64 {
    energy_waste_kwh(volume_m3, config) * usd_per_kwh + volume_m3 * config.water_usd_per_m3
}

pub fn expected_cost(
    probability: f64,
    mixture: &SeverityMixture,
    usd_per_kwh: f64,
    config: &PricingConfig,
) -> CostEstimate {
    let volume = expected_volume_m3(probability, mixture, config);
    CostEstimate {
        expected_usd: volume_cost_usd(volume, usd_per_kwh, config),
        p90_usd: volume_cost_usd(volume * config.tail_volume_multiplier, usd_per_kwh, config),
    }
}

/// Severity class per closed event from its resolution time: at or below the 60th
/// percentile is 1, at or below the 90th is 2, above is 3. Open events and negative
/// durations are skipped.
pub fn severity_from_durations(events: &[EventRecord]) -> Vec<u8> {
    let durations: Vec<f64> = events
        .iter()
        .filter_map(|event| {
            let closed = event.closed_at?;
            let hours = hours_between(event.created_at, closed);
            (hours >= 0.0).then_some(hours)
        })
        .collect();
    let (Some(q60), Some(q90)) = (quantile(&durations, 0.6), quantile(&durations, 0.9)) else {
        return Vec::new();
    };
    durations
        .iter()
        .map(|d| {
            if *d <= q60 {
                1
            } else if *d <= q90 {
                2
            } else {
                3
            }
        })
        .collect()
}

/// Severity mixture for a run: derived from resolution times when enabled and any
/// closed event exists, otherwise the default mixture.
pub fn severity_mixture_for(events: &[EventRecord], config: &PricingConfig) -> SeverityMixture {
    if !config.derive_severity_from_durations {
        return SeverityMixture::default();
    }
    match SeverityMixture::from_severities(&severity_from_durations(events)) {
        Some(mixture) => {
            tracing::info!(
                minor = mixture.minor,
                moderate = mixture.moderate,
                major = mixture.major,
                "severity mixture derived from resolution durations"
            );
            mixture
        }
        None => {
            tracing::debug!("no closed events; using default severity mixture");
            SeverityMixture::default()
        }
    }
}

/// Scored and priced (date, cell) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub date: NaiveDate,
    pub cell_id: CellId,
    pub probability: f64,
    pub risk_score: f64,
    pub risk_band: RiskBand,
    #[serde(with = "crate::json")]
    pub drivers: Vec<Driver>,
    pub expected_cost_usd: f64,
    pub p90_cost_usd: f64,
}

pub fn price_predictions(
    scores: Vec<RiskScore>,
    mixture: &SeverityMixture,
    usd_per_kwh: f64,
    config: &PricingConfig,
) -> Vec<PredictionRow> {
    let rows: Vec<PredictionRow> = scores
        .into_iter()
        .map(|score| {
            let cost = expected_cost(score.probability, mixture, usd_per_kwh, config);
            PredictionRow {
                date: score.date,
                cell_id: score.cell_id,
                probability: score.probability,
                risk_score: score.risk_score,
                risk_band: score.risk_band,
                drivers: score.drivers,
                expected_cost_usd: cost.expected_usd,
                p90_cost_usd: cost.p90_usd,
            }
        })
        .collect();
    tracing::debug!(rows = rows.len(), usd_per_kwh, "predictions priced");
    rows
}
