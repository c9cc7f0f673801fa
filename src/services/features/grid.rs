use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::ops::Range;

use crate::ids::CellId;
use crate::time::day_offset;

pub(crate) const SHORT_WINDOW_DAYS: usize = 7;
pub(crate) const MEDIUM_WINDOW_DAYS: usize = 30;
pub(crate) const DECAY_LAGS: usize = 30;

/// Days of history before the first feature date that trailing windows can reach.
pub(crate) const LOOKBACK_DAYS: usize = if MEDIUM_WINDOW_DAYS > DECAY_LAGS {
    MEDIUM_WINDOW_DAYS
} else {
    DECAY_LAGS
};

/// `w_k = 0.5^(k / half_life)` for lags `k = 1..=DECAY_LAGS`.
pub(crate) fn decay_weights(half_life_days: f64) -> Vec<f64> {
    (1..=DECAY_LAGS)
        .map(|k| 0.5f64.powf(k as f64 / half_life_days))
        .collect()
}

/// Dense per-day event counts for one cell over the matrix day axis, with prefix sums
/// so that any window sum is a single subtraction.
#[derive(Debug, Clone)]
pub(crate) struct CellSeries {
    counts: Vec<f64>,
    prefix: Vec<f64>,
}

impl CellSeries {
    fn new(counts: Vec<f64>) -> Self {
        let mut prefix = Vec::with_capacity(counts.len() + 1);
        prefix.push(0.0);
        let mut running = 0.0;
        for value in &counts {
            running += value;
            prefix.push(running);
        }
        Self { counts, prefix }
    }

    fn window_sum(&self, from: usize, to: usize) -> f64 {
        let to = to.min(self.counts.len());
        let from = from.min(to);
        self.prefix[to] - self.prefix[from]
    }

    /// Sum over `[i - window, i)` for every day index `i` in `days`; day `i` itself is
    /// never included.
    pub(crate) fn trailing_sums(&self, days: Range<usize>, window: usize) -> Vec<f64> {
        days.map(|i| self.window_sum(i.saturating_sub(window), i))
            .collect()
    }

    /// Sum over `(i, i + horizon]` for every day index `i` in `days`.
    pub(crate) fn forward_sums(&self, days: Range<usize>, horizon: usize) -> Vec<f64> {
        days.map(|i| self.window_sum(i + 1, i + 1 + horizon))
            .collect()
    }

    /// `Σ_k weights[k-1] × counts[i - k]`, accumulated one lag at a time across the
    /// whole day range.
    pub(crate) fn decayed(&self, days: Range<usize>, weights: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; days.len()];
        for (lag_idx, weight) in weights.iter().enumerate() {
            let lag = lag_idx + 1;
            for (slot, i) in out.iter_mut().zip(days.clone()) {
                if i >= lag {
                    *slot += weight * self.counts[i - lag];
                }
            }
        }
        out
    }
}

/// Cell × day count matrix anchored at `origin`.
#[derive(Debug, Clone)]
pub(crate) struct CountMatrix {
    origin: NaiveDate,
    cells: Vec<(CellId, CellSeries)>,
}

impl CountMatrix {
    /// Lays out `daily` counts on the day axis `origin..=last_day`; counts outside the
    /// axis can never affect a feature or label and are dropped.
    pub(crate) fn new(
        daily: &BTreeMap<CellId, BTreeMap<NaiveDate, u32>>,
        origin: NaiveDate,
        last_day: NaiveDate,
    ) -> Self {
        let days = (day_offset(origin, last_day) + 1).max(0) as usize;
        let cells = daily
            .iter()
            .map(|(cell, per_day)| {
                let mut counts = vec![0.0; days];
                for (date, count) in per_day {
                    let offset = day_offset(origin, *date);
                    if offset >= 0 && (offset as usize) < days {
                        counts[offset as usize] += f64::from(*count);
                    }
                }
                (cell.clone(), CellSeries::new(counts))
            })
            .collect();
        Self { origin, cells }
    }

    pub(crate) fn index_of(&self, date: NaiveDate) -> usize {
        day_offset(self.origin, date).max(0) as usize
    }

    pub(crate) fn cells(&self) -> impl Iterator<Item = &(CellId, CellSeries)> {
        self.cells.iter()
    }

    pub(crate) fn cell_count(&self) -> usize {
        self.cells.len()
    }
}
