//! High-risk cells to pressure-management actions.
//!
//! Candidates above the risk threshold are grouped into connected components of the
//! 1-ring adjacency graph; each component gets the pressure reduction that maximizes
//! `savings(Δ) = L × (1 − ((P − Δ)/P)^n)` where `L` is the summed expected cost.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::RecommendationConfig;
use crate::error::PipelineResult;
use crate::ids::{cell_rec_id, cluster_rec_id, CellId};
use crate::services::pricing::PredictionRow;
use crate::spatial::{Geometry, SpatialIndex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRow {
    pub date: NaiveDate,
    pub rec_id: String,
    #[serde(with = "crate::json")]
    pub cell_ids: Vec<CellId>,
    #[serde(with = "crate::json")]
    pub geometry: Geometry,
    pub action_type: String,
    pub delta_p_psi: f64,
    pub time_window: String,
    pub expected_savings_usd: f64,
    pub rationale: String,
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Expected savings of lowering pressure by `delta_psi` on a cluster with expected
/// loss `loss_usd`. Zero when the reduction would cross the pressure floor.
pub fn savings(loss_usd: f64, delta_psi: f64, config: &RecommendationConfig) -> f64 {
    let base = config.base_pressure_psi;
    if base <= 0.0 || delta_psi <= 0.0 || base - delta_psi < config.min_pressure_psi {
        return 0.0;
    }
    let reduction = 1.0 - ((base - delta_psi) / base).powf(config.elasticity);
    loss_usd * reduction
}

/// Strictly-best candidate reduction; `None` when no candidate saves anything.
pub fn best_action(loss_usd: f64, config: &RecommendationConfig) -> Option<(f64, f64)> {
    let mut best: Option<(f64, f64)> = None;
    for delta in &config.candidate_reductions_psi {
        let value = savings(loss_usd, *delta, config);
        if value > best.map(|(_, s)| s).unwrap_or(0.0) {
            best = Some((*delta, value));
        }
    }
    best
}

/// Connected components of `cells` under `k`-ring adjacency. Components come out in
/// order of their first member in `cells`; members in traversal order.
pub fn cluster_adjacent(
    cells: &[CellId],
    index: &dyn SpatialIndex,
    k: u32,
) -> PipelineResult<Vec<Vec<CellId>>> {
    let candidates: BTreeSet<&CellId> = cells.iter().collect();
    let mut seen: BTreeSet<CellId> = BTreeSet::new();
    let mut clusters = Vec::new();
    for start in cells {
        if seen.contains(start) {
            continue;
        }
        let mut cluster = Vec::new();
        let mut stack = vec![start.clone()];
        while let Some(cell) = stack.pop() {
            if !seen.insert(cell.clone()) {
                continue;
            }
            for neighbor in index.neighbors_within(&cell, k)? {
                if candidates.contains(&neighbor) && !seen.contains(&neighbor) {
                    stack.push(neighbor);
                }
            }
            cluster.push(cell);
        }
        clusters.push(cluster);
    }
    Ok(clusters)
}

fn rows_by_date(predictions: &[PredictionRow]) -> BTreeMap<NaiveDate, Vec<&PredictionRow>> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&PredictionRow>> = BTreeMap::new();
    for row in predictions {
        by_date.entry(row.date).or_default().push(row);
    }
    by_date
}

fn is_candidate(row: &PredictionRow, config: &RecommendationConfig) -> bool {
    row.probability.is_finite() && row.probability >= config.risk_threshold
}

/// One recommendation per qualifying cluster per date, dates ascending.
pub fn build_recommendations(
    predictions: &[PredictionRow],
    config: &RecommendationConfig,
    index: &dyn SpatialIndex,
) -> PipelineResult<Vec<RecommendationRow>> {
    let mut out = Vec::new();
    for (date, rows) in rows_by_date(predictions) {
        let mut cost_by_cell: BTreeMap<&CellId, f64> = BTreeMap::new();
        for row in &rows {
            *cost_by_cell.entry(&row.cell_id).or_insert(0.0) += row.expected_cost_usd;
        }
        let candidates: BTreeSet<CellId> = rows
            .iter()
            .filter(|row| is_candidate(row, config))
            .map(|row| row.cell_id.clone())
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let ordered: Vec<CellId> = candidates.into_iter().collect();
        let clusters = cluster_adjacent(&ordered, index, config.adjacency_ring)?;

        let mut skipped = 0usize;
        for (idx, cluster) in clusters.iter().enumerate() {
            let loss: f64 = cluster
                .iter()
                .map(|cell| cost_by_cell.get(cell).copied().unwrap_or(0.0))
                .sum();
            let Some((delta, best)) = best_action(loss, config) else {
                skipped += 1;
                continue;
            };
            out.push(RecommendationRow {
                date,
                rec_id: cluster_rec_id(date, idx),
                cell_ids: cluster.clone(),
                geometry: Geometry::cells_multipolygon(index, cluster)?,
                action_type: config.action_type.clone(),
                delta_p_psi: delta,
                time_window: config.time_window.clone(),
                expected_savings_usd: round_cents(best),
                rationale: config.rationale.clone(),
            });
        }
        tracing::debug!(
            %date,
            candidates = ordered.len(),
            clusters = clusters.len(),
            skipped,
            "clustered high-risk cells"
        );
    }
    tracing::info!(recommendations = out.len(), "recommendations built");
    Ok(out)
}

/// One fixed action per qualifying cell on `date`, priced as a share of that cell's
/// expected cost.
pub fn per_cell_recommendations(
    predictions: &[PredictionRow],
    date: NaiveDate,
    config: &RecommendationConfig,
    index: &dyn SpatialIndex,
) -> PipelineResult<Vec<RecommendationRow>> {
    let mut rows: Vec<&PredictionRow> = predictions
        .iter()
        .filter(|row| row.date == date && is_candidate(row, config))
        .collect();
    rows.sort_by(|a, b| a.cell_id.cmp(&b.cell_id));
    rows.dedup_by(|a, b| a.cell_id == b.cell_id);

    rows.into_iter()
        .map(|row| {
            Ok(RecommendationRow {
                date,
                rec_id: cell_rec_id(&row.cell_id, date),
                cell_ids: vec![row.cell_id.clone()],
                geometry: Geometry::cell_polygon(index, &row.cell_id)?,
                action_type: config.action_type.clone(),
                delta_p_psi: config.per_cell_reduction_psi,
                time_window: config.time_window.clone(),
                expected_savings_usd: round_cents(
                    row.expected_cost_usd.max(0.0) * config.per_cell_savings_fraction,
                ),
                rationale: config.rationale.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::HexLattice;
    use crate::test_support::{day, lattice, prediction};

    fn config() -> RecommendationConfig {
        RecommendationConfig::default()
    }

    #[test]
    fn savings_grow_with_reduction_until_the_floor() {
        let cfg = config();
        let mut previous = 0.0;
        for delta in [1.0, 3.0, 5.0, 8.0, 20.0, 40.0] {
            let value = savings(100.0, delta, &cfg);
            assert!(value > previous, "delta {delta}");
            previous = value;
        }
        assert_eq!(savings(100.0, 40.5, &cfg), 0.0);
        assert_eq!(savings(100.0, 0.0, &cfg), 0.0);
        assert_eq!(savings(100.0, -2.0, &cfg), 0.0);
        assert!((savings(100.0, 6.0, &cfg) - 10.0).abs() < 1e-9);

        let mut no_base = cfg.clone();
        no_base.base_pressure_psi = 0.0;
        assert_eq!(savings(100.0, 3.0, &no_base), 0.0);
    }

    #[test]
    fn best_action_picks_the_largest_feasible_reduction() {
        let cfg = config();
        let (delta, value) = best_action(50.0, &cfg).unwrap();
        assert_eq!(delta, 8.0);
        assert!((value - 50.0 * 8.0 / 60.0).abs() < 1e-9);
        assert!(best_action(0.0, &cfg).is_none());

        let mut tight = cfg.clone();
        tight.min_pressure_psi = 55.0;
        assert_eq!(best_action(50.0, &tight).map(|(d, _)| d), Some(5.0));
    }

    #[test]
    fn disjoint_groups_become_disjoint_clusters() -> anyhow::Result<()> {
        let grid = lattice();
        let a = [HexLattice::cell_id(0, 0), HexLattice::cell_id(1, 0), HexLattice::cell_id(1, -1)];
        let b = [HexLattice::cell_id(10, 10), HexLattice::cell_id(10, 11)];
        let cells: Vec<CellId> = a.iter().chain(b.iter()).cloned().collect();

        let clusters = cluster_adjacent(&cells, &grid, 1)?;
        assert_eq!(clusters.len(), 2);
        let first: BTreeSet<_> = clusters[0].iter().cloned().collect();
        let second: BTreeSet<_> = clusters[1].iter().cloned().collect();
        assert_eq!(first, a.iter().cloned().collect());
        assert_eq!(second, b.iter().cloned().collect());
        assert!(first.is_disjoint(&second));
        Ok(())
    }

    #[test]
    fn builds_one_row_per_cluster_with_multipolygon() -> anyhow::Result<()> {
        let grid = lattice();
        let predictions = vec![
            prediction("0:0", 3, 0.8, 40.0),
            prediction("1:0", 3, 0.6, 20.0),
            prediction("9:9", 3, 0.5, 10.0),
            prediction("5:5", 3, 0.1, 99.0),
            prediction("0:0", 4, 0.2, 5.0),
        ];
        let recs = build_recommendations(&predictions, &config(), &grid)?;
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.date == day(3)));
        assert_eq!(recs[0].rec_id, cluster_rec_id(day(3), 0));
        assert_eq!(recs[0].cell_ids.len(), 2);
        assert_eq!(recs[0].delta_p_psi, 8.0);
        assert_eq!(recs[0].expected_savings_usd, round_cents(60.0 * 8.0 / 60.0));
        match &recs[0].geometry {
            Geometry::MultiPolygon(polygons) => assert_eq!(polygons.len(), 2),
            other => panic!("unexpected geometry {other:?}"),
        }
        assert_eq!(recs[1].cell_ids, vec![CellId::new("9:9")]);
        assert_eq!(recs[1].time_window, "01:00-05:00");
        Ok(())
    }

    #[test]
    fn clusters_without_savings_are_skipped_but_keep_their_index() -> anyhow::Result<()> {
        let grid = lattice();
        let predictions = vec![
            prediction("0:0", 1, 0.9, 0.0),
            prediction("7:7", 1, 0.9, 12.0),
        ];
        let recs = build_recommendations(&predictions, &config(), &grid)?;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].rec_id, cluster_rec_id(day(1), 1));
        Ok(())
    }

    #[test]
    fn empty_predictions_produce_no_recommendations() -> anyhow::Result<()> {
        assert!(build_recommendations(&[], &config(), &lattice())?.is_empty());
        Ok(())
    }

    #[test]
    fn per_cell_mode_uses_fixed_action_and_cost_share() -> anyhow::Result<()> {
        let grid = lattice();
        let predictions = vec![
            prediction("0:0", 2, 0.7, 33.333),
            prediction("0:1", 2, 0.1, 50.0),
            prediction("0:0", 3, 0.9, 10.0),
        ];
        let recs = per_cell_recommendations(&predictions, day(2), &config(), &grid)?;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].rec_id, cell_rec_id(&CellId::new("0:0"), day(2)));
        assert_eq!(recs[0].delta_p_psi, 5.0);
        assert_eq!(recs[0].expected_savings_usd, 3.33);
        assert!(matches!(recs[0].geometry, Geometry::Polygon(_)));
        Ok(())
    }
}
