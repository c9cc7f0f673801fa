//! Spatial adjacency provider seam.
//!
//! The pipeline never computes cell geometry itself; it asks a [`SpatialIndex`] for
//! point-to-cell mapping, cell boundaries and k-ring neighborhoods. [`HexLattice`] is a
//! self-contained planar hexagon grid used for offline runs and tests.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::ids::CellId;

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// A `(lon, lat)` vertex, GeoJSON order.
pub type Position = [f64; 2];

pub trait SpatialIndex {
    fn cell_at(&self, lat: f64, lon: f64) -> CellId;

    /// Closed ring of `(lon, lat)` vertices; the first vertex is repeated at the end.
    fn boundary_of(&self, cell: &CellId) -> PipelineResult<Vec<Position>>;

    /// Cells within `k` adjacency steps, including `cell` itself.
    fn neighbors_within(&self, cell: &CellId, k: u32) -> PipelineResult<Vec<CellId>>;
}

/// GeoJSON geometry as emitted by the recommendation and layer stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub fn cell_polygon(index: &dyn SpatialIndex, cell: &CellId) -> PipelineResult<Self> {
        Ok(Self::Polygon(vec![index.boundary_of(cell)?]))
    }

    /// Union of member cell boundaries, one polygon per cell.
    pub fn cells_multipolygon(index: &dyn SpatialIndex, cells: &[CellId]) -> PipelineResult<Self> {
        let polygons = cells
            .iter()
            .map(|cell| index.boundary_of(cell).map(|ring| vec![ring]))
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self::MultiPolygon(polygons))
    }
}

/// Pointy-top hexagon lattice in axial coordinates, projected equirectangularly around
/// an origin. Cell ids are `"{q}:{r}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexLattice {
    pub origin_lat: f64,
    pub origin_lon: f64,
    /// Circumradius of one hexagon, in meters.
    pub hex_size_m: f64,
}

impl HexLattice {
    pub fn new(origin_lat: f64, origin_lon: f64, hex_size_m: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            hex_size_m,
        }
    }

    pub fn cell_id(q: i64, r: i64) -> CellId {
        CellId::new(format!("{q}:{r}"))
    }

    pub fn axial(cell: &CellId) -> PipelineResult<(i64, i64)> {
        let invalid = || PipelineError::InvalidCell(cell.to_string());
        let (q, r) = cell.as_str().trim().split_once(':').ok_or_else(invalid)?;
        let q = q.trim().parse::<i64>().map_err(|_| invalid())?;
        let r = r.trim().parse::<i64>().map_err(|_| invalid())?;
        Ok((q, r))
    }

    fn meters_per_degree_lon(&self) -> f64 {
        (METERS_PER_DEGREE_LAT * self.origin_lat.to_radians().cos()).max(1e-6)
    }

    fn size(&self) -> f64 {
        if self.hex_size_m.is_finite() && self.hex_size_m > 0.0 {
            self.hex_size_m
        } else {
            1.0
        }
    }

    fn to_plane(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.origin_lon) * self.meters_per_degree_lon();
        let y = (lat - self.origin_lat) * METERS_PER_DEGREE_LAT;
        (x, y)
    }

    fn to_lon_lat(&self, x: f64, y: f64) -> Position {
        [
            self.origin_lon + x / self.meters_per_degree_lon(),
            self.origin_lat + y / METERS_PER_DEGREE_LAT,
        ]
    }
}

fn cube_round(q: f64, r: f64) -> (i64, i64) {
    let s = -q - r;
    let mut rq = q.round();
    let mut rr = r.round();
    let rs = s.round();
    let dq = (rq - q).abs();
    let dr = (rr - r).abs();
    let ds = (rs - s).abs();
    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    (rq as i64, rr as i64)
}

impl SpatialIndex for HexLattice {
    fn cell_at(&self, lat: f64, lon: f64) -> CellId {
        let (x, y) = self.to_plane(lat, lon);
        let size = self.size();
        let q = (3f64.sqrt() / 3.0 * x - y / 3.0) / size;
        let r = (2.0 / 3.0 * y) / size;
        let (q, r) = cube_round(q, r);
        Self::cell_id(q, r)
    }

    fn boundary_of(&self, cell: &CellId) -> PipelineResult<Vec<Position>> {
        let (q, r) = Self::axial(cell)?;
        let size = self.size();
        let cx = size * (3f64.sqrt() * q as f64 + 3f64.sqrt() / 2.0 * r as f64);
        let cy = size * (1.5 * r as f64);
        let mut ring: Vec<Position> = (0..6)
            .map(|corner| {
                let angle = (60.0 * corner as f64 - 30.0).to_radians();
                self.to_lon_lat(cx + size * angle.cos(), cy + size * angle.sin())
            })
            .collect();
        ring.push(ring[0]);
        Ok(ring)
    }

    fn neighbors_within(&self, cell: &CellId, k: u32) -> PipelineResult<Vec<CellId>> {
        let (q, r) = Self::axial(cell)?;
        let k = k as i64;
        let mut out = Vec::new();
        for dq in -k..=k {
            let lo = (-k).max(-dq - k);
            let hi = k.min(-dq + k);
            for dr in lo..=hi {
                out.push(Self::cell_id(q + dq, r + dr));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice() -> HexLattice {
        HexLattice::new(41.8781, -87.6298, 174.0)
    }

    #[test]
    fn one_ring_has_seven_cells_including_self() {
        let grid = lattice();
        let center = HexLattice::cell_id(2, -1);
        let ring = grid.neighbors_within(&center, 1).unwrap();
        assert_eq!(ring.len(), 7);
        assert!(ring.contains(&center));
        assert!(ring.contains(&HexLattice::cell_id(3, -1)));
        assert!(ring.contains(&HexLattice::cell_id(2, 0)));
        assert!(!ring.contains(&HexLattice::cell_id(4, -1)));
        assert_eq!(grid.neighbors_within(&center, 2).unwrap().len(), 19);
    }

    #[test]
    fn cell_center_maps_back_to_its_cell() {
        let grid = lattice();
        for cell in [
            HexLattice::cell_id(0, 0),
            HexLattice::cell_id(5, -3),
            HexLattice::cell_id(-4, 7),
        ] {
            let ring = grid.boundary_of(&cell).unwrap();
            assert_eq!(ring.len(), 7);
            assert_eq!(ring.first(), ring.last());
            let lon = ring[..6].iter().map(|p| p[0]).sum::<f64>() / 6.0;
            let lat = ring[..6].iter().map(|p| p[1]).sum::<f64>() / 6.0;
            assert_eq!(grid.cell_at(lat, lon), cell);
        }
    }

    #[test]
    fn rejects_malformed_cell_ids() {
        let grid = lattice();
        let err = grid.boundary_of(&CellId::new("not-a-cell")).unwrap_err();
        assert_eq!(err, PipelineError::InvalidCell("not-a-cell".to_string()));
    }

    #[test]
    fn geometry_serializes_as_geojson() {
        let geometry = Geometry::Polygon(vec![vec![[0.0, 1.0], [1.0, 1.0], [0.0, 1.0]]]);
        let value = serde_json::to_value(&geometry).unwrap();
        assert_eq!(value["type"], "Polygon");
        assert_eq!(value["coordinates"][0][1][0], 1.0);
    }
}
