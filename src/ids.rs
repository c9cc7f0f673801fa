use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one hexagonal grid cell, as issued by the spatial index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub String);

impl CellId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{date}_{index}`; the index is the cluster's position within its date for one run.
pub(crate) fn cluster_rec_id(date: NaiveDate, index: usize) -> String {
    format!("{}_{index}", date.format("%Y-%m-%d"))
}

pub(crate) fn cell_rec_id(cell: &CellId, date: NaiveDate) -> String {
    format!("{}_{}", cell.as_str().trim(), date.format("%Y-%m-%d"))
}
