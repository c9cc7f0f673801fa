use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Well-known logical table names shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableName {
    RawEvents,
    Weather,
    Features,
    Predictions,
    Recommendations,
}

impl TableName {
    pub const ALL: [TableName; 5] = [
        Self::RawEvents,
        Self::Weather,
        Self::Features,
        Self::Predictions,
        Self::Recommendations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawEvents => "raw_events",
            Self::Weather => "weather_daily",
            Self::Features => "cell_day_features",
            Self::Predictions => "cell_day_predictions",
            Self::Recommendations => "recommendations",
        }
    }
}

/// Get/put-by-name table persistence.
///
/// `put` replaces the whole table; readers never observe a partially written table.
/// A table that was never written reads as empty.
pub trait TableStore {
    fn get<T: DeserializeOwned>(&self, table: TableName) -> Result<Vec<T>>;
    fn put<T: Serialize>(&mut self, table: TableName, rows: &[T]) -> Result<()>;
}

pub(crate) fn encode_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush csv buffer: {err}"))
}

pub(crate) fn decode_csv<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();
    for (idx, record) in reader.deserialize().enumerate() {
        let row: T = record.with_context(|| format!("failed to decode csv row {}", idx + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Reads a standalone CSV file with a header row.
pub fn read_csv_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode_csv(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

/// In-process store; rows go through the same CSV encoding as the on-disk store.
#[derive(Debug, Default, Clone)]
pub struct MemoryTableStore {
    tables: BTreeMap<TableName, Vec<u8>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, table: TableName) -> bool {
        self.tables.contains_key(&table)
    }
}

impl TableStore for MemoryTableStore {
    fn get<T: DeserializeOwned>(&self, table: TableName) -> Result<Vec<T>> {
        match self.tables.get(&table) {
            Some(bytes) => decode_csv(bytes)
                .with_context(|| format!("failed to read table {}", table.as_str())),
            None => Ok(Vec::new()),
        }
    }

    fn put<T: Serialize>(&mut self, table: TableName, rows: &[T]) -> Result<()> {
        let bytes = encode_csv(rows)?;
        self.tables.insert(table, bytes);
        Ok(())
    }
}

/// One CSV file per table under `root`.
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    root: PathBuf,
}

impl CsvTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn table_path(&self, table: TableName) -> PathBuf {
        self.root.join(format!("{}.csv", table.as_str()))
    }
}

impl TableStore for CsvTableStore {
    fn get<T: DeserializeOwned>(&self, table: TableName) -> Result<Vec<T>> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_csv_file(&path)
    }

    fn put<T: Serialize>(&mut self, table: TableName, rows: &[T]) -> Result<()> {
        let path = self.table_path(table);
        let bytes = encode_csv(rows)?;
        write_atomic(&path, &bytes)?;
        tracing::debug!(table = table.as_str(), rows = rows.len(), path = %path.display(), "table written");
        Ok(())
    }
}

/// Writes through a temp file in the destination directory, then renames over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|err| anyhow::anyhow!("failed to persist {}: {err}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: f64,
        #[serde(default)]
        flag: Option<u8>,
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                name: "a".to_string(),
                value: 0.1 + 0.2,
                flag: Some(1),
            },
            Row {
                name: "b".to_string(),
                value: -3.5e-7,
                flag: None,
            },
        ]
    }

    #[test]
    fn memory_store_reads_back_exact_values() -> Result<()> {
        let mut store = MemoryTableStore::new();
        assert!(store.get::<Row>(TableName::Features)?.is_empty());
        store.put(TableName::Features, &rows())?;
        assert!(store.contains(TableName::Features));
        assert_eq!(store.get::<Row>(TableName::Features)?, rows());
        Ok(())
    }

    #[test]
    fn csv_store_replaces_whole_table() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = CsvTableStore::new(temp.path().join("tables"));
        assert!(store.get::<Row>(TableName::Predictions)?.is_empty());

        store.put(TableName::Predictions, &rows())?;
        assert_eq!(store.get::<Row>(TableName::Predictions)?, rows());

        let replacement = vec![rows()[1].clone()];
        store.put(TableName::Predictions, &replacement)?;
        assert_eq!(store.get::<Row>(TableName::Predictions)?, replacement);

        store.put::<Row>(TableName::Predictions, &[])?;
        assert!(store.get::<Row>(TableName::Predictions)?.is_empty());
        assert!(store.table_path(TableName::Predictions).exists());
        Ok(())
    }

    #[test]
    fn table_names_are_distinct() {
        let mut names: Vec<&str> = TableName::ALL.iter().map(|t| t.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TableName::ALL.len());
    }
}
