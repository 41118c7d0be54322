//! Checkpoint files: naming layout and atomic JSON persistence.
//!
//! Layout under `data_dir`:
//! - `ticker_dict.json`, `ticker_dict_{i}.json`: registry and per-process removals
//! - `{period}_balance_sheet[_{i}].json`, `{period}_income_statement[_{i}].json`
//! - `market_cap_info[_{i}].json`, `price_dict[_{i}].json`
//! - `sector_info.json`, `shard_plan_{i}.json`, `quality_log_{i}.json`
//!
//! Writes go to `<file>.tmp` and are renamed into place, so a reader never sees
//! a half-written checkpoint.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{MetricKind, Period};

/// Errors reading or writing checkpoint files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("checkpoint I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Serialize `value` to `path` atomically (write `.tmp`, then rename).
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::json(path, e))?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, bytes).map_err(|e| StoreError::io(&tmp_path, e))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })
}

/// Read a JSON checkpoint. A missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

/// Delete a checkpoint file; a file that is already gone is fine.
pub fn remove_checkpoint(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// File naming for every piece of resumable state.
#[derive(Debug, Clone)]
pub struct CheckpointLayout {
    root: PathBuf,
    period: Period,
}

impl CheckpointLayout {
    pub fn new(root: impl Into<PathBuf>, period: Period) -> Self {
        Self {
            root: root.into(),
            period,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn registry(&self) -> PathBuf {
        self.root.join("ticker_dict.json")
    }

    /// Registry decisions made inside process `index`.
    pub fn registry_shard(&self, index: usize) -> PathBuf {
        self.root.join(format!("ticker_dict_{index}.json"))
    }

    pub fn sector_info(&self) -> PathBuf {
        self.root.join("sector_info.json")
    }

    pub fn shard_plan(&self, index: usize) -> PathBuf {
        self.root.join(format!("shard_plan_{index}.json"))
    }

    /// Data-quality events recorded inside process `index`.
    pub fn quality_shard(&self, index: usize) -> PathBuf {
        self.root.join(format!("quality_log_{index}.json"))
    }

    fn metric_stem(&self, kind: MetricKind) -> String {
        match kind {
            MetricKind::BalanceSheet => format!("{}_balance_sheet", self.period),
            MetricKind::IncomeStatement => format!("{}_income_statement", self.period),
            MetricKind::MarketCap => "market_cap_info".to_string(),
            MetricKind::VolumePrice => "price_dict".to_string(),
        }
    }

    /// The authoritative checkpoint for a metric.
    pub fn metric(&self, kind: MetricKind) -> PathBuf {
        self.root.join(format!("{}.json", self.metric_stem(kind)))
    }

    /// The checkpoint written by process `index` for a metric.
    pub fn metric_shard(&self, kind: MetricKind, index: usize) -> PathBuf {
        self.root
            .join(format!("{}_{index}.json", self.metric_stem(kind)))
    }

    /// Existing per-process checkpoints for a metric, in index order.
    pub fn shard_files(&self, kind: MetricKind) -> Vec<(usize, PathBuf)> {
        self.indexed_files(&self.metric_stem(kind))
    }

    /// Existing per-process registry checkpoints, in index order.
    pub fn registry_shard_files(&self) -> Vec<(usize, PathBuf)> {
        self.indexed_files("ticker_dict")
    }

    pub fn quality_shard_files(&self) -> Vec<(usize, PathBuf)> {
        self.indexed_files("quality_log")
    }

    /// Files named `{stem}_{index}.json` under the root, sorted by index.
    fn indexed_files(&self, stem: &str) -> Vec<(usize, PathBuf)> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let prefix = format!("{stem}_");
        let mut found: Vec<(usize, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = name
                    .to_str()?
                    .strip_prefix(&prefix)?
                    .strip_suffix(".json")?
                    .parse::<usize>()
                    .ok()?;
                Some((index, entry.path()))
            })
            .collect();
        found.sort_by_key(|(index, _)| *index);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn atomic_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/store.json");
        let mut map = BTreeMap::new();
        map.insert("AAPL".to_string(), 1.5f64);

        write_json_atomic(&path, &map).unwrap();
        let loaded: BTreeMap<String, f64> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, map);
        assert!(!dir.path().join("nested/store.json.tmp").exists());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<BTreeMap<String, f64>> =
            read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let loaded: Result<Option<BTreeMap<String, f64>>, _> = read_json(&path);
        assert!(matches!(loaded, Err(StoreError::Json { .. })));
    }

    #[test]
    fn layout_names_follow_period_and_index() {
        let layout = CheckpointLayout::new("data", Period::Quarterly);
        assert_eq!(
            layout.metric(MetricKind::BalanceSheet),
            PathBuf::from("data/quarterly_balance_sheet.json")
        );
        assert_eq!(
            layout.metric_shard(MetricKind::IncomeStatement, 2),
            PathBuf::from("data/quarterly_income_statement_2.json")
        );
        assert_eq!(
            layout.metric_shard(MetricKind::MarketCap, 0),
            PathBuf::from("data/market_cap_info_0.json")
        );

        let annual = CheckpointLayout::new("data", Period::Annual);
        assert_eq!(
            annual.metric(MetricKind::BalanceSheet),
            PathBuf::from("data/annual_balance_sheet.json")
        );
    }

    #[test]
    fn shard_discovery_sorts_by_index_across_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CheckpointLayout::new(dir.path(), Period::Quarterly);
        for i in [3usize, 0, 1, 10] {
            fs::write(layout.metric_shard(MetricKind::MarketCap, i), "{}").unwrap();
        }
        fs::write(layout.metric(MetricKind::MarketCap), "{}").unwrap();
        fs::write(dir.path().join("market_cap_info_x.json"), "{}").unwrap();
        let found: Vec<usize> = layout
            .shard_files(MetricKind::MarketCap)
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(found, vec![0, 1, 3, 10]);
    }
}
