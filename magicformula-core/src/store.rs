//! Per-metric data store: a mutex-guarded map plus its checkpoint file.
//!
//! Workers never touch the map directly. They hand a completed batch to
//! [`MetricStore::commit`], which merges it and rewrites the checkpoint while
//! holding the store lock, so the file on disk only ever reflects whole batches.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::checkpoint::{read_json, remove_checkpoint, write_json_atomic, StoreError};
use crate::domain::{MetricKind, StatementBundle, VolumePrice};

/// A value a store can hold and checkpoint.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// True when the payload carries no usable data.
    fn is_empty_payload(&self) -> bool;

    /// True when the value cannot be stored at all and counts as a null response.
    fn is_null_payload(&self) -> bool {
        false
    }
}

impl Payload for StatementBundle {
    fn is_empty_payload(&self) -> bool {
        self.is_empty()
    }
}

impl Payload for f64 {
    fn is_empty_payload(&self) -> bool {
        !self.is_finite()
    }

    // JSON has no NaN or infinity.
    fn is_null_payload(&self) -> bool {
        !self.is_finite()
    }
}

impl Payload for VolumePrice {
    fn is_empty_payload(&self) -> bool {
        self.avg_volume_10d.is_none() && self.price.is_none()
    }
}

/// Ticker -> payload map for one metric, checkpointed to one file.
#[derive(Debug)]
pub struct MetricStore<T> {
    kind: MetricKind,
    path: PathBuf,
    entries: Mutex<BTreeMap<String, T>>,
}

impl<T: Payload> MetricStore<T> {
    /// An empty store that will checkpoint to `path`.
    pub fn new(kind: MetricKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load the store from its checkpoint, or start empty if none exists.
    pub fn open(kind: MetricKind, path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries: BTreeMap<String, T> = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            kind,
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge a completed batch and checkpoint the whole store.
    ///
    /// The merge and the file write happen under one lock acquisition. If the
    /// write fails the in-memory map is left as it was before the batch.
    pub fn commit(&self, batch: BTreeMap<String, T>) -> Result<usize, StoreError> {
        let count = batch.len();
        let mut guard = self.lock();
        let mut merged = guard.clone();
        merged.extend(batch);
        write_json_atomic(&self.path, &merged)?;
        *guard = merged;
        Ok(count)
    }

    /// Merge another checkpoint file into memory (later writers win per ticker).
    ///
    /// Does not persist; call [`MetricStore::flush`] once all merges are done.
    pub fn absorb_file(&self, path: &Path) -> Result<usize, StoreError> {
        let incoming: BTreeMap<String, T> = read_json(path)?.unwrap_or_default();
        let count = incoming.len();
        self.lock().extend(incoming);
        Ok(count)
    }

    /// Rewrite the checkpoint from the in-memory map.
    pub fn flush(&self) -> Result<(), StoreError> {
        let guard = self.lock();
        write_json_atomic(&self.path, &*guard)
    }

    /// Drop tickers from memory and checkpoint. Returns how many were present.
    pub fn remove_all(&self, tickers: &[String]) -> Result<usize, StoreError> {
        let mut guard = self.lock();
        let before = guard.len();
        for ticker in tickers {
            guard.remove(ticker);
        }
        let removed = before - guard.len();
        if removed > 0 {
            write_json_atomic(&self.path, &*guard)?;
        }
        Ok(removed)
    }

    /// Delete the checkpoint file (used for consumed per-process files).
    pub fn delete_checkpoint(&self) -> Result<(), StoreError> {
        remove_checkpoint(&self.path)
    }

    pub fn get(&self, ticker: &str) -> Option<T> {
        self.lock().get(ticker).cloned()
    }

    /// True when the ticker has a non-empty payload.
    pub fn has_data(&self, ticker: &str) -> bool {
        self.lock()
            .get(ticker)
            .is_some_and(|payload| !payload.is_empty_payload())
    }

    /// The subset of `tickers` with no entry or an empty one, order preserved.
    pub fn missing_from(&self, tickers: &[String]) -> Vec<String> {
        let guard = self.lock();
        tickers
            .iter()
            .filter(|t| guard.get(*t).map_or(true, |p| p.is_empty_payload()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A copy of the current map.
    pub fn snapshot(&self) -> BTreeMap<String, T> {
        self.lock().clone()
    }
}
