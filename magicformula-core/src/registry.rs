//! Ticker registry: the single source of truth for ticker eligibility.
//!
//! State lives behind its own mutex, separate from every metric store lock.
//! Downstream stages decide participation only through [`TickerRegistry::list_valid`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

use crate::checkpoint::{read_json, write_json_atomic, StoreError};
use crate::domain::{SectorProfile, TickerRecord, TickerState, VolumePrice};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("illegal transition for {ticker}: {from} -> {to}")]
    IllegalTransition {
        ticker: String,
        from: TickerState,
        to: TickerState,
    },

    #[error("unknown ticker: {0}")]
    UnknownTicker(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Market-cap and dollar-volume minimums a ticker must meet to be `VALID`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_market_cap: f64,
    pub min_dollar_volume: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_market_cap: 50_000_000.0,
            min_dollar_volume: 10_000_000.0,
        }
    }
}

/// Outcome of one threshold check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Check {
    /// Required data was missing.
    Unresolved,
    /// Data present, below the minimum.
    Below(f64),
    /// Data present, at or above the minimum.
    Passed(f64),
}

impl Thresholds {
    pub fn check_dollar_volume(&self, snapshot: Option<&VolumePrice>) -> Check {
        match snapshot.and_then(VolumePrice::dollar_volume) {
            None => Check::Unresolved,
            Some(v) if v >= self.min_dollar_volume => Check::Passed(v),
            Some(v) => Check::Below(v),
        }
    }

    pub fn check_market_cap(&self, cap: Option<f64>) -> Check {
        match cap.filter(|c| c.is_finite()) {
            None => Check::Unresolved,
            Some(c) if c >= self.min_market_cap => Check::Passed(c),
            Some(c) => Check::Below(c),
        }
    }
}

/// Count of tickers per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub not_validated: usize,
    pub valid: usize,
    pub invalid: usize,
    pub remove: usize,
    pub missing_info: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.not_validated + self.valid + self.invalid + self.remove + self.missing_info
    }
}

/// Ticker -> record map behind the registry lock.
#[derive(Debug, Default)]
pub struct TickerRegistry {
    records: Mutex<BTreeMap<String, TickerRecord>>,
}

impl TickerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: BTreeMap<String, TickerRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Load from `ticker_dict.json`; an absent file gives an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let records = read_json(path)?.unwrap_or_default();
        Ok(Self::from_records(records))
    }

    /// Checkpoint the registry. Holds only the registry lock.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let guard = self.lock();
        write_json_atomic(path, &*guard)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, TickerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add unseen tickers as `NOT_VALIDATED`. Existing tickers keep their state
    /// but pick up a profile if they had none. Returns the number added.
    pub fn ingest<I>(&self, tickers: I) -> usize
    where
        I: IntoIterator<Item = (String, Option<SectorProfile>)>,
    {
        let mut guard = self.lock();
        let mut added = 0;
        for (ticker, profile) in tickers {
            match guard.get_mut(&ticker) {
                Some(existing) => {
                    if existing.profile.is_none() {
                        existing.profile = profile;
                    }
                }
                None => {
                    guard.insert(ticker, TickerRecord::new(profile));
                    added += 1;
                }
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.lock().contains_key(ticker)
    }

    pub fn state(&self, ticker: &str) -> Option<TickerState> {
        self.lock().get(ticker).map(|r| r.state)
    }

    pub fn record(&self, ticker: &str) -> Option<TickerRecord> {
        self.lock().get(ticker).cloned()
    }

    pub fn profile(&self, ticker: &str) -> Option<SectorProfile> {
        self.lock().get(ticker).and_then(|r| r.profile.clone())
    }

    /// Move `ticker` to `to`. Returns the previous state.
    ///
    /// A transition to the current state is a no-op.
    pub fn transition(&self, ticker: &str, to: TickerState) -> Result<TickerState, RegistryError> {
        let mut guard = self.lock();
        let record = guard
            .get_mut(ticker)
            .ok_or_else(|| RegistryError::UnknownTicker(ticker.to_string()))?;
        let from = record.state;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(to) {
            return Err(RegistryError::IllegalTransition {
                ticker: ticker.to_string(),
                from,
                to,
            });
        }
        record.state = to;
        debug!(ticker, %from, %to, "ticker state change");
        Ok(from)
    }

    /// Keep the market snapshot seen while validating.
    pub fn note_volume(&self, ticker: &str, snapshot: &VolumePrice) {
        if let Some(record) = self.lock().get_mut(ticker) {
            record.price = snapshot.price;
            record.avg_dollar_volume_10d = snapshot.dollar_volume();
        }
    }

    pub fn note_market_cap(&self, ticker: &str, cap: f64) {
        if let Some(record) = self.lock().get_mut(ticker) {
            record.market_cap = Some(cap);
        }
    }

    /// Tickers currently `VALID`, in ticker order.
    ///
    /// This is the only participation test downstream stages may use.
    pub fn list_valid(&self) -> Vec<String> {
        self.list_in(TickerState::Valid)
    }

    pub fn list_in(&self, state: TickerState) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, r)| r.state == state)
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// True iff no ticker remains `NOT_VALIDATED`.
    pub fn all_validated(&self) -> bool {
        !self
            .lock()
            .values()
            .any(|r| r.state == TickerState::NotValidated)
    }

    pub fn counts(&self) -> StateCounts {
        let guard = self.lock();
        let mut counts = StateCounts::default();
        for record in guard.values() {
            match record.state {
                TickerState::NotValidated => counts.not_validated += 1,
                TickerState::Valid => counts.valid += 1,
                TickerState::Invalid => counts.invalid += 1,
                TickerState::Remove => counts.remove += 1,
                TickerState::MissingInfo => counts.missing_info += 1,
            }
        }
        counts
    }

    /// Put `MISSING_INFO` tickers back to `VALID` so retrieval retries them.
    pub fn requeue_missing(&self) -> Vec<String> {
        let mut guard = self.lock();
        let mut requeued = Vec::new();
        for (ticker, record) in guard.iter_mut() {
            if record.state == TickerState::MissingInfo {
                record.state = TickerState::Valid;
                requeued.push(ticker.clone());
            }
        }
        requeued
    }

    /// Reset every surviving ticker to `NOT_VALIDATED` for a full re-validation.
    /// `REMOVE` tickers are left alone.
    pub fn reset_for_revalidation(&self) -> usize {
        let mut guard = self.lock();
        let mut reset = 0;
        for record in guard.values_mut() {
            if record.state != TickerState::Remove && record.state != TickerState::NotValidated {
                record.state = TickerState::NotValidated;
                reset += 1;
            }
        }
        reset
    }

    /// Delete every `REMOVE` ticker. Returns the deleted tickers.
    pub fn purge_removed(&self) -> Vec<String> {
        let mut guard = self.lock();
        let removed: Vec<String> = guard
            .iter()
            .filter(|(_, r)| r.state == TickerState::Remove)
            .map(|(t, _)| t.clone())
            .collect();
        for ticker in &removed {
            guard.remove(ticker);
        }
        removed
    }

    /// Profiles for every ticker that has one (persisted as `sector_info.json`).
    pub fn profiles(&self) -> BTreeMap<String, SectorProfile> {
        self.lock()
            .iter()
            .filter_map(|(t, r)| r.profile.clone().map(|p| (t.clone(), p)))
            .collect()
    }
}
