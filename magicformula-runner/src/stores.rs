//! The four metric stores of one process, opened against one checkpoint layout.

use magicformula_core::domain::{MetricKind, StatementBundle, VolumePrice};
use magicformula_core::{CheckpointLayout, MetricStore, StoreError};

#[derive(Debug)]
pub struct Stores {
    pub balance: MetricStore<StatementBundle>,
    pub income: MetricStore<StatementBundle>,
    pub market_cap: MetricStore<f64>,
    pub volume_price: MetricStore<VolumePrice>,
}

impl Stores {
    /// The authoritative stores, resumed from their checkpoints.
    pub fn open(layout: &CheckpointLayout) -> Result<Self, StoreError> {
        Ok(Self {
            balance: MetricStore::open(
                MetricKind::BalanceSheet,
                layout.metric(MetricKind::BalanceSheet),
            )?,
            income: MetricStore::open(
                MetricKind::IncomeStatement,
                layout.metric(MetricKind::IncomeStatement),
            )?,
            market_cap: MetricStore::open(MetricKind::MarketCap, layout.metric(MetricKind::MarketCap))?,
            volume_price: MetricStore::open(
                MetricKind::VolumePrice,
                layout.metric(MetricKind::VolumePrice),
            )?,
        })
    }

    /// Empty process-local stores writing `*_{index}.json`.
    pub fn for_shard(layout: &CheckpointLayout, index: usize) -> Self {
        let path = |kind| layout.metric_shard(kind, index);
        Self {
            balance: MetricStore::new(MetricKind::BalanceSheet, path(MetricKind::BalanceSheet)),
            income: MetricStore::new(MetricKind::IncomeStatement, path(MetricKind::IncomeStatement)),
            market_cap: MetricStore::new(MetricKind::MarketCap, path(MetricKind::MarketCap)),
            volume_price: MetricStore::new(MetricKind::VolumePrice, path(MetricKind::VolumePrice)),
        }
    }

    /// True when `ticker` has a non-empty payload in the store for `kind`.
    pub fn has_data(&self, kind: MetricKind, ticker: &str) -> bool {
        match kind {
            MetricKind::BalanceSheet => self.balance.has_data(ticker),
            MetricKind::IncomeStatement => self.income.has_data(ticker),
            MetricKind::MarketCap => self.market_cap.has_data(ticker),
            MetricKind::VolumePrice => self.volume_price.has_data(ticker),
        }
    }

    /// The subset of `tickers` lacking data for `kind`.
    pub fn missing_from(&self, kind: MetricKind, tickers: &[String]) -> Vec<String> {
        match kind {
            MetricKind::BalanceSheet => self.balance.missing_from(tickers),
            MetricKind::IncomeStatement => self.income.missing_from(tickers),
            MetricKind::MarketCap => self.market_cap.missing_from(tickers),
            MetricKind::VolumePrice => self.volume_price.missing_from(tickers),
        }
    }

    pub fn len(&self, kind: MetricKind) -> usize {
        match kind {
            MetricKind::BalanceSheet => self.balance.len(),
            MetricKind::IncomeStatement => self.income.len(),
            MetricKind::MarketCap => self.market_cap.len(),
            MetricKind::VolumePrice => self.volume_price.len(),
        }
    }

    /// Merge a per-process checkpoint into the store for `kind` (memory only).
    pub fn absorb(&self, kind: MetricKind, path: &std::path::Path) -> Result<usize, StoreError> {
        match kind {
            MetricKind::BalanceSheet => self.balance.absorb_file(path),
            MetricKind::IncomeStatement => self.income.absorb_file(path),
            MetricKind::MarketCap => self.market_cap.absorb_file(path),
            MetricKind::VolumePrice => self.volume_price.absorb_file(path),
        }
    }

    pub fn flush(&self, kind: MetricKind) -> Result<(), StoreError> {
        match kind {
            MetricKind::BalanceSheet => self.balance.flush(),
            MetricKind::IncomeStatement => self.income.flush(),
            MetricKind::MarketCap => self.market_cap.flush(),
            MetricKind::VolumePrice => self.volume_price.flush(),
        }
    }

    /// Drop `tickers` from every store. Returns the total number of entries removed.
    pub fn remove_everywhere(&self, tickers: &[String]) -> Result<usize, StoreError> {
        Ok(self.balance.remove_all(tickers)?
            + self.income.remove_all(tickers)?
            + self.market_cap.remove_all(tickers)?
            + self.volume_price.remove_all(tickers)?)
    }
}
