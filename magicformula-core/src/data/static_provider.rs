//! In-memory provider built from fixtures.
//!
//! Answers batch calls from maps, records every call it receives, and can be
//! scripted to fail after a number of calls to simulate a run killed mid-way.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::provider::{BatchResponse, FinancialDataProvider, ProviderError};
use crate::domain::{Period, StatementBundle, StatementKind, VolumePrice};

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub method: &'static str,
    pub tickers: Vec<String>,
}

/// Fixture-backed provider. A ticker present with `None` is answered with null;
/// a ticker absent from a map is omitted from the response.
#[derive(Debug, Default)]
pub struct StaticProvider {
    balance: BTreeMap<String, Option<StatementBundle>>,
    income: BTreeMap<String, Option<StatementBundle>>,
    market_cap: BTreeMap<String, Option<f64>>,
    volume_price: BTreeMap<String, Option<VolumePrice>>,
    fail_after: Option<usize>,
    unavailable: bool,
    calls: Mutex<Vec<ProviderCall>>,
    served: AtomicUsize,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statements(
        mut self,
        ticker: &str,
        kind: StatementKind,
        bundle: Option<StatementBundle>,
    ) -> Self {
        match kind {
            StatementKind::Balance => self.balance.insert(ticker.to_string(), bundle),
            StatementKind::Income => self.income.insert(ticker.to_string(), bundle),
        };
        self
    }

    pub fn with_market_cap(mut self, ticker: &str, cap: Option<f64>) -> Self {
        self.market_cap.insert(ticker.to_string(), cap);
        self
    }

    pub fn with_volume_price(mut self, ticker: &str, snapshot: Option<VolumePrice>) -> Self {
        self.volume_price.insert(ticker.to_string(), snapshot);
        self
    }

    /// Serve `calls` calls, then fail every later one.
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Report the provider as unavailable, like a tripped circuit breaker.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every ticker requested through `method`, in call order.
    pub fn requested(&self, method: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .flat_map(|c| c.tickers)
            .collect()
    }

    fn serve<T: Clone>(
        &self,
        method: &'static str,
        tickers: &[String],
        source: &BTreeMap<String, Option<T>>,
    ) -> Result<BatchResponse<T>, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProviderCall {
                method,
                tickers: tickers.to_vec(),
            });
        let served = self.served.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| served >= limit) {
            return Err(ProviderError::NetworkUnreachable(format!(
                "scripted failure on call {}",
                served + 1
            )));
        }
        Ok(tickers
            .iter()
            .filter_map(|t| source.get(t).map(|v| (t.clone(), v.clone())))
            .collect())
    }
}

impl FinancialDataProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_statements(
        &self,
        tickers: &[String],
        _period: Period,
        kind: StatementKind,
    ) -> Result<BatchResponse<StatementBundle>, ProviderError> {
        match kind {
            StatementKind::Balance => self.serve("balance", tickers, &self.balance),
            StatementKind::Income => self.serve("income", tickers, &self.income),
        }
    }

    fn fetch_market_cap(&self, tickers: &[String]) -> Result<BatchResponse<f64>, ProviderError> {
        self.serve("cap", tickers, &self.market_cap)
    }

    fn fetch_volume_and_price(
        &self,
        tickers: &[String],
    ) -> Result<BatchResponse<VolumePrice>, ProviderError> {
        self.serve("volume_price", tickers, &self.volume_price)
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }
}
