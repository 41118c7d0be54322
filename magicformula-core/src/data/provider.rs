//! Financial data provider trait and structured error types.
//!
//! The trait abstracts over data sources (Yahoo Finance, in-memory fixtures) so
//! the pipeline can swap implementations and tests never touch the network.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{Period, StatementBundle, StatementKind, VolumePrice};

/// Per-ticker result of a batch call. `None` means the provider returned null
/// for the ticker; a ticker missing from the map was omitted entirely. Callers
/// treat both as unresolved.
pub type BatchResponse<T> = BTreeMap<String, Option<T>>;

/// Errors that fail a whole batch call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("provider error: {0}")]
    Other(String),
}

/// Batch-oriented access to statements and market data.
///
/// One call covers a whole batch of tickers.
pub trait FinancialDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    fn fetch_statements(
        &self,
        tickers: &[String],
        period: Period,
        kind: StatementKind,
    ) -> Result<BatchResponse<StatementBundle>, ProviderError>;

    fn fetch_market_cap(&self, tickers: &[String]) -> Result<BatchResponse<f64>, ProviderError>;

    fn fetch_volume_and_price(
        &self,
        tickers: &[String],
    ) -> Result<BatchResponse<VolumePrice>, ProviderError>;

    /// False while the provider refuses requests (rate limit, ban).
    fn is_available(&self) -> bool {
        true
    }
}

impl<P: FinancialDataProvider + ?Sized> FinancialDataProvider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_statements(
        &self,
        tickers: &[String],
        period: Period,
        kind: StatementKind,
    ) -> Result<BatchResponse<StatementBundle>, ProviderError> {
        (**self).fetch_statements(tickers, period, kind)
    }

    fn fetch_market_cap(&self, tickers: &[String]) -> Result<BatchResponse<f64>, ProviderError> {
        (**self).fetch_market_cap(tickers)
    }

    fn fetch_volume_and_price(
        &self,
        tickers: &[String],
    ) -> Result<BatchResponse<VolumePrice>, ProviderError> {
        (**self).fetch_volume_and_price(tickers)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Split a batch response into resolved payloads and unresolved tickers.
///
/// A ticker is unresolved when it was omitted or came back null. Unresolved
/// tickers keep request order; tickers the caller did not ask for are dropped.
pub fn partition_response<T>(
    requested: &[String],
    mut response: BatchResponse<T>,
) -> (BTreeMap<String, T>, Vec<String>) {
    let mut resolved = BTreeMap::new();
    let mut unresolved = Vec::new();
    for ticker in requested {
        match response.remove(ticker).flatten() {
            Some(payload) => {
                resolved.insert(ticker.clone(), payload);
            }
            None => unresolved.push(ticker.clone()),
        }
    }
    (resolved, unresolved)
}
