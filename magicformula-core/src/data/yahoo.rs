//! Yahoo Finance data provider.
//!
//! Market data comes from the v7 quote endpoint, one request per batch.
//! Statements come from the v10 quoteSummary modules, one request per ticker
//! inside the batch. Handles retries with exponential backoff, rate limiting,
//! response parsing, and the circuit breaker.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::circuit_breaker::CircuitBreaker;
use super::provider::{BatchResponse, FinancialDataProvider, ProviderError};
use crate::config::ProviderConfig;
use crate::domain::{LineItems, Period, StatementBundle, StatementEntry, StatementKind, VolumePrice};

const QUOTE_URL: &str = "https://query2.finance.yahoo.com/v7/finance/quote";
const SUMMARY_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    result: Option<Vec<Quote>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quote {
    symbol: String,
    market_cap: Option<f64>,
    #[serde(rename = "averageDailyVolume10Day")]
    average_daily_volume_10_day: Option<f64>,
    regular_market_price: Option<f64>,
}

/// quoteSummary module and list key for a statement request.
fn summary_module(period: Period, kind: StatementKind) -> (&'static str, &'static str) {
    match (period, kind) {
        (Period::Quarterly, StatementKind::Balance) => {
            ("balanceSheetHistoryQuarterly", "balanceSheetStatements")
        }
        (Period::Annual, StatementKind::Balance) => ("balanceSheetHistory", "balanceSheetStatements"),
        (Period::Quarterly, StatementKind::Income) => {
            ("incomeStatementHistoryQuarterly", "incomeStatementHistory")
        }
        (Period::Annual, StatementKind::Income) => ("incomeStatementHistory", "incomeStatementHistory"),
    }
}

/// Yahoo Finance data provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(
        config: &ProviderConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
        })
    }

    /// Build a provider with its own breaker from config.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_cooldown(),
            config.breaker_threshold,
        ));
        Self::new(config, breaker)
    }

    fn quote_url(tickers: &[String]) -> String {
        format!("{QUOTE_URL}?symbols={}", tickers.join(","))
    }

    fn summary_url(ticker: &str, module: &str) -> String {
        format!("{SUMMARY_URL}/{ticker}?modules={module}")
    }

    /// GET `url` with retry and circuit breaker logic. `Ok(None)` on 404.
    fn fetch_with_retry(&self, url: &str) -> Result<Option<Value>, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(ProviderError::CircuitBreakerTripped);
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(ProviderError::CircuitBreakerTripped);
                    }

                    if status == StatusCode::NOT_FOUND {
                        self.circuit_breaker.record_success();
                        return Ok(None);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(ProviderError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        return Err(ProviderError::AuthenticationRequired(
                            "Yahoo Finance requires authentication".into(),
                        ));
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(ProviderError::Other(format!("HTTP {status} for {url}")));
                        continue;
                    }

                    let body: Value = resp.json().map_err(|e| {
                        ProviderError::ResponseFormatChanged(format!("failed to parse response: {e}"))
                    })?;
                    self.circuit_breaker.record_success();
                    return Ok(Some(body));
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(ProviderError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(ProviderError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }

    fn fetch_quotes(&self, tickers: &[String]) -> Result<Vec<Quote>, ProviderError> {
        if tickers.is_empty() {
            return Ok(Vec::new());
        }
        match self.fetch_with_retry(&Self::quote_url(tickers))? {
            Some(body) => parse_quotes(body),
            None => Ok(Vec::new()),
        }
    }
}

fn parse_quotes(body: Value) -> Result<Vec<Quote>, ProviderError> {
    let envelope: QuoteEnvelope = serde_json::from_value(body)
        .map_err(|e| ProviderError::ResponseFormatChanged(format!("quote response: {e}")))?;
    Ok(envelope.quote_response.result.unwrap_or_default())
}

/// Extract a statement bundle from a quoteSummary body.
///
/// `Ok(None)` when Yahoo reports no result for the ticker.
fn parse_statements(
    body: &Value,
    module: &str,
    list_key: &str,
) -> Result<Option<StatementBundle>, ProviderError> {
    let summary = body
        .get("quoteSummary")
        .ok_or_else(|| ProviderError::ResponseFormatChanged("missing quoteSummary".into()))?;
    let Some(result) = summary
        .get("result")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
    else {
        return Ok(None);
    };
    let Some(statements) = result
        .get(module)
        .and_then(|m| m.get(list_key))
        .and_then(Value::as_array)
    else {
        return Ok(None);
    };

    let entries = statements.iter().filter_map(parse_statement_entry).collect();
    Ok(Some(StatementBundle::new(entries)))
}

/// One statement object: `endDate.fmt` is the date, every `{ raw: number }`
/// member is a line item.
fn parse_statement_entry(statement: &Value) -> Option<StatementEntry> {
    let fmt = statement.get("endDate")?.get("fmt")?.as_str()?;
    let date = NaiveDate::parse_from_str(fmt, "%Y-%m-%d").ok()?;
    let items: LineItems = statement
        .as_object()?
        .iter()
        .filter(|(name, _)| name.as_str() != "endDate")
        .filter_map(|(name, value)| Some((name.clone(), value.get("raw")?.as_f64()?)))
        .collect();
    Some(StatementEntry::new(date, items))
}

impl FinancialDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_statements(
        &self,
        tickers: &[String],
        period: Period,
        kind: StatementKind,
    ) -> Result<BatchResponse<StatementBundle>, ProviderError> {
        let (module, list_key) = summary_module(period, kind);
        let mut response = BTreeMap::new();
        for ticker in tickers {
            let bundle = match self.fetch_with_retry(&Self::summary_url(ticker, module))? {
                Some(body) => parse_statements(&body, module, list_key)?,
                None => None,
            };
            debug!(ticker, module, found = bundle.is_some(), "statement request");
            response.insert(ticker.clone(), bundle);
        }
        Ok(response)
    }

    fn fetch_market_cap(&self, tickers: &[String]) -> Result<BatchResponse<f64>, ProviderError> {
        Ok(self
            .fetch_quotes(tickers)?
            .into_iter()
            .map(|q| (q.symbol, q.market_cap))
            .collect())
    }

    fn fetch_volume_and_price(
        &self,
        tickers: &[String],
    ) -> Result<BatchResponse<VolumePrice>, ProviderError> {
        Ok(self
            .fetch_quotes(tickers)?
            .into_iter()
            .map(|q| {
                let snapshot = match (q.average_daily_volume_10_day, q.regular_market_price) {
                    (None, None) => None,
                    (avg_volume_10d, price) => Some(VolumePrice {
                        avg_volume_10d,
                        price,
                    }),
                };
                (q.symbol, snapshot)
            })
            .collect())
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
