//! Metric engine: return on capital and earnings yield from statement bundles.
//!
//! Pure functions over already-retrieved data. Every field lookup goes through
//! [`crate::fields`], so a missing line item costs a data-quality event, never
//! the whole ticker. A ticker is skipped only when a bundle or the market cap is
//! absent or the arithmetic produces a non-finite result.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{StatementBundle, StatementEntry};
use crate::fields;
use crate::quality::{QualityCategory, QualityLog};

/// Number of income-statement entries summed into trailing EBIT.
pub const TRAILING_PERIODS: usize = 4;

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("no {0} statements")]
    MissingBundle(&'static str),

    #[error("no market cap")]
    MissingMarketCap,

    #[error("{metric} is not finite ({value})")]
    NonFinite { metric: &'static str, value: f64 },
}

/// Per-ticker factors and the intermediate values they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub return_on_capital: f64,
    pub earnings_yield: f64,
    pub enterprise_value: f64,
    pub market_cap: f64,
    pub trailing_ebit: f64,
    pub net_working_capital: f64,
    pub fixed_assets: f64,
    pub excess_cash: f64,
    /// The earlier of the latest balance-sheet date and latest income date.
    pub most_recent_statement_date: NaiveDate,
}

/// Balance-sheet inputs after field resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceInputs {
    pub total_current_assets: f64,
    pub total_current_liabilities: f64,
    pub cash: f64,
    pub accounts_payable: f64,
    pub total_assets: f64,
    pub intangible_assets: f64,
    pub long_term_debt: f64,
}

impl BalanceInputs {
    pub fn resolve(ticker: &str, entry: &StatementEntry, log: &QualityLog) -> Self {
        Self {
            total_current_assets: fields::TOTAL_CURRENT_ASSETS.resolve_logged(ticker, entry, log),
            total_current_liabilities: fields::TOTAL_CURRENT_LIABILITIES
                .resolve_logged(ticker, entry, log),
            cash: fields::CASH.resolve_logged(ticker, entry, log),
            accounts_payable: fields::ACCOUNTS_PAYABLE.resolve_logged(ticker, entry, log),
            total_assets: fields::TOTAL_ASSETS.resolve_logged(ticker, entry, log),
            intangible_assets: fields::INTANGIBLE_ASSETS.resolve_logged(ticker, entry, log),
            long_term_debt: fields::LONG_TERM_DEBT.resolve_logged(ticker, entry, log),
        }
    }

    /// `cash - max(0, currentLiabilities - currentAssets + cash)`
    pub fn excess_cash(&self) -> f64 {
        self.cash
            - (self.total_current_liabilities - self.total_current_assets + self.cash).max(0.0)
    }

    /// `max(0, currentAssets - excessCash - accountsPayable)`
    pub fn net_working_capital(&self) -> f64 {
        (self.total_current_assets - self.excess_cash() - self.accounts_payable).max(0.0)
    }

    /// `totalAssets - currentAssets - intangibleAssets`
    pub fn fixed_assets(&self) -> f64 {
        self.total_assets - self.total_current_assets - self.intangible_assets
    }

    /// `max(0, marketCap + longTermDebt + currentLiabilities - excessCash)`
    pub fn enterprise_value(&self, market_cap: f64) -> f64 {
        (market_cap + (self.long_term_debt + self.total_current_liabilities) - self.excess_cash())
            .max(0.0)
    }
}

/// Sum of `ebit` over the most recent [`TRAILING_PERIODS`] entries by date.
pub fn trailing_ebit(ticker: &str, income: &StatementBundle, log: &QualityLog) -> f64 {
    income
        .most_recent(TRAILING_PERIODS)
        .into_iter()
        .map(|entry| fields::EBIT.resolve_logged(ticker, entry, log))
        .sum()
}

fn finite(metric: &'static str, value: f64) -> Result<f64, MetricError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MetricError::NonFinite { metric, value })
    }
}

/// Derive every factor for one ticker.
pub fn compute(
    ticker: &str,
    balance: &StatementBundle,
    income: &StatementBundle,
    market_cap: f64,
    log: &QualityLog,
) -> Result<DerivedMetrics, MetricError> {
    let latest_balance = balance
        .latest()
        .ok_or(MetricError::MissingBundle("balance sheet"))?;
    let latest_income_date = income
        .latest_date()
        .ok_or(MetricError::MissingBundle("income statement"))?;
    if !market_cap.is_finite() {
        return Err(MetricError::MissingMarketCap);
    }

    let inputs = BalanceInputs::resolve(ticker, latest_balance, log);
    let ebit = trailing_ebit(ticker, income, log);

    let net_working_capital = inputs.net_working_capital();
    let fixed_assets = inputs.fixed_assets();
    let enterprise_value = inputs.enterprise_value(market_cap);

    let return_on_capital = finite("return on capital", ebit / (net_working_capital + fixed_assets))?;
    let earnings_yield = finite("earnings yield", ebit / enterprise_value)?;

    Ok(DerivedMetrics {
        return_on_capital,
        earnings_yield,
        enterprise_value,
        market_cap,
        trailing_ebit: ebit,
        net_working_capital,
        fixed_assets,
        excess_cash: inputs.excess_cash(),
        most_recent_statement_date: latest_balance.date.min(latest_income_date),
    })
}

/// Compute metrics for `tickers` in parallel.
///
/// Tickers that fail are recorded as `ComputationFailed` and left out.
/// Output is in ticker order.
pub fn compute_all(
    tickers: &[String],
    balance: &BTreeMap<String, StatementBundle>,
    income: &BTreeMap<String, StatementBundle>,
    market_caps: &BTreeMap<String, f64>,
    log: &QualityLog,
) -> BTreeMap<String, DerivedMetrics> {
    tickers
        .par_iter()
        .filter_map(|ticker| {
            let result = match (balance.get(ticker), income.get(ticker), market_caps.get(ticker)) {
                (None, _, _) => Err(MetricError::MissingBundle("balance sheet")),
                (_, None, _) => Err(MetricError::MissingBundle("income statement")),
                (_, _, None) => Err(MetricError::MissingMarketCap),
                (Some(b), Some(i), Some(cap)) => compute(ticker, b, i, *cap, log),
            };
            match result {
                Ok(metrics) => Some((ticker.clone(), metrics)),
                Err(e) => {
                    log.record(ticker, QualityCategory::ComputationFailed, e.to_string());
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LineItems;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(date: NaiveDate, fields: &[(&str, f64)]) -> StatementEntry {
        let items: LineItems = fields.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        StatementEntry::new(date, items)
    }

    fn example_balance() -> StatementBundle {
        StatementBundle::new(vec![entry(
            day(2024, 3, 31),
            &[
                ("totalCurrentAssets", 100.0),
                ("totalCurrentLiabilities", 40.0),
                ("cash", 10.0),
                ("accountsPayable", 5.0),
                ("totalAssets", 300.0),
                ("intangibleAssets", 20.0),
                ("longTermDebt", 60.0),
            ],
        )])
    }

    fn income(ebits: &[(NaiveDate, f64)]) -> StatementBundle {
        ebits.iter().map(|(d, v)| entry(*d, &[("ebit", *v)])).collect()
    }

    #[test]
    fn worked_example_return_on_capital() {
        let log = QualityLog::new();
        let inc = income(&[(day(2024, 3, 31), 50.0)]);
        let m = compute("A", &example_balance(), &inc, 1000.0, &log).unwrap();

        assert_eq!(m.excess_cash, 10.0);
        assert_eq!(m.net_working_capital, 85.0);
        assert_eq!(m.fixed_assets, 180.0);
        assert!((m.return_on_capital - 0.1887).abs() < 1e-4);
        // 1000 + (60 + 40) - 10
        assert_eq!(m.enterprise_value, 1090.0);
        assert!((m.earnings_yield - 50.0 / 1090.0).abs() < 1e-12);
        assert!(log.is_empty());
    }

    #[test]
    fn trailing_ebit_uses_four_latest_regardless_of_order() {
        let log = QualityLog::new();
        let inc = income(&[
            (day(2024, 6, 30), 4.0),
            (day(2023, 3, 31), 100.0),
            (day(2023, 12, 31), 3.0),
            (day(2023, 6, 30), 1.0),
            (day(2023, 9, 30), 2.0),
        ]);
        assert_eq!(trailing_ebit("A", &inc, &log), 10.0);
    }

    #[test]
    fn trailing_ebit_sums_what_is_available() {
        let log = QualityLog::new();
        let inc = income(&[(day(2024, 3, 31), 7.0), (day(2023, 12, 31), 8.0)]);
        assert_eq!(trailing_ebit("A", &inc, &log), 15.0);
    }

    #[test]
    fn most_recent_date_is_the_earlier_of_the_two() {
        let log = QualityLog::new();
        let inc = income(&[(day(2023, 12, 31), 50.0)]);
        let m = compute("A", &example_balance(), &inc, 1000.0, &log).unwrap();
        assert_eq!(m.most_recent_statement_date, day(2023, 12, 31));
    }

    #[test]
    fn missing_fields_default_and_are_logged() {
        let log = QualityLog::new();
        let balance = StatementBundle::new(vec![entry(
            day(2024, 3, 31),
            &[
                ("totalCurrentAssets", 100.0),
                ("currentLiabilities", 40.0),
                ("cash", 10.0),
                ("totalAssets", 300.0),
            ],
        )]);
        let inc = income(&[(day(2024, 3, 31), 50.0)]);
        let m = compute("A", &balance, &inc, 1000.0, &log).unwrap();

        // accountsPayable, intangibleAssets, longTermDebt defaulted; liabilities via alternate
        assert_eq!(log.count(QualityCategory::FieldMissing), 4);
        assert_eq!(m.net_working_capital, 90.0);
        assert_eq!(m.fixed_assets, 200.0);
    }

    #[test]
    fn zero_capital_is_a_computation_failure() {
        let log = QualityLog::new();
        let balance = StatementBundle::new(vec![entry(day(2024, 3, 31), &[])]);
        let inc = income(&[(day(2024, 3, 31), 50.0)]);
        let err = compute("A", &balance, &inc, 1000.0, &log).unwrap_err();
        assert!(matches!(err, MetricError::NonFinite { .. }));
    }

    #[test]
    fn compute_all_skips_and_records_failures() {
        let log = QualityLog::new();
        let tickers = vec!["A".to_string(), "NOCAP".to_string(), "NOBS".to_string()];
        let inc = income(&[(day(2024, 3, 31), 50.0)]);

        let mut balance = BTreeMap::new();
        balance.insert("A".to_string(), example_balance());
        balance.insert("NOCAP".to_string(), example_balance());
        let mut incomes = BTreeMap::new();
        for t in &tickers {
            incomes.insert(t.clone(), inc.clone());
        }
        let mut caps = BTreeMap::new();
        caps.insert("A".to_string(), 1000.0);
        caps.insert("NOBS".to_string(), 1000.0);

        let out = compute_all(&tickers, &balance, &incomes, &caps, &log);
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(log.count(QualityCategory::ComputationFailed), 2);
    }
}
