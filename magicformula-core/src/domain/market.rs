//! Market snapshot payloads and the metric kinds retrieval works on.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::statement::StatementKind;

/// 10-day average volume and last price for one ticker.
///
/// Either field may be null in a provider response; a snapshot with a missing
/// field cannot be checked against the dollar-volume threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePrice {
    #[serde(rename = "avgVolume10d")]
    pub avg_volume_10d: Option<f64>,
    pub price: Option<f64>,
}

impl VolumePrice {
    pub fn new(avg_volume_10d: f64, price: f64) -> Self {
        Self {
            avg_volume_10d: Some(avg_volume_10d),
            price: Some(price),
        }
    }

    /// `price * avgVolume10d`, or `None` when either side is missing or non-finite.
    pub fn dollar_volume(&self) -> Option<f64> {
        let volume = self.avg_volume_10d.filter(|v| v.is_finite())?;
        let price = self.price.filter(|p| p.is_finite())?;
        Some(volume * price)
    }
}

/// A unit of retrieval work: which store a worker fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    BalanceSheet,
    IncomeStatement,
    MarketCap,
    VolumePrice,
}

impl MetricKind {
    /// The metrics every ranked ticker must have.
    pub const REQUIRED: [MetricKind; 3] = [
        MetricKind::BalanceSheet,
        MetricKind::IncomeStatement,
        MetricKind::MarketCap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::BalanceSheet => "balance",
            MetricKind::IncomeStatement => "income",
            MetricKind::MarketCap => "cap",
            MetricKind::VolumePrice => "volume_price",
        }
    }

    pub fn statement_kind(&self) -> Option<StatementKind> {
        match self {
            MetricKind::BalanceSheet => Some(StatementKind::Balance),
            MetricKind::IncomeStatement => Some(StatementKind::Income),
            _ => None,
        }
    }
}

impl From<StatementKind> for MetricKind {
    fn from(kind: StatementKind) -> Self {
        match kind {
            StatementKind::Balance => MetricKind::BalanceSheet,
            StatementKind::Income => MetricKind::IncomeStatement,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
