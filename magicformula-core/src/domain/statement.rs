//! Financial statement bundles in provider shape.
//!
//! A bundle is an ordered list of dated line-item maps. On the wire (and in
//! checkpoint files) each entry is a single-key object:
//!
//! ```json
//! [{"2024-03-31": {"totalAssets": 1.0e9, "cash": 2.5e8}}, ...]
//! ```
//!
//! Providers do not return entries in date order, so every consumer goes
//! through [`StatementBundle::sorted`] before picking a reporting period.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name -> numeric value for one reporting period.
pub type LineItems = BTreeMap<String, f64>;

/// Reporting frequency requested from the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Quarterly,
    Annual,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Quarterly => "quarterly",
            Period::Annual => "annual",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which statement a bundle holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Balance,
    Income,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Balance => "balance",
            StatementKind::Income => "income",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dated reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, LineItems>",
    into = "BTreeMap<String, LineItems>"
)]
pub struct StatementEntry {
    pub date: NaiveDate,
    pub items: LineItems,
}

impl StatementEntry {
    pub fn new(date: NaiveDate, items: LineItems) -> Self {
        Self { date, items }
    }

    /// Look up a field, treating non-finite values as absent.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.items.get(field).copied().filter(|v| v.is_finite())
    }
}

/// Error for a malformed provider-shaped entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryShapeError(String);

impl fmt::Display for EntryShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed statement entry: {}", self.0)
    }
}

impl TryFrom<BTreeMap<String, LineItems>> for StatementEntry {
    type Error = EntryShapeError;

    fn try_from(map: BTreeMap<String, LineItems>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(EntryShapeError(format!(
                "expected exactly one date key, found {}",
                map.len()
            )));
        }
        let (key, items) = map
            .into_iter()
            .next()
            .ok_or_else(|| EntryShapeError("empty entry".into()))?;
        let date = NaiveDate::parse_from_str(&key, "%Y-%m-%d")
            .map_err(|e| EntryShapeError(format!("bad date key '{key}': {e}")))?;
        Ok(Self { date, items })
    }
}

impl From<StatementEntry> for BTreeMap<String, LineItems> {
    fn from(entry: StatementEntry) -> Self {
        let mut map = BTreeMap::new();
        map.insert(entry.date.format("%Y-%m-%d").to_string(), entry.items);
        map
    }
}

/// All retrieved periods of one statement kind for one ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementBundle(Vec<StatementEntry>);

impl StatementBundle {
    pub fn new(entries: Vec<StatementEntry>) -> Self {
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in received order.
    pub fn entries(&self) -> &[StatementEntry] {
        &self.0
    }

    /// Entries sorted ascending by date. Stable for equal dates.
    pub fn sorted(&self) -> Vec<&StatementEntry> {
        let mut entries: Vec<&StatementEntry> = self.0.iter().collect();
        entries.sort_by_key(|e| e.date);
        entries
    }

    /// The `n` most recent entries, oldest first. Fewer if the bundle is short.
    pub fn most_recent(&self, n: usize) -> Vec<&StatementEntry> {
        let sorted = self.sorted();
        let skip = sorted.len().saturating_sub(n);
        sorted.into_iter().skip(skip).collect()
    }

    /// The latest reporting period.
    pub fn latest(&self) -> Option<&StatementEntry> {
        self.0.iter().max_by_key(|e| e.date)
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.latest().map(|e| e.date)
    }
}

impl FromIterator<StatementEntry> for StatementBundle {
    fn from_iter<I: IntoIterator<Item = StatementEntry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
