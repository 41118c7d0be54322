//! Data-quality events and the end-of-run summary.
//!
//! Nothing that goes wrong for a single ticker aborts a run. Instead it lands
//! here as a categorized event, gets counted in the [`RunSummary`], and is
//! written to the `errors` table by the sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// What kind of problem an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCategory {
    /// Ticker absent from, or null in, a provider response. Ticker is removed.
    ProviderUnresolved,
    /// A statement field was resolved via its alternate or defaulted to zero.
    FieldMissing,
    /// Volume or price was missing during validation. Ticker is removed.
    ThresholdDataMissing,
    /// Statements or market cap absent after a full run. Ticker is retryable.
    Incomplete,
    /// A checkpoint write failed; the batch was not committed.
    PersistenceFailure,
    /// The provider call for a whole batch failed; nothing was committed.
    BatchFailed,
    /// Metrics could not be derived for the ticker; it is left out of the ranking.
    ComputationFailed,
}

impl QualityCategory {
    pub const ALL: [QualityCategory; 7] = [
        QualityCategory::ProviderUnresolved,
        QualityCategory::FieldMissing,
        QualityCategory::ThresholdDataMissing,
        QualityCategory::Incomplete,
        QualityCategory::PersistenceFailure,
        QualityCategory::BatchFailed,
        QualityCategory::ComputationFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityCategory::ProviderUnresolved => "provider_unresolved",
            QualityCategory::FieldMissing => "field_missing",
            QualityCategory::ThresholdDataMissing => "threshold_data_missing",
            QualityCategory::Incomplete => "incomplete",
            QualityCategory::PersistenceFailure => "persistence_failure",
            QualityCategory::BatchFailed => "batch_failed",
            QualityCategory::ComputationFailed => "computation_failed",
        }
    }
}

impl fmt::Display for QualityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded problem for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityEvent {
    pub ticker: String,
    pub category: QualityCategory,
    pub message: String,
}

/// Thread-safe, append-only event collector shared by workers and the metric stage.
#[derive(Debug, Default)]
pub struct QualityLog {
    events: Mutex<Vec<DataQualityEvent>>,
}

impl QualityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ticker: &str, category: QualityCategory, message: impl Into<String>) {
        let message = message.into();
        match category {
            QualityCategory::FieldMissing => debug!(ticker, %category, "{message}"),
            _ => warn!(ticker, %category, "{message}"),
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DataQualityEvent {
                ticker: ticker.to_string(),
                category,
                message,
            });
    }

    /// Append events recorded elsewhere (another process) without logging them again.
    pub fn extend(&self, events: impl IntoIterator<Item = DataQualityEvent>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(events);
    }

    pub fn events(&self) -> Vec<DataQualityEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, category: QualityCategory) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.category == category)
            .count()
    }

    pub fn summary(&self) -> RunSummary {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let mut summary = RunSummary::default();
        for event in events.iter() {
            *summary.counts.entry(event.category).or_insert(0) += 1;
        }
        summary
    }
}

/// Event counts per category, plus pipeline totals filled in by the runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub counts: BTreeMap<QualityCategory, usize>,
    pub ranked: usize,
    pub removed: usize,
    pub missing_info: usize,
}

impl RunSummary {
    pub fn count(&self, category: QualityCategory) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn total_events(&self) -> usize {
        self.counts.values().sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary ===")?;
        for category in QualityCategory::ALL {
            writeln!(f, "{:<24}{}", category.as_str(), self.count(category))?;
        }
        writeln!(f, "{:<24}{}", "removed_tickers", self.removed)?;
        writeln!(f, "{:<24}{}", "missing_info_tickers", self.missing_info)?;
        write!(f, "{:<24}{}", "ranked_tickers", self.ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn summary_counts_per_category() {
        let log = QualityLog::new();
        log.record("AAA", QualityCategory::FieldMissing, "no cash");
        log.record("AAA", QualityCategory::FieldMissing, "no accountsPayable");
        log.record("BBB", QualityCategory::ProviderUnresolved, "absent");

        let summary = log.summary();
        assert_eq!(summary.count(QualityCategory::FieldMissing), 2);
        assert_eq!(summary.count(QualityCategory::ProviderUnresolved), 1);
        assert_eq!(summary.count(QualityCategory::Incomplete), 0);
        assert_eq!(summary.total_events(), 3);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let log = Arc::new(QualityLog::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for j in 0..50 {
                        log.record(&format!("T{i}_{j}"), QualityCategory::BatchFailed, "x");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }

    #[test]
    fn summary_display_lists_every_category() {
        let text = RunSummary::default().to_string();
        for category in QualityCategory::ALL {
            assert!(text.contains(category.as_str()));
        }
    }
}
