//! Consolidation and cleaning.
//!
//! Consolidation folds every per-process file into the authoritative state in
//! index order (later index wins per ticker) and deletes the consumed files.
//! Cleaning then purges `REMOVE` tickers everywhere and demotes `VALID`
//! tickers with incomplete data to `MISSING_INFO`.

use std::collections::BTreeMap;
use tracing::{info, warn};

use magicformula_core::checkpoint::{read_json, remove_checkpoint};
use magicformula_core::domain::{MetricKind, TickerState};
use magicformula_core::{
    CheckpointLayout, DataQualityEvent, QualityCategory, QualityLog, RegistryError, TickerRegistry,
};

use crate::stores::Stores;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Files merged per metric.
    pub files: BTreeMap<MetricKind, usize>,
    /// Entries read per metric (before last-writer-wins dedup).
    pub entries: BTreeMap<MetricKind, usize>,
    pub removals: usize,
    pub events: usize,
}

impl ConsolidationReport {
    pub fn is_empty(&self) -> bool {
        self.files.values().all(|n| *n == 0) && self.removals == 0 && self.events == 0
    }
}

/// Merge every `*_{i}.json` left by processes into `stores` and `registry`.
///
/// Each metric is flushed before its shard files are deleted, so a crash
/// between the two steps only leaves files that will be merged again.
pub fn consolidate(
    layout: &CheckpointLayout,
    stores: &Stores,
    registry: &TickerRegistry,
    log: &QualityLog,
) -> Result<ConsolidationReport, RegistryError> {
    let mut report = ConsolidationReport::default();

    for kind in [
        MetricKind::BalanceSheet,
        MetricKind::IncomeStatement,
        MetricKind::MarketCap,
        MetricKind::VolumePrice,
    ] {
        let files = layout.shard_files(kind);
        if files.is_empty() {
            continue;
        }
        let mut entries = 0;
        for (_, path) in &files {
            entries += stores.absorb(kind, path)?;
        }
        stores.flush(kind)?;
        for (_, path) in &files {
            remove_checkpoint(path)?;
        }
        info!(metric = %kind, files = files.len(), entries, "consolidated");
        report.files.insert(kind, files.len());
        report.entries.insert(kind, entries);
    }

    for (index, path) in layout.registry_shard_files() {
        let decisions: BTreeMap<String, TickerState> = read_json(&path)?.unwrap_or_default();
        for (ticker, state) in decisions {
            if state != TickerState::Remove {
                continue;
            }
            match registry.transition(&ticker, TickerState::Remove) {
                Ok(_) => report.removals += 1,
                Err(e) => warn!(process = index, ticker = %ticker, error = %e, "shard removal not applied"),
            }
        }
    }
    registry.save(&layout.registry())?;
    for (_, path) in layout.registry_shard_files() {
        remove_checkpoint(&path)?;
    }

    for (_, path) in layout.quality_shard_files() {
        let events: Vec<DataQualityEvent> = read_json(&path)?.unwrap_or_default();
        report.events += events.len();
        log.extend(events);
        remove_checkpoint(&path)?;
    }

    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Vec<String>,
    pub missing_info: Vec<String>,
}

/// Purge `REMOVE` tickers and demote incomplete `VALID` tickers.
///
/// Afterwards every `VALID` ticker has non-empty balance sheet, income
/// statement and market cap data.
pub fn clean(
    layout: &CheckpointLayout,
    stores: &Stores,
    registry: &TickerRegistry,
    log: &QualityLog,
) -> Result<CleanReport, RegistryError> {
    let removed = registry.purge_removed();
    if !removed.is_empty() {
        stores.remove_everywhere(&removed)?;
    }

    let mut missing_info = Vec::new();
    for ticker in registry.list_valid() {
        let absent: Vec<MetricKind> = MetricKind::REQUIRED
            .into_iter()
            .filter(|kind| !stores.has_data(*kind, &ticker))
            .collect();
        if absent.is_empty() {
            continue;
        }
        for kind in &absent {
            log.record(&ticker, QualityCategory::Incomplete, format!("missing {kind} data"));
        }
        if registry.transition(&ticker, TickerState::MissingInfo).is_ok() {
            missing_info.push(ticker);
        }
    }

    if let Err(e) = registry.save(&layout.registry()) {
        warn!(error = %e, "registry checkpoint failed after cleaning");
    }
    info!(removed = removed.len(), missing_info = missing_info.len(), "cleaned");
    Ok(CleanReport {
        removed,
        missing_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use magicformula_core::checkpoint::write_json_atomic;
    use magicformula_core::domain::{LineItems, Period, StatementBundle, StatementEntry};

    fn bundle() -> StatementBundle {
        let items: LineItems = [("ebit".to_string(), 1.0)].into_iter().collect();
        StatementBundle::new(vec![StatementEntry::new(
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            items,
        )])
    }

    fn caps(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(t, v)| (t.to_string(), *v)).collect()
    }

    fn registry(valid: &[&str]) -> TickerRegistry {
        let registry = TickerRegistry::new();
        registry.ingest(valid.iter().map(|t| (t.to_string(), None)));
        for t in valid {
            registry.transition(t, TickerState::Valid).unwrap();
        }
        registry
    }

    #[test]
    fn later_process_wins_and_files_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CheckpointLayout::new(dir.path(), Period::Quarterly);
        write_json_atomic(&layout.metric_shard(MetricKind::MarketCap, 0), &caps(&[("A", 1.0), ("B", 2.0)]))
            .unwrap();
        write_json_atomic(&layout.metric_shard(MetricKind::MarketCap, 1), &caps(&[("A", 9.0)])).unwrap();

        let stores = Stores::open(&layout).unwrap();
        let reg = registry(&["A", "B"]);
        let log = QualityLog::new();
        let report = consolidate(&layout, &stores, &reg, &log).unwrap();

        assert_eq!(report.files[&MetricKind::MarketCap], 2);
        assert_eq!(stores.market_cap.get("A"), Some(9.0));
        assert_eq!(stores.market_cap.get("B"), Some(2.0));
        assert!(layout.shard_files(MetricKind::MarketCap).is_empty());
        let merged: BTreeMap<String, f64> =
            read_json(&layout.metric(MetricKind::MarketCap)).unwrap().unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn shard_removals_and_events_fold_into_parent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CheckpointLayout::new(dir.path(), Period::Quarterly);
        let mut removed = BTreeMap::new();
        removed.insert("XYZ".to_string(), TickerState::Remove);
        write_json_atomic(&layout.registry_shard(0), &removed).unwrap();
        let events = vec![DataQualityEvent {
            ticker: "XYZ".into(),
            category: QualityCategory::ProviderUnresolved,
            message: "null".into(),
        }];
        write_json_atomic(&layout.quality_shard(0), &events).unwrap();

        let stores = Stores::open(&layout).unwrap();
        let reg = registry(&["XYZ", "A"]);
        let log = QualityLog::new();
        let report = consolidate(&layout, &stores, &reg, &log).unwrap();

        assert_eq!(report.removals, 1);
        assert_eq!(reg.state("XYZ"), Some(TickerState::Remove));
        assert_eq!(log.count(QualityCategory::ProviderUnresolved), 1);
        assert!(layout.registry_shard_files().is_empty());
        assert!(layout.quality_shard_files().is_empty());
    }

    #[test]
    fn clean_purges_removed_and_demotes_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let layout = CheckpointLayout::new(dir.path(), Period::Quarterly);
        let stores = Stores::open(&layout).unwrap();
        let reg = registry(&["FULL", "PARTIAL", "GONE"]);
        reg.transition("GONE", TickerState::Remove).unwrap();

        for t in ["FULL", "PARTIAL", "GONE"] {
            stores.balance.commit([(t.to_string(), bundle())].into_iter().collect()).unwrap();
            stores.market_cap.commit(caps(&[(t, 1.0e9)])).unwrap();
        }
        stores
            .income
            .commit([("FULL".to_string(), bundle())].into_iter().collect())
            .unwrap();

        let log = QualityLog::new();
        let report = clean(&layout, &stores, &reg, &log).unwrap();

        assert_eq!(report.removed, vec!["GONE".to_string()]);
        assert_eq!(report.missing_info, vec!["PARTIAL".to_string()]);
        assert!(!reg.contains("GONE"));
        assert_eq!(stores.market_cap.get("GONE"), None);
        assert_eq!(reg.state("PARTIAL"), Some(TickerState::MissingInfo));
        assert_eq!(reg.list_valid(), vec!["FULL".to_string()]);
        assert_eq!(log.count(QualityCategory::Incomplete), 1);

        let on_disk: BTreeMap<String, f64> =
            read_json(&layout.metric(MetricKind::MarketCap)).unwrap().unwrap();
        assert!(!on_disk.contains_key("GONE"));
    }
}
