//! Retrieval workers: one provider call per batch, one store commit per batch.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use magicformula_core::data::{partition_response, BatchResponse, FinancialDataProvider, ProviderError};
use magicformula_core::domain::{MetricKind, Period, StatementKind, TickerState};
use magicformula_core::{MetricStore, Payload, QualityCategory, QualityLog, TickerRegistry};

use crate::scheduler::{Batch, BatchScheduler};
use crate::stores::Stores;

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Resolved payloads were merged and checkpointed.
    Committed,
    /// The provider call failed; nothing was committed, tickers stay retryable.
    ProviderFailed,
    /// The checkpoint write failed; the batch was not committed.
    PersistenceFailed,
    /// The worker panicked.
    Panicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub metric: MetricKind,
    pub batch: usize,
    pub requested: usize,
    pub committed: usize,
    /// Tickers the provider omitted or returned null for (now `REMOVE`).
    pub unresolved: Vec<String>,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    fn new(metric: MetricKind, batch: &Batch) -> Self {
        Self {
            metric,
            batch: batch.index,
            requested: batch.tickers.len(),
            committed: 0,
            unresolved: Vec::new(),
            outcome: BatchOutcome::Committed,
        }
    }
}

/// Shared collaborators every worker sees.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    pub provider: &'a dyn FinancialDataProvider,
    pub registry: &'a TickerRegistry,
    pub log: &'a QualityLog,
    pub period: Period,
}

/// Move unresolved tickers to `REMOVE`. Takes only the registry lock.
pub(crate) fn mark_removed(
    ctx: &WorkerContext<'_>,
    tickers: &[String],
    category: QualityCategory,
    reason: &str,
) {
    for ticker in tickers {
        ctx.log.record(ticker, category, reason.to_string());
        if let Err(e) = ctx.registry.transition(ticker, TickerState::Remove) {
            warn!(ticker = %ticker, error = %e, "could not mark ticker for removal");
        }
    }
}

/// Refuse the call without touching the network while the provider is unavailable.
pub(crate) fn call_provider<T>(
    ctx: &WorkerContext<'_>,
    call: impl FnOnce() -> Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    if ctx.provider.is_available() {
        call()
    } else {
        Err(ProviderError::CircuitBreakerTripped)
    }
}

fn is_removed(ctx: &WorkerContext<'_>, ticker: &str) -> bool {
    ctx.registry.state(ticker) == Some(TickerState::Remove)
}

pub(crate) fn record_batch(log: &QualityLog, tickers: &[String], category: QualityCategory, msg: &str) {
    for ticker in tickers {
        log.record(ticker, category, msg.to_string());
    }
}

/// Fetch one batch and commit it to `store`.
///
/// Never fails: provider errors, unresolved tickers and write failures all
/// end up in the quality log and the returned report.
pub fn run_worker<T, F>(
    ctx: &WorkerContext<'_>,
    metric: MetricKind,
    store: &MetricStore<T>,
    batch: &Batch,
    fetch: F,
) -> BatchReport
where
    T: Payload,
    F: Fn(&[String]) -> Result<BatchResponse<T>, ProviderError>,
{
    let mut report = BatchReport::new(metric, batch);
    let tickers: Vec<String> = batch
        .tickers
        .iter()
        .filter(|t| !is_removed(ctx, t))
        .cloned()
        .collect();
    report.requested = tickers.len();
    if tickers.is_empty() {
        debug!(metric = %metric, batch = batch.index + 1, "every ticker already removed");
        return report;
    }
    info!(metric = %metric, batch = batch.index + 1, tickers = tickers.len(), "retrieving batch");

    let response = match call_provider(ctx, || fetch(&tickers)) {
        Ok(response) => response,
        Err(e) => {
            record_batch(
                ctx.log,
                &tickers,
                QualityCategory::BatchFailed,
                &format!("{metric} batch {} failed: {e}", batch.index + 1),
            );
            report.outcome = BatchOutcome::ProviderFailed;
            return report;
        }
    };

    let (mut resolved, mut unresolved) = partition_response(&tickers, response);
    let nulls: Vec<String> = resolved
        .iter()
        .filter(|(_, payload)| payload.is_null_payload())
        .map(|(ticker, _)| ticker.clone())
        .collect();
    for ticker in nulls {
        resolved.remove(&ticker);
        unresolved.push(ticker);
    }

    if !unresolved.is_empty() {
        mark_removed(
            ctx,
            &unresolved,
            QualityCategory::ProviderUnresolved,
            &format!("no {metric} data from provider"),
        );
    }
    report.unresolved = unresolved;
    resolved.retain(|ticker, _| !is_removed(ctx, ticker));

    match store.commit(resolved) {
        Ok(count) => {
            report.committed = count;
            info!(metric = %metric, batch = batch.index + 1, committed = count, "batch checkpointed");
        }
        Err(e) => {
            let committed_tickers: Vec<String> = tickers
                .iter()
                .filter(|t| !report.unresolved.contains(t))
                .cloned()
                .collect();
            record_batch(
                ctx.log,
                &committed_tickers,
                QualityCategory::PersistenceFailure,
                &format!("{metric} batch {} not saved: {e}", batch.index + 1),
            );
            report.outcome = BatchOutcome::PersistenceFailed;
        }
    }
    report
}

/// Ticker lists per metric for one retrieval pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetrievalPlan {
    pub balance: Vec<String>,
    pub income: Vec<String>,
    pub market_cap: Vec<String>,
}

impl RetrievalPlan {
    /// The same list for every metric.
    pub fn uniform(tickers: Vec<String>) -> Self {
        Self {
            balance: tickers.clone(),
            income: tickers.clone(),
            market_cap: tickers,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.balance.is_empty() && self.income.is_empty() && self.market_cap.is_empty()
    }

    pub fn total(&self) -> usize {
        self.balance.len() + self.income.len() + self.market_cap.len()
    }
}

fn collect_reports(
    metric: MetricKind,
    results: Vec<Result<BatchReport, crate::scheduler::WorkerPanicked>>,
    reports: &mut Vec<BatchReport>,
) {
    for result in results {
        reports.push(result.unwrap_or_else(|panic| BatchReport {
            metric,
            batch: panic.batch,
            requested: 0,
            committed: 0,
            unresolved: Vec::new(),
            outcome: BatchOutcome::Panicked,
        }));
    }
}

/// Fetch one batch, then purge its newly removed tickers from every store.
fn run_and_purge<T, F>(
    ctx: &WorkerContext<'_>,
    metric: MetricKind,
    stores: &Stores,
    store: &MetricStore<T>,
    batch: &Batch,
    fetch: F,
) -> BatchReport
where
    T: Payload,
    F: Fn(&[String]) -> Result<BatchResponse<T>, ProviderError>,
{
    let report = run_worker(ctx, metric, store, batch, fetch);
    if !report.unresolved.is_empty() {
        if let Err(e) = stores.remove_everywhere(&report.unresolved) {
            record_batch(
                ctx.log,
                &report.unresolved,
                QualityCategory::PersistenceFailure,
                &format!("removed tickers of {metric} batch {} not purged: {e}", batch.index + 1),
            );
        }
    }
    report
}

/// Run the scheduler once per metric: balance sheets, income statements, market caps.
///
/// A ticker removed by an earlier metric is skipped by the later ones.
pub fn retrieve(
    ctx: &WorkerContext<'_>,
    scheduler: &BatchScheduler,
    stores: &Stores,
    plan: &RetrievalPlan,
) -> Vec<BatchReport> {
    let mut reports = Vec::new();

    for (kind, tickers, store) in [
        (StatementKind::Balance, &plan.balance, &stores.balance),
        (StatementKind::Income, &plan.income, &stores.income),
    ] {
        if tickers.is_empty() {
            continue;
        }
        let metric = MetricKind::from(kind);
        let results = scheduler.run(tickers, |batch| {
            run_and_purge(ctx, metric, stores, store, batch, |t| {
                ctx.provider.fetch_statements(t, ctx.period, kind)
            })
        });
        collect_reports(metric, results, &mut reports);
    }

    if !plan.market_cap.is_empty() {
        let results = scheduler.run(&plan.market_cap, |batch| {
            run_and_purge(ctx, MetricKind::MarketCap, stores, &stores.market_cap, batch, |t| {
                ctx.provider.fetch_market_cap(t)
            })
        });
        collect_reports(MetricKind::MarketCap, results, &mut reports);
    }

    reports
}

/// Committed ticker count per metric across `reports`.
pub fn committed_by_metric(reports: &[BatchReport]) -> BTreeMap<MetricKind, usize> {
    let mut totals = BTreeMap::new();
    for report in reports {
        *totals.entry(report.metric).or_insert(0) += report.committed;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use chrono::NaiveDate;
    use magicformula_core::checkpoint::read_json;
    use magicformula_core::data::StaticProvider;
    use magicformula_core::domain::{LineItems, StatementBundle, StatementEntry};
    use std::time::Duration;

    fn bundle(ebit: f64) -> StatementBundle {
        let items: LineItems = [("ebit".to_string(), ebit)].into_iter().collect();
        StatementBundle::new(vec![StatementEntry::new(
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            items,
        )])
    }

    fn valid_registry(tickers: &[&str]) -> TickerRegistry {
        let registry = TickerRegistry::new();
        registry.ingest(tickers.iter().map(|t| (t.to_string(), None)));
        for t in tickers {
            registry.transition(t, TickerState::Valid).unwrap();
        }
        registry
    }

    fn batch(tickers: &[&str]) -> Batch {
        Batch {
            index: 0,
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn null_market_cap_removes_ticker_and_skips_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market_cap_info.json");
        let store: MetricStore<f64> = MetricStore::new(MetricKind::MarketCap, &path);
        let provider = StaticProvider::new()
            .with_market_cap("AAPL", Some(3.0e12))
            .with_market_cap("XYZ", None);
        let registry = valid_registry(&["AAPL", "XYZ"]);
        let log = QualityLog::new();
        let ctx = WorkerContext {
            provider: &provider,
            registry: &registry,
            log: &log,
            period: Period::Quarterly,
        };

        let report = run_worker(&ctx, MetricKind::MarketCap, &store, &batch(&["AAPL", "XYZ"]), |t| {
            provider.fetch_market_cap(t)
        });

        assert_eq!(report.outcome, BatchOutcome::Committed);
        assert_eq!(report.unresolved, vec!["XYZ".to_string()]);
        assert_eq!(registry.state("XYZ"), Some(TickerState::Remove));
        let on_disk: BTreeMap<String, f64> = read_json(&path).unwrap().unwrap();
        assert!(!on_disk.contains_key("XYZ"));
        assert_eq!(log.count(QualityCategory::ProviderUnresolved), 1);
    }

    #[test]
    fn removed_tickers_are_skipped_before_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let store: MetricStore<f64> =
            MetricStore::new(MetricKind::MarketCap, dir.path().join("market_cap_info.json"));
        let provider = StaticProvider::new()
            .with_market_cap("A", Some(1.0e9))
            .with_market_cap("GONE", Some(2.0e9));
        let registry = valid_registry(&["A", "GONE"]);
        registry.transition("GONE", TickerState::Remove).unwrap();
        let log = QualityLog::new();
        let ctx = WorkerContext {
            provider: &provider,
            registry: &registry,
            log: &log,
            period: Period::Quarterly,
        };

        let report = run_worker(&ctx, MetricKind::MarketCap, &store, &batch(&["A", "GONE"]), |t| {
            provider.fetch_market_cap(t)
        });

        assert_eq!(report.requested, 1);
        assert_eq!(provider.requested("cap"), vec!["A".to_string()]);
        assert!(store.get("GONE").is_none());

        let all_gone = run_worker(&ctx, MetricKind::MarketCap, &store, &batch(&["GONE"]), |t| {
            provider.fetch_market_cap(t)
        });
        assert_eq!(all_gone.requested, 0);
        assert_eq!(provider.calls().len(), 1);
    }

    #[test]
    fn unavailable_provider_is_not_called() {
        let dir = tempfile::tempdir().unwrap();
        let store: MetricStore<f64> =
            MetricStore::new(MetricKind::MarketCap, dir.path().join("market_cap_info.json"));
        let provider = StaticProvider::new()
            .with_market_cap("A", Some(1.0e9))
            .unavailable();
        let registry = valid_registry(&["A"]);
        let log = QualityLog::new();
        let ctx = WorkerContext {
            provider: &provider,
            registry: &registry,
            log: &log,
            period: Period::Quarterly,
        };

        let report = run_worker(&ctx, MetricKind::MarketCap, &store, &batch(&["A"]), |t| {
            provider.fetch_market_cap(t)
        });

        assert_eq!(report.outcome, BatchOutcome::ProviderFailed);
        assert!(provider.calls().is_empty());
        assert_eq!(registry.state("A"), Some(TickerState::Valid));
        assert_eq!(log.count(QualityCategory::BatchFailed), 1);
    }

    #[test]
    fn provider_failure_commits_nothing_and_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let store: MetricStore<StatementBundle> =
            MetricStore::new(MetricKind::BalanceSheet, dir.path().join("bs.json"));
        let provider = StaticProvider::new().failing_after(0);
        let registry = valid_registry(&["A", "B"]);
        let log = QualityLog::new();
        let ctx = WorkerContext {
            provider: &provider,
            registry: &registry,
            log: &log,
            period: Period::Quarterly,
        };

        let report = run_worker(&ctx, MetricKind::BalanceSheet, &store, &batch(&["A", "B"]), |t| {
            provider.fetch_statements(t, Period::Quarterly, StatementKind::Balance)
        });

        assert_eq!(report.outcome, BatchOutcome::ProviderFailed);
        assert!(store.is_empty());
        assert!(!dir.path().join("bs.json").exists());
        assert_eq!(registry.list_valid().len(), 2);
        assert_eq!(log.count(QualityCategory::BatchFailed), 2);
    }

    #[test]
    fn empty_bundle_is_committed_for_cleaning_to_judge() {
        let dir = tempfile::tempdir().unwrap();
        let store: MetricStore<StatementBundle> =
            MetricStore::new(MetricKind::IncomeStatement, dir.path().join("is.json"));
        let provider = StaticProvider::new()
            .with_statements("A", StatementKind::Income, Some(StatementBundle::default()));
        let registry = valid_registry(&["A"]);
        let log = QualityLog::new();
        let ctx = WorkerContext {
            provider: &provider,
            registry: &registry,
            log: &log,
            period: Period::Quarterly,
        };

        run_worker(&ctx, MetricKind::IncomeStatement, &store, &batch(&["A"]), |t| {
            provider.fetch_statements(t, Period::Quarterly, StatementKind::Income)
        });
        assert_eq!(registry.state("A"), Some(TickerState::Valid));
        assert_eq!(store.len(), 1);
        assert!(!store.has_data("A"));
    }

    #[test]
    fn retrieve_fills_every_store_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let layout = magicformula_core::CheckpointLayout::new(dir.path(), Period::Quarterly);
        let stores = Stores::for_shard(&layout, 0);
        let names = ["A", "B", "C", "D", "E"];
        let mut provider = StaticProvider::new();
        for (i, t) in names.iter().enumerate() {
            provider = provider
                .with_statements(t, StatementKind::Balance, Some(bundle(1.0)))
                .with_statements(t, StatementKind::Income, Some(bundle(i as f64)))
                .with_market_cap(t, Some(1.0e9));
        }
        let registry = valid_registry(&names);
        let log = QualityLog::new();
        let ctx = WorkerContext {
            provider: &provider,
            registry: &registry,
            log: &log,
            period: Period::Quarterly,
        };
        let scheduler = BatchScheduler::new(SchedulerConfig {
            batch_size: 2,
            max_in_flight: 2,
            launch_delay: Duration::ZERO,
        });

        let plan = RetrievalPlan::uniform(registry.list_valid());
        let reports = retrieve(&ctx, &scheduler, &stores, &plan);

        assert_eq!(reports.len(), 9);
        let totals = committed_by_metric(&reports);
        assert_eq!(totals[&MetricKind::BalanceSheet], 5);
        assert_eq!(totals[&MetricKind::MarketCap], 5);
        assert_eq!(provider.calls().len(), 9);
        assert!(layout.metric_shard(MetricKind::IncomeStatement, 0).exists());
    }
}
