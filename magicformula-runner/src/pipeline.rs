//! End-to-end entry points: universe refresh, validation, retrieval,
//! database update and ranking.
//!
//! A [`Pipeline`] owns the authoritative registry, the four metric stores and
//! the quality log for one data directory. Every entry point leaves the
//! checkpoints consistent, so any of them can be interrupted and resumed.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use magicformula_core::checkpoint::write_json_atomic;
use magicformula_core::data::{load_universe_csv, FinancialDataProvider, UniverseError};
use magicformula_core::domain::{MetricKind, TickerState};
use magicformula_core::metrics::compute_all;
use magicformula_core::ranking::{RankedRow, ScreenRow};
use magicformula_core::registry::StateCounts;
use magicformula_core::{
    CheckpointLayout, ConfigError, QualityLog, RegistryError, RunSummary, ScreenerConfig,
    StoreError, TickerRegistry,
};

use crate::consolidate::{clean, consolidate, CleanReport, ConsolidationReport};
use crate::fanout::{build_shard_plans, FanoutError, ShardLauncher, ShardOutcome};
use crate::scheduler::{BatchScheduler, SchedulerConfig};
use crate::sink::{export_csv, SinkError, StockDatabase};
use crate::stores::Stores;
use crate::validation::{ValidationReport, Validator};
use crate::worker::{retrieve, BatchReport, RetrievalPlan, WorkerContext};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Universe(#[from] UniverseError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Fanout(#[from] FanoutError),

    #[error("{failed} of {total} retrieval processes failed")]
    ShardsFailed { failed: usize, total: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniverseReport {
    pub rows: usize,
    pub added: usize,
}

/// What one retrieval run did.
#[derive(Debug, Clone, Default)]
pub struct RetrievalReport {
    pub plan: RetrievalPlan,
    pub validation: Option<ValidationReport>,
    pub requeued: usize,
    /// Batch reports for in-process retrieval (empty when fanned out).
    pub batches: Vec<BatchReport>,
    pub shards: Vec<ShardOutcome>,
    pub consolidation: ConsolidationReport,
    pub cleaning: CleanReport,
}

/// Registry and store sizes for `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub counts: StateCounts,
    pub stored: BTreeMap<MetricKind, usize>,
    pub pending_shard_files: usize,
}

pub struct Pipeline<'a> {
    config: ScreenerConfig,
    provider: &'a dyn FinancialDataProvider,
    layout: CheckpointLayout,
    registry: TickerRegistry,
    stores: Stores,
    log: QualityLog,
    removed: AtomicUsize,
}

impl<'a> Pipeline<'a> {
    /// Open the data directory described by `config`, resuming every checkpoint.
    pub fn open(
        config: ScreenerConfig,
        provider: &'a dyn FinancialDataProvider,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let layout = config.layout();
        let registry = TickerRegistry::load(&layout.registry())?;
        let stores = Stores::open(&layout)?;
        info!(
            data_dir = %layout.root().display(),
            tickers = registry.len(),
            provider = provider.name(),
            "pipeline opened"
        );
        Ok(Self {
            config,
            provider,
            layout,
            registry,
            stores,
            log: QualityLog::new(),
            removed: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    pub fn registry(&self) -> &TickerRegistry {
        &self.registry
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn log(&self) -> &QualityLog {
        &self.log
    }

    pub fn layout(&self) -> &CheckpointLayout {
        &self.layout
    }

    fn ctx(&self) -> WorkerContext<'_> {
        WorkerContext {
            provider: self.provider,
            registry: &self.registry,
            log: &self.log,
            period: self.config.period,
        }
    }

    fn scheduler(&self) -> BatchScheduler {
        BatchScheduler::new(SchedulerConfig::from(&self.config))
    }

    /// Ingest a universe CSV. New tickers start `NOT_VALIDATED`.
    pub fn refresh_universe(&self, csv: &Path) -> Result<UniverseReport, PipelineError> {
        let universe = load_universe_csv(csv)?;
        let added = self.registry.ingest(universe.registry_input());
        self.registry.save(&self.layout.registry())?;
        write_json_atomic(&self.layout.sector_info(), &self.registry.profiles())?;
        info!(rows = universe.len(), added, "universe refreshed");
        Ok(UniverseReport {
            rows: universe.len(),
            added,
        })
    }

    /// Validate `NOT_VALIDATED` tickers. With `new_only == false` every
    /// surviving ticker is reset and validated again.
    pub fn validate(&self, new_only: bool) -> Result<ValidationReport, PipelineError> {
        if !new_only {
            let reset = self.registry.reset_for_revalidation();
            info!(reset, "re-validating every ticker");
        }
        let pending = self.registry.list_in(TickerState::NotValidated);
        if pending.is_empty() {
            info!("nothing to validate");
            return Ok(ValidationReport::default());
        }
        let validator = Validator {
            ctx: self.ctx(),
            thresholds: self.config.thresholds(),
            volume_store: &self.stores.volume_price,
            cap_store: &self.stores.market_cap,
            registry_path: Some(self.layout.registry()),
        };
        let report = validator.validate(&self.scheduler(), &pending);
        self.registry.save(&self.layout.registry())?;
        Ok(report)
    }

    /// Refresh statements for every `VALID` ticker. Market caps are fetched
    /// only where validation left none.
    pub fn retrieve_all(
        &self,
        launcher: &dyn ShardLauncher,
    ) -> Result<RetrievalReport, PipelineError> {
        let mut report = RetrievalReport {
            consolidation: consolidate(&self.layout, &self.stores, &self.registry, &self.log)?,
            ..RetrievalReport::default()
        };
        report.requeued = self.registry.requeue_missing().len();
        let valid = self.registry.list_valid();
        let plan = RetrievalPlan {
            market_cap: self.stores.missing_from(MetricKind::MarketCap, &valid),
            balance: valid.clone(),
            income: valid,
        };
        self.execute(plan, launcher, &mut report)?;
        Ok(report)
    }

    /// Resume: merge leftovers, validate what is pending, then fetch only
    /// what each store is missing.
    pub fn continue_retrieval(
        &self,
        launcher: &dyn ShardLauncher,
    ) -> Result<RetrievalReport, PipelineError> {
        let mut report = RetrievalReport {
            consolidation: consolidate(&self.layout, &self.stores, &self.registry, &self.log)?,
            ..RetrievalReport::default()
        };
        if !report.consolidation.is_empty() {
            info!(removals = report.consolidation.removals, "merged files from an interrupted run");
        }
        if self.registry.counts().not_validated > 0 {
            report.validation = Some(self.validate(true)?);
        }
        report.requeued = self.registry.requeue_missing().len();

        let valid = self.registry.list_valid();
        let plan = RetrievalPlan {
            balance: self.stores.missing_from(MetricKind::BalanceSheet, &valid),
            income: self.stores.missing_from(MetricKind::IncomeStatement, &valid),
            market_cap: self.stores.missing_from(MetricKind::MarketCap, &valid),
        };
        self.execute(plan, launcher, &mut report)?;
        Ok(report)
    }

    fn execute(
        &self,
        plan: RetrievalPlan,
        launcher: &dyn ShardLauncher,
        report: &mut RetrievalReport,
    ) -> Result<(), PipelineError> {
        info!(
            balance = plan.balance.len(),
            income = plan.income.len(),
            market_cap = plan.market_cap.len(),
            processes = self.config.processes,
            "retrieval plan"
        );

        let mut failed = 0;
        if plan.is_empty() {
            info!("every valid ticker already has data");
        } else if self.config.processes <= 1 {
            report.batches = retrieve(&self.ctx(), &self.scheduler(), &self.stores, &plan);
            self.registry.save(&self.layout.registry())?;
        } else {
            let shard_plans = build_shard_plans(&self.config, &plan);
            report.shards = launcher.launch(&shard_plans);
            failed = report.shards.iter().filter(|s| !s.success).count();
            let merged = consolidate(&self.layout, &self.stores, &self.registry, &self.log)?;
            report.consolidation.removals += merged.removals;
            report.consolidation.events += merged.events;
            for (kind, n) in merged.files {
                *report.consolidation.files.entry(kind).or_insert(0) += n;
            }
            for (kind, n) in merged.entries {
                *report.consolidation.entries.entry(kind).or_insert(0) += n;
            }
        }
        report.plan = plan;

        report.cleaning = clean(&self.layout, &self.stores, &self.registry, &self.log)?;
        self.removed
            .fetch_add(report.cleaning.removed.len(), Ordering::Relaxed);

        if failed > 0 {
            warn!(failed, "some retrieval processes failed; rerun with --continue");
            return Err(PipelineError::ShardsFailed {
                failed,
                total: report.shards.len(),
            });
        }
        Ok(())
    }

    /// Compute metrics for every fully retrieved ticker and rewrite the
    /// database. Returns the number of rows written.
    pub fn update_database(&self) -> Result<usize, PipelineError> {
        let valid: Vec<String> = self
            .registry
            .list_valid()
            .into_iter()
            .filter(|t| {
                MetricKind::REQUIRED
                    .iter()
                    .all(|kind| self.stores.has_data(*kind, t))
            })
            .collect();

        let metrics = compute_all(
            &valid,
            &self.stores.balance.snapshot(),
            &self.stores.income.snapshot(),
            &self.stores.market_cap.snapshot(),
            &self.log,
        );
        let rows: Vec<ScreenRow> = metrics
            .iter()
            .map(|(ticker, m)| ScreenRow::from_metrics(ticker.as_str(), m, self.registry.profile(ticker).as_ref()))
            .collect();

        let mut db = StockDatabase::open(&self.config.database_path())?;
        let written = db.replace_stock_info(&rows)?;
        db.replace_errors(&self.log.events())?;
        info!(eligible = valid.len(), written, "database updated");
        Ok(written)
    }

    /// Run the ranked query and export it to the configured CSV.
    pub fn rank(&self, today: NaiveDate) -> Result<Vec<RankedRow>, PipelineError> {
        let db = StockDatabase::open(&self.config.database_path())?;
        let ranked = db.ranked(today, self.config.recency_window_days)?;
        export_csv(&ranked, &self.config.ranking_csv_path())?;
        Ok(ranked)
    }

    pub fn status(&self) -> Status {
        let stored = [
            MetricKind::BalanceSheet,
            MetricKind::IncomeStatement,
            MetricKind::MarketCap,
            MetricKind::VolumePrice,
        ]
        .into_iter()
        .map(|kind| (kind, self.stores.len(kind)))
        .collect();
        let pending_shard_files = [
            MetricKind::BalanceSheet,
            MetricKind::IncomeStatement,
            MetricKind::MarketCap,
            MetricKind::VolumePrice,
        ]
        .into_iter()
        .map(|kind| self.layout.shard_files(kind).len())
        .sum::<usize>()
            + self.layout.registry_shard_files().len();
        Status {
            counts: self.registry.counts(),
            stored,
            pending_shard_files,
        }
    }

    /// Event counts plus pipeline totals.
    pub fn summary(&self, ranked: usize) -> RunSummary {
        let mut summary = self.log.summary();
        summary.ranked = ranked;
        summary.removed = self.removed.load(Ordering::Relaxed);
        summary.missing_info = self.registry.counts().missing_info;
        summary
    }
}
