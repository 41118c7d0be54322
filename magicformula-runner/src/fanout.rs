//! Process fan-out.
//!
//! Retrieval lists are split across P independent processes. Each process gets
//! a [`ShardPlan`], runs its own scheduler and workers against process-local
//! stores, and reports back only through files: `*_{i}.json` metric
//! checkpoints, `ticker_dict_{i}.json` with its `REMOVE` decisions, and
//! `quality_log_{i}.json` with its data-quality events. Consolidation is the
//! only merge point.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use thiserror::Error;
use tracing::{error, info};

use magicformula_core::checkpoint::{read_json, remove_checkpoint, write_json_atomic};
use magicformula_core::data::FinancialDataProvider;
use magicformula_core::domain::TickerState;
use magicformula_core::{QualityLog, RegistryError, ScreenerConfig, StoreError, TickerRegistry};

use crate::scheduler::{BatchScheduler, SchedulerConfig};
use crate::stores::Stores;
use crate::worker::{retrieve, BatchReport, RetrievalPlan, WorkerContext};

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("shard plan not found: {0}")]
    MissingPlan(PathBuf),

    #[error("cannot locate current executable: {0}")]
    CurrentExe(#[source] io::Error),
}

/// Split `items` into `parts` contiguous runs whose lengths differ by at most
/// one; the earliest runs take the extra items.
pub fn split_evenly<T: Clone>(items: &[T], parts: usize) -> Vec<Vec<T>> {
    let parts = parts.max(1);
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(items[start..start + len].to_vec());
        start += len;
    }
    out
}

/// Work assigned to one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPlan {
    pub index: usize,
    pub config: ScreenerConfig,
    #[serde(flatten)]
    pub tickers: RetrievalPlan,
}

/// One plan per configured process, each metric list split evenly.
pub fn build_shard_plans(config: &ScreenerConfig, plan: &RetrievalPlan) -> Vec<ShardPlan> {
    let processes = config.processes.max(1);
    let balance = split_evenly(&plan.balance, processes);
    let income = split_evenly(&plan.income, processes);
    let market_cap = split_evenly(&plan.market_cap, processes);
    balance
        .into_iter()
        .zip(income)
        .zip(market_cap)
        .enumerate()
        .map(|(index, ((balance, income), market_cap))| ShardPlan {
            index,
            config: config.clone(),
            tickers: RetrievalPlan {
                balance,
                income,
                market_cap,
            },
        })
        .collect()
}

pub fn write_plan(plan: &ShardPlan) -> Result<PathBuf, FanoutError> {
    let path = plan.config.layout().shard_plan(plan.index);
    write_json_atomic(&path, plan)?;
    Ok(path)
}

pub fn read_plan(path: &Path) -> Result<ShardPlan, FanoutError> {
    read_json(path)?.ok_or_else(|| FanoutError::MissingPlan(path.to_path_buf()))
}

/// What one process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReport {
    pub index: usize,
    pub batches: Vec<BatchReport>,
    pub removed: usize,
    pub events: usize,
}

/// Execute one plan against process-local stores and write its result files.
pub fn run_shard(
    plan: &ShardPlan,
    provider: &dyn FinancialDataProvider,
) -> Result<ShardReport, FanoutError> {
    let layout = plan.config.layout();
    let stores = Stores::for_shard(&layout, plan.index);

    let tickers: BTreeSet<&String> = plan
        .tickers
        .balance
        .iter()
        .chain(&plan.tickers.income)
        .chain(&plan.tickers.market_cap)
        .collect();
    let registry = TickerRegistry::new();
    registry.ingest(tickers.iter().map(|t| ((*t).clone(), None)));
    for ticker in &tickers {
        registry.transition(ticker, TickerState::Valid)?;
    }

    let log = QualityLog::new();
    let ctx = WorkerContext {
        provider,
        registry: &registry,
        log: &log,
        period: plan.config.period,
    };
    let scheduler = BatchScheduler::new(SchedulerConfig::from(&plan.config));
    info!(process = plan.index, tickers = plan.tickers.total(), "shard starting");
    let batches = retrieve(&ctx, &scheduler, &stores, &plan.tickers);

    let removed: BTreeMap<String, TickerState> = registry
        .list_in(TickerState::Remove)
        .into_iter()
        .map(|t| (t, TickerState::Remove))
        .collect();
    write_json_atomic(&layout.registry_shard(plan.index), &removed)?;
    write_json_atomic(&layout.quality_shard(plan.index), &log.events())?;

    info!(process = plan.index, removed = removed.len(), events = log.len(), "shard finished");
    Ok(ShardReport {
        index: plan.index,
        batches,
        removed: removed.len(),
        events: log.len(),
    })
}

/// Exit state of one launched shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOutcome {
    pub index: usize,
    pub success: bool,
    pub detail: String,
}

/// Runs a set of shard plans to completion.
pub trait ShardLauncher {
    /// Blocks until every shard has finished, successfully or not.
    fn launch(&self, plans: &[ShardPlan]) -> Vec<ShardOutcome>;
}

/// Re-invokes a binary as `<program> <extra_args> shard --plan <file>` per shard.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    pub program: PathBuf,
    pub extra_args: Vec<String>,
}

impl SubprocessLauncher {
    /// Launch copies of the running executable.
    pub fn current(extra_args: Vec<String>) -> Result<Self, FanoutError> {
        Ok(Self {
            program: std::env::current_exe().map_err(FanoutError::CurrentExe)?,
            extra_args,
        })
    }

    fn spawn(&self, plan: &ShardPlan) -> Result<(PathBuf, Child), String> {
        let path = write_plan(plan).map_err(|e| e.to_string())?;
        let child = Command::new(&self.program)
            .args(&self.extra_args)
            .arg("shard")
            .arg("--plan")
            .arg(&path)
            .spawn()
            .map_err(|e| format!("spawn failed: {e}"))?;
        info!(process = plan.index, pid = child.id(), "shard process started");
        Ok((path, child))
    }
}

impl ShardLauncher for SubprocessLauncher {
    fn launch(&self, plans: &[ShardPlan]) -> Vec<ShardOutcome> {
        let spawned: Vec<(usize, Result<(PathBuf, Child), String>)> =
            plans.iter().map(|p| (p.index, self.spawn(p))).collect();

        spawned
            .into_iter()
            .map(|(index, started)| {
                let (success, detail) = match started {
                    Ok((plan_path, mut child)) => {
                        let waited = child.wait();
                        if let Err(e) = remove_checkpoint(&plan_path) {
                            error!(process = index, error = %e, "could not delete shard plan");
                        }
                        match waited {
                            Ok(status) if status.success() => (true, status.to_string()),
                            Ok(status) => (false, status.to_string()),
                            Err(e) => (false, format!("wait failed: {e}")),
                        }
                    }
                    Err(detail) => (false, detail),
                };
                if !success {
                    error!(process = index, %detail, "shard process failed");
                }
                ShardOutcome {
                    index,
                    success,
                    detail,
                }
            })
            .collect()
    }
}

/// Runs each shard on its own thread inside this process, sharing only the provider.
pub struct InProcessLauncher<'a> {
    pub provider: &'a dyn FinancialDataProvider,
}

impl ShardLauncher for InProcessLauncher<'_> {
    fn launch(&self, plans: &[ShardPlan]) -> Vec<ShardOutcome> {
        thread::scope(|scope| {
            let handles: Vec<_> = plans
                .iter()
                .map(|plan| (plan.index, scope.spawn(move || run_shard(plan, self.provider))))
                .collect();
            handles
                .into_iter()
                .map(|(index, handle)| {
                    let (success, detail) = match handle.join() {
                        Ok(Ok(report)) => (
                            true,
                            format!("{} batches, {} removed", report.batches.len(), report.removed),
                        ),
                        Ok(Err(e)) => (false, e.to_string()),
                        Err(_) => (false, "shard thread panicked".to_string()),
                    };
                    ShardOutcome {
                        index,
                        success,
                        detail,
                    }
                })
                .collect()
        })
    }
}
