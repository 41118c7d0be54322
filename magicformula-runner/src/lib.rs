//! Magic Formula runner: batch scheduling, retrieval, fan-out and persistence.
//!
//! This crate builds on `magicformula-core` to provide:
//! - A rate-limited batch scheduler with a bounded in-flight window
//! - Retrieval workers that checkpoint after every batch
//! - The validation pass (dollar volume, then market cap)
//! - Process fan-out with per-process checkpoint files
//! - Consolidation and cleaning of those files
//! - The SQLite sink and CSV export
//! - The end-to-end pipeline behind the CLI

pub mod consolidate;
pub mod fanout;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod stores;
pub mod validation;
pub mod worker;

pub use consolidate::{clean, consolidate, CleanReport, ConsolidationReport};
pub use fanout::{
    build_shard_plans, read_plan, run_shard, split_evenly, FanoutError, InProcessLauncher,
    ShardLauncher, ShardOutcome, ShardPlan, ShardReport, SubprocessLauncher,
};
pub use pipeline::{Pipeline, PipelineError, RetrievalReport, Status, UniverseReport};
pub use scheduler::{partition_batches, Batch, BatchScheduler, SchedulerConfig, WorkerPanicked};
pub use sink::{export_csv, SinkError, StockDatabase};
pub use stores::Stores;
pub use validation::{ValidationReport, Validator};
pub use worker::{retrieve, run_worker, BatchOutcome, BatchReport, RetrievalPlan, WorkerContext};
