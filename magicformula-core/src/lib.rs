//! Magic Formula core: domain types, ticker registry, checkpoint stores,
//! field resolution, metric engine, ranking, and the data-provider boundary.
//!
//! Nothing in this crate schedules work. The runner owns threads and processes;
//! everything here is either pure or guarded by its own lock.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod domain;
pub mod fields;
pub mod metrics;
pub mod quality;
pub mod ranking;
pub mod registry;
pub mod store;

pub use checkpoint::{CheckpointLayout, StoreError};
pub use config::{ConfigError, ProviderConfig, ScreenerConfig};
pub use quality::{DataQualityEvent, QualityCategory, QualityLog, RunSummary};
pub use registry::{RegistryError, Thresholds, TickerRegistry};
pub use store::{MetricStore, Payload};
