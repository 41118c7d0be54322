//! Domain types: ticker states, statement bundles, market snapshots.

pub mod market;
pub mod statement;
pub mod ticker;

pub use market::{MetricKind, VolumePrice};
pub use statement::{LineItems, Period, StatementBundle, StatementEntry, StatementKind};
pub use ticker::{SectorProfile, TickerRecord, TickerState};

/// Ticker symbol.
pub type Ticker = String;
