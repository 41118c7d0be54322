//! Data provider boundary and universe ingestion.

pub mod circuit_breaker;
pub mod provider;
pub mod static_provider;
pub mod universe;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use provider::{partition_response, BatchResponse, FinancialDataProvider, ProviderError};
pub use static_provider::{ProviderCall, StaticProvider};
pub use universe::{is_common_stock, load_universe_csv, Universe, UniverseEntry, UniverseError};
pub use yahoo::YahooProvider;
