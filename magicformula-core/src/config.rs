//! Screener configuration, loadable from TOML with every field defaulted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::checkpoint::CheckpointLayout;
use crate::domain::Period;
use crate::registry::Thresholds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// HTTP provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 3,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

/// Top-level configuration for a screening run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    /// Tickers per batch; 0 puts every ticker in a single batch.
    pub batch_size: usize,
    /// Maximum concurrently running workers per process.
    pub max_in_flight: usize,
    /// Pause after each worker launch.
    pub launch_delay_ms: u64,
    pub min_market_cap: f64,
    pub min_dollar_volume: f64,
    pub recency_window_days: i64,
    pub period: Period,
    /// OS processes used for retrieval.
    pub processes: usize,
    pub data_dir: PathBuf,
    /// SQLite file, relative to `data_dir` unless absolute.
    pub database: PathBuf,
    /// Ranking CSV export, relative to `data_dir` unless absolute.
    pub ranking_csv: PathBuf,
    pub provider: ProviderConfig,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_in_flight: 3,
            launch_delay_ms: 3000,
            min_market_cap: 50_000_000.0,
            min_dollar_volume: 10_000_000.0,
            recency_window_days: 400,
            period: Period::Quarterly,
            processes: 1,
            data_dir: PathBuf::from("data"),
            database: PathBuf::from("stock_info.db"),
            ranking_csv: PathBuf::from("stock_info.csv"),
            provider: ProviderConfig::default(),
        }
    }
}

impl ScreenerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".into()));
        }
        if self.processes == 0 {
            return Err(ConfigError::Invalid("processes must be at least 1".into()));
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !non_negative(self.min_market_cap) || !non_negative(self.min_dollar_volume) {
            return Err(ConfigError::Invalid(
                "thresholds must be non-negative numbers".into(),
            ));
        }
        if self.recency_window_days <= 0 {
            return Err(ConfigError::Invalid(
                "recency_window_days must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_market_cap: self.min_market_cap,
            min_dollar_volume: self.min_dollar_volume,
        }
    }

    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }

    pub fn layout(&self) -> CheckpointLayout {
        CheckpointLayout::new(&self.data_dir, self.period)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }

    pub fn ranking_csv_path(&self) -> PathBuf {
        self.data_dir.join(&self.ranking_csv)
    }
}
