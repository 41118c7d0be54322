//! Ticker universe ingestion from an exchange screener CSV export.
//!
//! Expected columns (header row skipped): 0 symbol, 1 description,
//! 2 last sale (`$`-prefixed), 5 market cap, 6 country, 8 volume, 9 sector,
//! 10 industry. Rows with any empty cell, an unparsable price, cap or volume,
//! or a description naming a non-common instrument are skipped.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::SectorProfile;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("cannot read universe file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("universe file {0} has no usable rows")]
    Empty(PathBuf),
}

const SYMBOL: usize = 0;
const DESCRIPTION: usize = 1;
const LAST_SALE: usize = 2;
const MARKET_CAP: usize = 5;
const COUNTRY: usize = 6;
const VOLUME: usize = 8;
const SECTOR: usize = 9;
const INDUSTRY: usize = 10;

/// Description words that mark an instrument as something other than common stock.
const NON_COMMON_MARKERS: &[&str] = &[
    "WARRANT", "WARRANTS", "PREFERRED", "UNIT", "UNITS", "ETF", "INDEX",
];

/// One listed security from the screener export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub ticker: String,
    pub description: String,
    pub profile: SectorProfile,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Universe {
    pub entries: Vec<UniverseEntry>,
}

impl Universe {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(ticker, profile)` pairs for registry ingestion.
    pub fn registry_input(&self) -> impl Iterator<Item = (String, Option<SectorProfile>)> + '_ {
        self.entries
            .iter()
            .map(|e| (e.ticker.clone(), Some(e.profile.clone())))
    }
}

/// True unless the description names a warrant, preferred share, unit, ETF or index.
///
/// Matching is by whole word, case-insensitive.
pub fn is_common_stock(description: &str) -> bool {
    !description
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|word| {
            let upper = word.to_ascii_uppercase();
            NON_COMMON_MARKERS.contains(&upper.as_str())
        })
}

/// Keep digits and the decimal point (`"$1,234.50"` -> `1234.5`).
fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok()
}

fn parse_row(record: &csv::StringRecord) -> Option<UniverseEntry> {
    if record.iter().any(|cell| cell.trim().is_empty()) {
        return None;
    }
    let cell = |i: usize| record.get(i).map(str::trim);
    let description = cell(DESCRIPTION)?;
    if !is_common_stock(description) {
        return None;
    }
    for numeric in [LAST_SALE, MARKET_CAP, VOLUME] {
        parse_number(cell(numeric)?)?;
    }
    let owned = |i: usize| cell(i).map(str::to_string);
    Some(UniverseEntry {
        ticker: cell(SYMBOL)?.to_string(),
        description: description.to_string(),
        profile: SectorProfile {
            sector: owned(SECTOR),
            industry: owned(INDUSTRY),
            country: owned(COUNTRY),
        },
    })
}

/// Load the screener CSV at `path`.
pub fn load_universe_csv(path: &Path) -> Result<Universe, UniverseError> {
    let read_err = |source| UniverseError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(read_err)?;

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(read_err)?;
        match parse_row(&record) {
            Some(entry) => entries.push(entry),
            None => {
                skipped += 1;
                debug!(row = ?record.get(SYMBOL), "skipping universe row");
            }
        }
    }

    if entries.is_empty() {
        return Err(UniverseError::Empty(path.to_path_buf()));
    }
    info!(loaded = entries.len(), skipped, "universe loaded");
    Ok(Universe { entries })
}
