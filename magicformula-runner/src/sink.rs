//! SQLite sink for screen rows and data-quality events.

use chrono::{Duration, NaiveDate};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use magicformula_core::ranking::{RankedRow, ScreenRow};
use magicformula_core::DataQualityEvent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("csv export to {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cannot create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const RANKED_QUERY: &str = "
    SELECT ticker, roc, yield, market_cap, most_recent, sector, industry, country,
           roc_rank, yield_rank, roc_rank + yield_rank AS magic_rank
    FROM (
        SELECT *,
               RANK() OVER (ORDER BY roc DESC) AS roc_rank,
               RANK() OVER (ORDER BY yield DESC) AS yield_rank
        FROM stock_info
        WHERE most_recent > ?1
    )
    ORDER BY magic_rank, ticker";

/// The screener database.
#[derive(Debug)]
pub struct StockDatabase {
    conn: Connection,
}

impl StockDatabase {
    /// Open (or create) the database file, creating its parent directory.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stock_info (
                ticker TEXT PRIMARY KEY,
                roc REAL NOT NULL,
                yield REAL NOT NULL,
                market_cap REAL NOT NULL,
                most_recent DATE NOT NULL,
                sector TEXT,
                industry TEXT,
                country TEXT
            );
            CREATE TABLE IF NOT EXISTS errors (
                error_id INTEGER PRIMARY KEY,
                ticker TEXT NOT NULL,
                category TEXT NOT NULL,
                error TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Drop every stored row and write `rows` in one transaction.
    pub fn replace_stock_info(&mut self, rows: &[ScreenRow]) -> Result<usize, SinkError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM stock_info", [])?;
        {
            let mut stmt = tx.prepare(
                "REPLACE INTO stock_info
                 (ticker, roc, yield, market_cap, most_recent, sector, industry, country)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.ticker,
                    row.roc,
                    row.earnings_yield,
                    row.market_cap,
                    row.most_recent.to_string(),
                    row.sector,
                    row.industry,
                    row.country,
                ])?;
            }
        }
        tx.commit()?;
        info!(rows = rows.len(), "stock_info updated");
        Ok(rows.len())
    }

    /// Replace the `errors` table contents with `events`.
    pub fn replace_errors(&mut self, events: &[DataQualityEvent]) -> Result<usize, SinkError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM errors", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO errors (ticker, category, error) VALUES (?1, ?2, ?3)")?;
            for event in events {
                stmt.execute(params![event.ticker, event.category.as_str(), event.message])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    pub fn stock_count(&self) -> Result<usize, SinkError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stock_info", [], |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    pub fn error_count(&self) -> Result<usize, SinkError> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM errors", [], |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Rows with statements newer than `today - window_days`, ranked by the window query.
    pub fn ranked(&self, today: NaiveDate, window_days: i64) -> Result<Vec<RankedRow>, SinkError> {
        let cutoff = (today - Duration::days(window_days)).to_string();
        let mut stmt = self.conn.prepare(RANKED_QUERY)?;
        let rows = stmt
            .query_map(params![cutoff], ranked_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn rank_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let value: i64 = row.get(idx)?;
    usize::try_from(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn ranked_row(row: &Row<'_>) -> rusqlite::Result<RankedRow> {
    let date: String = row.get(4)?;
    let most_recent = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(RankedRow {
        row: ScreenRow {
            ticker: row.get(0)?,
            roc: row.get(1)?,
            earnings_yield: row.get(2)?,
            market_cap: row.get(3)?,
            most_recent,
            sector: row.get(5)?,
            industry: row.get(6)?,
            country: row.get(7)?,
        },
        roc_rank: rank_column(row, 8)?,
        yield_rank: rank_column(row, 9)?,
        magic_rank: rank_column(row, 10)?,
    })
}

pub const CSV_HEADER: [&str; 11] = [
    "ticker",
    "roc",
    "yield",
    "market_cap",
    "most_recent",
    "sector",
    "industry",
    "country",
    "roc_rank",
    "yield_rank",
    "magic_rank",
];

/// Write the ranking to `path` as CSV.
pub fn export_csv(rows: &[RankedRow], path: &Path) -> Result<(), SinkError> {
    let csv_err = |source: csv::Error| SinkError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(CSV_HEADER).map_err(csv_err)?;
    for r in rows {
        writer
            .write_record([
                r.row.ticker.clone(),
                r.row.roc.to_string(),
                r.row.earnings_yield.to_string(),
                r.row.market_cap.to_string(),
                r.row.most_recent.to_string(),
                r.row.sector.clone().unwrap_or_default(),
                r.row.industry.clone().unwrap_or_default(),
                r.row.country.clone().unwrap_or_default(),
                r.roc_rank.to_string(),
                r.yield_rank.to_string(),
                r.magic_rank.to_string(),
            ])
            .map_err(csv_err)?;
    }
    writer
        .flush()
        .map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    info!(rows = rows.len(), path = %path.display(), "ranking exported");
    Ok(())
}
