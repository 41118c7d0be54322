//! Shared fixtures for the runner integration tests.
#![allow(dead_code)]

use chrono::NaiveDate;
use std::path::Path;

use magicformula_core::data::StaticProvider;
use magicformula_core::domain::{
    LineItems, SectorProfile, StatementBundle, StatementEntry, StatementKind, VolumePrice,
};
use magicformula_core::ScreenerConfig;
use magicformula_runner::Pipeline;

pub const TICKERS: usize = 9;

pub fn tickers() -> Vec<String> {
    (0..TICKERS).map(|i| format!("T{i:02}")).collect()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn entry(date: NaiveDate, fields: &[(&str, f64)]) -> StatementEntry {
    let items: LineItems = fields.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    StatementEntry::new(date, items)
}

pub fn balance(i: usize) -> StatementBundle {
    let i = i as f64;
    StatementBundle::new(vec![entry(
        day(2024, 3, 31),
        &[
            ("totalCurrentAssets", 500.0 + 10.0 * i),
            ("totalCurrentLiabilities", 300.0),
            ("cash", 100.0),
            ("accountsPayable", 50.0),
            ("totalAssets", 2_000.0),
            ("intangibleAssets", 100.0),
            ("longTermDebt", 400.0),
        ],
    )])
}

pub fn income(i: usize) -> StatementBundle {
    let ebit = 50.0 + 7.0 * i as f64;
    StatementBundle::new(
        [day(2023, 6, 30), day(2023, 9, 30), day(2023, 12, 31), day(2024, 3, 31)]
            .into_iter()
            .map(|d| entry(d, &[("ebit", ebit)]))
            .collect(),
    )
}

pub fn market_cap(i: usize) -> f64 {
    5_000.0 + 900.0 * i as f64
}

/// Full data for every fixture ticker.
pub fn full_provider() -> StaticProvider {
    tickers()
        .iter()
        .enumerate()
        .fold(StaticProvider::new(), |p, (i, t)| {
            p.with_volume_price(t, Some(VolumePrice::new(10.0, 20.0)))
                .with_market_cap(t, Some(market_cap(i)))
                .with_statements(t, StatementKind::Balance, Some(balance(i)))
                .with_statements(t, StatementKind::Income, Some(income(i)))
        })
}

pub fn config(dir: &Path, processes: usize) -> ScreenerConfig {
    ScreenerConfig {
        data_dir: dir.to_path_buf(),
        batch_size: 2,
        max_in_flight: 2,
        launch_delay_ms: 0,
        min_market_cap: 1_000.0,
        min_dollar_volume: 100.0,
        processes,
        ..ScreenerConfig::default()
    }
}

pub fn seed(pipeline: &Pipeline<'_>, extra: &[&str]) {
    let profile = SectorProfile {
        sector: Some("Industrials".into()),
        industry: Some("Machinery".into()),
        country: Some("United States".into()),
    };
    pipeline.registry().ingest(
        tickers()
            .into_iter()
            .chain(extra.iter().map(|t| t.to_string()))
            .map(|t| (t, Some(profile.clone()))),
    );
}

/// True when any checkpoint file under `dir` mentions `ticker` as a key.
pub fn mentioned_on_disk(dir: &Path, ticker: &str) -> bool {
    let needle = format!("\"{ticker}\"");
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
        .any(|e| {
            std::fs::read_to_string(e.path())
                .unwrap_or_default()
                .contains(&needle)
        })
}
