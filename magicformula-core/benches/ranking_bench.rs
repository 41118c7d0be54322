//! Criterion benchmarks for the ranking and metric stages.
//!
//! Benchmarks:
//! 1. Competition ranking of one factor column
//! 2. Full in-memory ranking (recency filter, two rank passes, sort)
//! 3. Parallel metric computation over statement bundles

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use chrono::NaiveDate;
use std::collections::BTreeMap;

use magicformula_core::domain::{LineItems, StatementBundle, StatementEntry};
use magicformula_core::metrics::compute_all;
use magicformula_core::ranking::{competition_ranks, rank, ScreenRow};
use magicformula_core::QualityLog;

// ── Helpers ──────────────────────────────────────────────────────────

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 31).unwrap() - chrono::Duration::days(offset)
}

fn make_rows(n: usize) -> Vec<ScreenRow> {
    (0..n)
        .map(|i| ScreenRow {
            ticker: format!("T{i:05}"),
            roc: ((i * 7919) % 1000) as f64 / 1000.0,
            earnings_yield: ((i * 104_729) % 1000) as f64 / 2000.0,
            market_cap: 1.0e9 + i as f64,
            most_recent: day((i % 500) as i64),
            sector: None,
            industry: None,
            country: None,
        })
        .collect()
}

fn entry(date: NaiveDate, fields: &[(&str, f64)]) -> StatementEntry {
    let items: LineItems = fields.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    StatementEntry::new(date, items)
}

type Bundles = BTreeMap<String, StatementBundle>;

fn make_bundles(n: usize) -> (Vec<String>, Bundles, Bundles, BTreeMap<String, f64>) {
    let tickers: Vec<String> = (0..n).map(|i| format!("T{i:05}")).collect();
    let mut balance = BTreeMap::new();
    let mut income = BTreeMap::new();
    let mut caps = BTreeMap::new();
    for (i, t) in tickers.iter().enumerate() {
        let x = i as f64;
        balance.insert(
            t.clone(),
            StatementBundle::new(vec![entry(
                day(0),
                &[
                    ("totalCurrentAssets", 500.0 + x),
                    ("totalCurrentLiabilities", 300.0),
                    ("cash", 100.0),
                    ("accountsPayable", 50.0),
                    ("totalAssets", 2_000.0 + x),
                    ("intangibleAssets", 100.0),
                    ("longTermDebt", 400.0),
                ],
            )]),
        );
        income.insert(
            t.clone(),
            StatementBundle::new(
                (0..6)
                    .map(|q| entry(day(q * 91), &[("ebit", 50.0 + x)]))
                    .collect(),
            ),
        );
        caps.insert(t.clone(), 1.0e4 + 10.0 * x);
    }
    (tickers, balance, income, caps)
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_competition_ranks(c: &mut Criterion) {
    let mut group = c.benchmark_group("competition_ranks");
    for n in [500usize, 5_000] {
        let values: Vec<f64> = make_rows(n).iter().map(|r| r.roc).collect();
        group.bench_with_input(BenchmarkId::new("roc", n), &values, |b, values| {
            b.iter(|| competition_ranks(black_box(values)))
        });
    }
    group.finish();
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank");
    let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    for n in [500usize, 5_000] {
        let rows = make_rows(n);
        group.bench_with_input(BenchmarkId::new("window_400", n), &rows, |b, rows| {
            b.iter(|| rank(black_box(rows.clone()), today, 400))
        });
    }
    group.finish();
}

fn bench_compute_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_all");
    let (tickers, balance, income, caps) = make_bundles(2_000);
    group.bench_function("2000_tickers", |b| {
        b.iter(|| {
            let log = QualityLog::new();
            compute_all(black_box(&tickers), &balance, &income, &caps, &log)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_competition_ranks, bench_rank, bench_compute_all);
criterion_main!(benches);
