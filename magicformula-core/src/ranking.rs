//! Magic Formula ranking.
//!
//! Rows are filtered by statement freshness first, then ranked independently by
//! return on capital and by earnings yield (both descending, competition
//! ranking). The combined rank is the sum; lower is better.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::SectorProfile;
use crate::metrics::DerivedMetrics;

/// Default freshness window in days.
pub const DEFAULT_RECENCY_WINDOW_DAYS: i64 = 400;

/// One ticker's ranking inputs, as stored in the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRow {
    pub ticker: String,
    pub roc: f64,
    #[serde(rename = "yield")]
    pub earnings_yield: f64,
    pub market_cap: f64,
    pub most_recent: NaiveDate,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
}

impl ScreenRow {
    pub fn from_metrics(
        ticker: impl Into<String>,
        metrics: &DerivedMetrics,
        profile: Option<&SectorProfile>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            roc: metrics.return_on_capital,
            earnings_yield: metrics.earnings_yield,
            market_cap: metrics.market_cap,
            most_recent: metrics.most_recent_statement_date,
            sector: profile.and_then(|p| p.sector.clone()),
            industry: profile.and_then(|p| p.industry.clone()),
            country: profile.and_then(|p| p.country.clone()),
        }
    }
}

/// A ranked row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    #[serde(flatten)]
    pub row: ScreenRow,
    pub roc_rank: usize,
    pub yield_rank: usize,
    pub magic_rank: usize,
}

/// True when `most_recent` is strictly within `window_days` of `today`.
pub fn is_recent(most_recent: NaiveDate, today: NaiveDate, window_days: i64) -> bool {
    most_recent > today - Duration::days(window_days)
}

/// Standard competition ranks, highest value first.
///
/// Equal values share a rank and the next distinct value skips ahead
/// (`[9, 7, 7, 5]` ranks as `[1, 2, 2, 4]`).
pub fn competition_ranks(values: &[f64]) -> Vec<usize> {
    // `-0.0` and `0.0` tie, as they do under SQL `RANK()`.
    let values: Vec<f64> = values.iter().map(|&v| if v == 0.0 { 0.0 } else { v }).collect();
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

    let mut ranks = vec![0; values.len()];
    for (position, &index) in order.iter().enumerate() {
        ranks[index] = match position {
            0 => 1,
            _ => {
                let previous = order[position - 1];
                if values[previous].total_cmp(&values[index]) == Ordering::Equal {
                    ranks[previous]
                } else {
                    position + 1
                }
            }
        };
    }
    ranks
}

/// Filter by recency, rank, and sort ascending by magic rank (ticker breaks ties).
pub fn rank(rows: Vec<ScreenRow>, today: NaiveDate, window_days: i64) -> Vec<RankedRow> {
    let fresh: Vec<ScreenRow> = rows
        .into_iter()
        .filter(|r| r.roc.is_finite() && r.earnings_yield.is_finite())
        .filter(|r| is_recent(r.most_recent, today, window_days))
        .collect();

    let rocs: Vec<f64> = fresh.iter().map(|r| r.roc).collect();
    let yields: Vec<f64> = fresh.iter().map(|r| r.earnings_yield).collect();
    let roc_ranks = competition_ranks(&rocs);
    let yield_ranks = competition_ranks(&yields);

    let mut ranked: Vec<RankedRow> = fresh
        .into_iter()
        .zip(roc_ranks.into_iter().zip(yield_ranks))
        .map(|(row, (roc_rank, yield_rank))| RankedRow {
            row,
            roc_rank,
            yield_rank,
            magic_rank: roc_rank + yield_rank,
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.magic_rank
            .cmp(&b.magic_rank)
            .then_with(|| a.row.ticker.cmp(&b.row.ticker))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(ticker: &str, roc: f64, earnings_yield: f64, most_recent: NaiveDate) -> ScreenRow {
        ScreenRow {
            ticker: ticker.to_string(),
            roc,
            earnings_yield,
            market_cap: 1.0e9,
            most_recent,
            sector: None,
            industry: None,
            country: None,
        }
    }

    #[test]
    fn competition_ranks_share_and_skip() {
        assert_eq!(competition_ranks(&[9.0, 7.0, 7.0, 5.0]), vec![1, 2, 2, 4]);
        assert_eq!(competition_ranks(&[1.0, 3.0, 2.0]), vec![3, 1, 2]);
        assert!(competition_ranks(&[]).is_empty());
    }

    #[test]
    fn signed_zeros_tie() {
        assert_eq!(competition_ranks(&[0.5, -0.0, 0.0, -0.2]), vec![1, 2, 2, 4]);
    }

    #[test]
    fn tied_pair_shares_magic_rank_and_better_roc_is_not_worse() {
        let today = day(2024, 6, 30);
        let fresh = day(2024, 3, 31);
        let ranked = rank(
            vec![
                row("A", 0.2, 0.1, fresh),
                row("B", 0.2, 0.1, fresh),
                row("C", 0.3, 0.1, fresh),
            ],
            today,
            400,
        );
        let magic = |t: &str| ranked.iter().find(|r| r.row.ticker == t).unwrap().magic_rank;
        assert_eq!(magic("A"), magic("B"));
        assert!(magic("C") <= magic("A"));
        assert_eq!(ranked[0].row.ticker, "C");
    }

    #[test]
    fn stale_statements_are_excluded_even_when_best() {
        let today = day(2024, 6, 30);
        let ranked = rank(
            vec![
                row("STALE", 9.0, 9.0, today - Duration::days(401)),
                row("EDGE", 0.1, 0.1, today - Duration::days(400)),
                row("OK", 0.1, 0.1, today - Duration::days(399)),
            ],
            today,
            400,
        );
        let tickers: Vec<&str> = ranked.iter().map(|r| r.row.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["OK"]);
    }

    #[test]
    fn ranks_are_computed_after_filtering() {
        let today = day(2024, 6, 30);
        let ranked = rank(
            vec![
                row("OLD", 5.0, 5.0, day(2020, 1, 1)),
                row("X", 1.0, 1.0, day(2024, 3, 31)),
            ],
            today,
            400,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].roc_rank, 1);
        assert_eq!(ranked[0].magic_rank, 2);
    }

    proptest! {
        #[test]
        fn ranks_are_between_one_and_n(values in prop::collection::vec(0.0f64..1.0e6, 0..64)) {
            let ranks = competition_ranks(&values);
            prop_assert_eq!(ranks.len(), values.len());
            for (i, &r) in ranks.iter().enumerate() {
                prop_assert!(r >= 1 && r <= values.len());
                let greater = values.iter().filter(|v| **v > values[i]).count();
                prop_assert_eq!(r, greater + 1);
            }
        }

        #[test]
        fn output_is_sorted_by_magic_rank(
            pairs in prop::collection::vec((0.0f64..2.0, 0.0f64..2.0), 0..48)
        ) {
            let today = day(2024, 6, 30);
            let rows: Vec<ScreenRow> = pairs
                .iter()
                .enumerate()
                .map(|(i, (roc, y))| row(&format!("T{i:03}"), *roc, *y, day(2024, 3, 31)))
                .collect();
            let ranked = rank(rows, today, 400);
            prop_assert_eq!(ranked.len(), pairs.len());
            for w in ranked.windows(2) {
                prop_assert!(w[0].magic_rank <= w[1].magic_rank);
                prop_assert_eq!(w[0].magic_rank, w[0].roc_rank + w[0].yield_rank);
            }
        }
    }
}
