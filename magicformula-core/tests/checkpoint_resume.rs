//! Checkpoint files survive a restart and keep the provider's shape.

use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use magicformula_core::domain::{
    LineItems, MetricKind, Period, StatementBundle, StatementEntry, TickerState, VolumePrice,
};
use magicformula_core::{CheckpointLayout, MetricStore, TickerRegistry};

fn bundle() -> StatementBundle {
    let items: LineItems = [("ebit".to_string(), 12.5), ("totalAssets".to_string(), 100.0)]
        .into_iter()
        .collect();
    StatementBundle::new(vec![StatementEntry::new(
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        items,
    )])
}

#[test]
fn statement_checkpoint_uses_date_keyed_entries() {
    let dir = tempfile::tempdir().unwrap();
    let layout = CheckpointLayout::new(dir.path(), Period::Quarterly);
    let path = layout.metric(MetricKind::BalanceSheet);
    let store: MetricStore<StatementBundle> = MetricStore::new(MetricKind::BalanceSheet, &path);
    store
        .commit([("AAA".to_string(), bundle())].into_iter().collect())
        .unwrap();

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        raw,
        json!({ "AAA": [ { "2024-03-31": { "ebit": 12.5, "totalAssets": 100.0 } } ] })
    );
    assert!(path.ends_with("quarterly_balance_sheet.json"));
}

#[test]
fn stores_and_registry_resume_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let layout = CheckpointLayout::new(dir.path(), Period::Annual);

    {
        let registry = TickerRegistry::new();
        registry.ingest([("AAA".to_string(), None), ("BBB".to_string(), None)]);
        registry.transition("AAA", TickerState::Valid).unwrap();
        registry.save(&layout.registry()).unwrap();

        let prices: MetricStore<VolumePrice> =
            MetricStore::new(MetricKind::VolumePrice, layout.metric(MetricKind::VolumePrice));
        prices
            .commit([("AAA".to_string(), VolumePrice::new(1.0e6, 12.0))].into_iter().collect())
            .unwrap();
        let caps: MetricStore<f64> =
            MetricStore::new(MetricKind::MarketCap, layout.metric(MetricKind::MarketCap));
        caps.commit(BTreeMap::from([("AAA".to_string(), 5.0e9)])).unwrap();
    }

    let registry = TickerRegistry::load(&layout.registry()).unwrap();
    assert_eq!(registry.state("AAA"), Some(TickerState::Valid));
    assert_eq!(registry.state("BBB"), Some(TickerState::NotValidated));

    let prices: MetricStore<VolumePrice> =
        MetricStore::open(MetricKind::VolumePrice, layout.metric(MetricKind::VolumePrice)).unwrap();
    assert_eq!(prices.get("AAA").and_then(|p| p.dollar_volume()), Some(1.2e7));
    let caps: MetricStore<f64> =
        MetricStore::open(MetricKind::MarketCap, layout.metric(MetricKind::MarketCap)).unwrap();
    assert_eq!(caps.missing_from(&["AAA".to_string(), "BBB".to_string()]), vec!["BBB".to_string()]);
}

#[test]
fn missing_checkpoints_open_empty() {
    let dir = tempfile::tempdir().unwrap();
    let layout = CheckpointLayout::new(dir.path(), Period::Quarterly);
    let registry = TickerRegistry::load(&layout.registry()).unwrap();
    assert!(registry.is_empty());
    let store: MetricStore<StatementBundle> =
        MetricStore::open(MetricKind::IncomeStatement, layout.metric(MetricKind::IncomeStatement))
            .unwrap();
    assert!(store.is_empty());
}
