//! Validation pass: decides `VALID`, `INVALID` or `REMOVE` for each
//! `NOT_VALIDATED` ticker.
//!
//! Each batch fetches volume and price first. Market cap is requested only for
//! tickers whose dollar volume clears the threshold, which saves one quote call
//! per rejected ticker.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

use magicformula_core::domain::{TickerState, VolumePrice};
use magicformula_core::registry::Check;
use magicformula_core::{MetricStore, QualityCategory, Thresholds};

use crate::scheduler::{Batch, BatchScheduler};
use crate::worker::{call_provider, mark_removed, record_batch, WorkerContext};

/// Tally of validation decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: usize,
    pub invalid: usize,
    pub removed: usize,
    /// Tickers left `NOT_VALIDATED` because a provider call failed.
    pub deferred: usize,
}

impl ValidationReport {
    fn absorb(&mut self, other: ValidationReport) {
        self.valid += other.valid;
        self.invalid += other.invalid;
        self.removed += other.removed;
        self.deferred += other.deferred;
    }
}

pub struct Validator<'a> {
    pub ctx: WorkerContext<'a>,
    pub thresholds: Thresholds,
    pub volume_store: &'a MetricStore<VolumePrice>,
    pub cap_store: &'a MetricStore<f64>,
    /// Where to checkpoint the registry after each batch.
    pub registry_path: Option<PathBuf>,
}

impl Validator<'_> {
    fn set_state(&self, ticker: &str, state: TickerState) {
        if let Err(e) = self.ctx.registry.transition(ticker, state) {
            warn!(ticker, error = %e, "validation transition rejected");
        }
    }

    /// Validate one batch. Never fails; problems land in the quality log.
    pub fn validate_batch(&self, batch: &Batch) -> ValidationReport {
        let ctx = &self.ctx;
        let mut report = ValidationReport::default();
        info!(batch = batch.index + 1, tickers = batch.tickers.len(), "validating batch");

        let fetched = call_provider(ctx, || ctx.provider.fetch_volume_and_price(&batch.tickers));
        let mut snapshots = match fetched {
            Ok(response) => response,
            Err(e) => {
                record_batch(
                    ctx.log,
                    &batch.tickers,
                    QualityCategory::BatchFailed,
                    &format!("volume batch {} failed: {e}", batch.index + 1),
                );
                report.deferred = batch.tickers.len();
                return report;
            }
        };

        let mut volume_checked = BTreeMap::new();
        let mut missing = Vec::new();
        let mut cap_candidates = Vec::new();
        for ticker in &batch.tickers {
            let snapshot = snapshots.remove(ticker).flatten();
            match self.thresholds.check_dollar_volume(snapshot.as_ref()) {
                Check::Unresolved => missing.push(ticker.clone()),
                Check::Below(dollar_volume) => {
                    if let Some(s) = &snapshot {
                        ctx.registry.note_volume(ticker, s);
                    }
                    info!(ticker = %ticker, dollar_volume, "below dollar-volume minimum");
                    self.set_state(ticker, TickerState::Invalid);
                    report.invalid += 1;
                }
                Check::Passed(_) => {
                    if let Some(s) = &snapshot {
                        ctx.registry.note_volume(ticker, s);
                    }
                    cap_candidates.push(ticker.clone());
                }
            }
            if let Some(s) = snapshot {
                volume_checked.insert(ticker.clone(), s);
            }
        }

        if !missing.is_empty() {
            mark_removed(
                ctx,
                &missing,
                QualityCategory::ThresholdDataMissing,
                "volume or price unavailable",
            );
            report.removed += missing.len();
        }

        if !cap_candidates.is_empty() {
            self.validate_caps(batch, &cap_candidates, &mut report);
        }

        // Only decided tickers keep a price snapshot; REMOVE and deferred ones never reach disk.
        volume_checked.retain(|ticker, _| {
            matches!(
                ctx.registry.state(ticker),
                Some(TickerState::Valid | TickerState::Invalid)
            )
        });
        if let Err(e) = self.volume_store.commit(volume_checked) {
            record_batch(
                ctx.log,
                &batch.tickers,
                QualityCategory::PersistenceFailure,
                &format!("price batch {} not saved: {e}", batch.index + 1),
            );
        }
        self.drop_removed(batch);

        if let Some(path) = &self.registry_path {
            if let Err(e) = ctx.registry.save(path) {
                warn!(batch = batch.index + 1, error = %e, "registry checkpoint failed");
            }
        }
        report
    }

    /// Purge this batch's `REMOVE` tickers from snapshots left by an earlier validation.
    fn drop_removed(&self, batch: &Batch) {
        let removed: Vec<String> = batch
            .tickers
            .iter()
            .filter(|t| self.ctx.registry.state(t) == Some(TickerState::Remove))
            .cloned()
            .collect();
        if removed.is_empty() {
            return;
        }
        let purged = self
            .volume_store
            .remove_all(&removed)
            .and_then(|_| self.cap_store.remove_all(&removed));
        if let Err(e) = purged {
            record_batch(
                self.ctx.log,
                &removed,
                QualityCategory::PersistenceFailure,
                &format!("removed tickers of batch {} not purged: {e}", batch.index + 1),
            );
        }
    }

    fn validate_caps(&self, batch: &Batch, candidates: &[String], report: &mut ValidationReport) {
        let ctx = &self.ctx;
        let fetched = call_provider(ctx, || ctx.provider.fetch_market_cap(candidates));
        let mut caps = match fetched {
            Ok(response) => response,
            Err(e) => {
                record_batch(
                    ctx.log,
                    candidates,
                    QualityCategory::BatchFailed,
                    &format!("market cap batch {} failed: {e}", batch.index + 1),
                );
                report.deferred += candidates.len();
                return;
            }
        };

        let mut resolved = BTreeMap::new();
        let mut unresolved = Vec::new();
        for ticker in candidates {
            match self.thresholds.check_market_cap(caps.remove(ticker).flatten()) {
                Check::Unresolved => unresolved.push(ticker.clone()),
                Check::Below(cap) => {
                    ctx.registry.note_market_cap(ticker, cap);
                    self.set_state(ticker, TickerState::Invalid);
                    report.invalid += 1;
                }
                Check::Passed(cap) => {
                    ctx.registry.note_market_cap(ticker, cap);
                    self.set_state(ticker, TickerState::Valid);
                    resolved.insert(ticker.clone(), cap);
                    report.valid += 1;
                }
            }
        }

        if !unresolved.is_empty() {
            mark_removed(
                ctx,
                &unresolved,
                QualityCategory::ProviderUnresolved,
                "no market cap from provider",
            );
            report.removed += unresolved.len();
        }

        if let Err(e) = self.cap_store.commit(resolved) {
            record_batch(
                ctx.log,
                candidates,
                QualityCategory::PersistenceFailure,
                &format!("market cap batch {} not saved: {e}", batch.index + 1),
            );
        }
    }

    /// Validate `tickers` through the scheduler.
    pub fn validate(&self, scheduler: &BatchScheduler, tickers: &[String]) -> ValidationReport {
        let mut total = ValidationReport::default();
        for (index, result) in scheduler
            .run(tickers, |batch| self.validate_batch(batch))
            .into_iter()
            .enumerate()
        {
            match result {
                Ok(report) => total.absorb(report),
                Err(panic) => warn!(batch = index + 1, message = %panic.message, "validation worker panicked"),
            }
        }
        info!(
            valid = total.valid,
            invalid = total.invalid,
            removed = total.removed,
            deferred = total.deferred,
            "validation finished"
        );
        total
    }
}
