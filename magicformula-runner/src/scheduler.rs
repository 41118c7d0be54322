//! Rate-limited batch scheduler.
//!
//! Tickers are partitioned into batches and each batch gets one worker thread.
//! A new worker is released only while fewer than `max_in_flight` are running,
//! and every release except the last is followed by `launch_delay`. When no
//! release is possible the scheduler joins the oldest outstanding worker, so
//! workers are always joined in launch order.

use std::any::Any;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

use magicformula_core::ScreenerConfig;

/// A bounded list of tickers handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position in launch order.
    pub index: usize,
    pub tickers: Vec<String>,
}

/// Split `tickers` into consecutive batches of `batch_size`.
///
/// A batch size of 0 yields one batch holding every ticker. An empty list yields
/// no batches.
pub fn partition_batches(tickers: &[String], batch_size: usize) -> Vec<Batch> {
    if tickers.is_empty() {
        return Vec::new();
    }
    let size = if batch_size == 0 { tickers.len() } else { batch_size };
    tickers
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            tickers: chunk.to_vec(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub launch_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&ScreenerConfig::default())
    }
}

impl From<&ScreenerConfig> for SchedulerConfig {
    fn from(config: &ScreenerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_in_flight: config.max_in_flight,
            launch_delay: config.launch_delay(),
        }
    }
}

/// A worker that panicked instead of returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPanicked {
    pub batch: usize,
    pub message: String,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

#[derive(Debug, Clone, Default)]
pub struct BatchScheduler {
    config: SchedulerConfig,
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run `job` once per batch of `tickers` and return results in batch order.
    ///
    /// Blocks until every worker has been launched and joined.
    pub fn run<F, R>(&self, tickers: &[String], job: F) -> Vec<Result<R, WorkerPanicked>>
    where
        F: Fn(&Batch) -> R + Sync,
        R: Send,
    {
        let batches = partition_batches(tickers, self.config.batch_size);
        let total = batches.len();
        let bound = self.config.max_in_flight.max(1);
        let job = &job;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(total);
            let mut results = Vec::with_capacity(total);
            let mut running = 0usize;
            let mut pending = batches.iter();

            while results.len() < total {
                if running < bound && handles.len() < total {
                    if let Some(batch) = pending.next() {
                        debug!(batch = batch.index, size = batch.tickers.len(), "launching worker");
                        handles.push(Some(scope.spawn(move || job(batch))));
                        running += 1;
                        if handles.len() < total {
                            thread::sleep(self.config.launch_delay);
                        }
                        continue;
                    }
                }

                let joined = results.len();
                let outcome = match handles.get_mut(joined).and_then(Option::take) {
                    Some(handle) => handle.join().map_err(|payload| {
                        let message = panic_message(payload.as_ref());
                        error!(batch = joined, %message, "worker panicked");
                        WorkerPanicked {
                            batch: joined,
                            message,
                        }
                    }),
                    None => break,
                };
                running -= 1;
                results.push(outcome);
            }
            results
        })
    }
}
