//! Parameter sweep orchestration.
//!
//! Combinations run sequentially or on a rayon pool. Each combination is
//! fingerprinted and checked against the result store first; a hit is
//! returned as-is, a miss is computed and appended. A failing combination is
//! logged and skipped, never fatal to the sweep, and a shared stop flag
//! drains the remaining combinations as skips.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use squeezelab_core::engine::{EngineConfig, MarketData};
use tracing::{info, warn};

use crate::fingerprint;
use crate::params::{RunOptions, SqueezeParams};
use crate::runner::{run_one, RunReport};
use crate::store::{CachedRow, Partition, ResultStore};

/// How one combination resolved.
#[derive(Debug)]
pub enum RunOutcome {
    /// Found in the store; no backtest ran.
    Cached(CachedRow),
    /// Computed in this sweep.
    Computed(Box<RunReport>),
    /// Errored or stopped; the sweep carried on.
    Skipped(String),
}

/// One combination's slot in the sweep output. Items come back in
/// combination order regardless of thread count.
#[derive(Debug)]
pub struct SweepItem {
    pub index: usize,
    pub total: usize,
    pub fingerprint: String,
    pub outcome: RunOutcome,
}

impl SweepItem {
    pub fn is_computed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Computed(_))
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.outcome, RunOutcome::Cached(_))
    }
}

type ItemCallback = Box<dyn Fn(&SweepItem) + Send + Sync>;

pub struct SweepRunner {
    options: RunOptions,
    store: Option<Arc<ResultStore>>,
    stop: Arc<AtomicBool>,
    completed: AtomicUsize,
    callbacks: Vec<ItemCallback>,
}

impl SweepRunner {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            store: None,
            stop: Arc::new(AtomicBool::new(false)),
            completed: AtomicUsize::new(0),
            callbacks: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shared flag that drains the rest of the sweep when set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Register a callback invoked once per finished combination.
    pub fn on_item<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SweepItem) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Combinations finished so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Run every combination against `data` for one partition.
    pub fn run(
        &self,
        partition: &Partition,
        combos: &[SqueezeParams],
        data: &MarketData,
        engine: &EngineConfig,
    ) -> Vec<SweepItem> {
        let total = combos.len();
        info!(total, threads = self.options.threads, "sweep started");

        // A single combination never pays for a pool.
        let items: Vec<SweepItem> = if self.options.threads <= 1 || total <= 1 {
            combos
                .iter()
                .enumerate()
                .map(|(index, params)| self.process_one(index, total, partition, params, data, engine))
                .collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.threads)
                .build()
            {
                Ok(pool) => pool.install(|| {
                    combos
                        .par_iter()
                        .enumerate()
                        .map(|(index, params)| {
                            self.process_one(index, total, partition, params, data, engine)
                        })
                        .collect()
                }),
                Err(err) => {
                    warn!(%err, "thread pool unavailable, running sequentially");
                    combos
                        .iter()
                        .enumerate()
                        .map(|(index, params)| {
                            self.process_one(index, total, partition, params, data, engine)
                        })
                        .collect()
                }
            }
        };

        let computed = items.iter().filter(|i| i.is_computed()).count();
        let cached = items.iter().filter(|i| i.is_cached()).count();
        info!(total, computed, cached, "sweep finished");
        items
    }

    fn process_one(
        &self,
        index: usize,
        total: usize,
        partition: &Partition,
        params: &SqueezeParams,
        data: &MarketData,
        engine: &EngineConfig,
    ) -> SweepItem {
        let fingerprint = fingerprint::digest(params);

        if self.stop.load(Ordering::Relaxed) {
            return self.finish(SweepItem {
                index,
                total,
                fingerprint,
                outcome: RunOutcome::Skipped("stopped".into()),
            });
        }

        if self.options.use_cache {
            if let Some(store) = &self.store {
                match store.lookup(partition, &fingerprint) {
                    Ok(Some(row)) => {
                        return self.finish(SweepItem {
                            index,
                            total,
                            fingerprint,
                            outcome: RunOutcome::Cached(row),
                        });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(index, %err, "cache lookup failed, recomputing");
                    }
                }
            }
        }

        let outcome = match run_one(&partition.symbol, params, data, engine) {
            Ok(report) => {
                if self.options.save_results {
                    if let Some(store) = &self.store {
                        if let Err(err) = store.append(partition, &report.to_record()) {
                            warn!(index, %err, "failed to persist result");
                        }
                    }
                }
                RunOutcome::Computed(Box::new(report))
            }
            Err(err) => {
                warn!(index, %err, "combination failed");
                RunOutcome::Skipped(err.to_string())
            }
        };

        self.finish(SweepItem {
            index,
            total,
            fingerprint,
            outcome,
        })
    }

    fn finish(&self, item: SweepItem) -> SweepItem {
        self.completed.fetch_add(1, Ordering::Relaxed);
        for callback in &self.callbacks {
            callback(&item);
        }
        item
    }
}
