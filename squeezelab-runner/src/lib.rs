//! Sweep orchestration on top of `squeezelab-core`: parameter grids,
//! fingerprint-keyed result caching, summary metrics and the CSV store.

pub mod fingerprint;
pub mod metrics;
pub mod params;
pub mod runner;
pub mod store;
pub mod sweep;

pub use metrics::SummaryMetrics;
pub use params::{default_threads, ParamRange, RunOptions, SqueezeParams, SweepSpec};
pub use runner::{run_one, RunReport, RunnerError};
pub use store::{CachedRow, Partition, ResultRecord, ResultStore, StoreError};
pub use sweep::{RunOutcome, SweepItem, SweepRunner};
