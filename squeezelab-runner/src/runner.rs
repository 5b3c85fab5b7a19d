//! One parameter set, one backtest, one report.

use squeezelab_core::engine::{run_backtest, EngineConfig, EngineError, MarketData, RunResult};
use squeezelab_core::strategy::SqueezeStrategy;
use thiserror::Error;
use tracing::debug;

use crate::fingerprint;
use crate::metrics::SummaryMetrics;
use crate::params::SqueezeParams;
use crate::store::{ResultRecord, FINGERPRINT_COLUMN};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Outcome of one computed backtest, ready for the store.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub params: SqueezeParams,
    pub fingerprint: String,
    pub metrics: SummaryMetrics,
    pub result: RunResult,
}

impl RunReport {
    /// Flatten to a store row: fingerprint, identifying fields, metrics.
    pub fn to_record(&self) -> ResultRecord {
        let mut fields = vec![(FINGERPRINT_COLUMN.to_string(), self.fingerprint.clone())];
        fields.extend(fingerprint::pairs(&self.params));
        for (column, value) in SummaryMetrics::columns().iter().zip(self.metrics.values()) {
            fields.push((column.to_string(), value));
        }
        ResultRecord { fields }
    }
}

/// Run the squeeze strategy on `symbol` with one parameter set.
pub fn run_one(
    symbol: &str,
    params: &SqueezeParams,
    data: &MarketData,
    engine: &EngineConfig,
) -> Result<RunReport, RunnerError> {
    let fingerprint = fingerprint::digest(params);
    debug!(symbol, %fingerprint, "running backtest");

    let mut provider = params.provider();
    let mut strategy = SqueezeStrategy::new(symbol, params.strategy_config());
    let result = run_backtest(data, &mut provider, &mut strategy, engine)?;
    let metrics = SummaryMetrics::from_run(&result);

    Ok(RunReport {
        params: params.clone(),
        fingerprint,
        metrics,
        result,
    })
}
