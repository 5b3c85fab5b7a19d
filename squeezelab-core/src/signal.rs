//! Per-bar signal snapshot and the provider seam.
//!
//! The snapshot is an explicit named-field struct produced once per bar and
//! passed by value into the state machines — no attribute-style indexing into
//! time series. Providers are pure functions of the bar history up to the
//! current bar; any internal state is memoization only.

use crate::domain::Bar;
use serde::{Deserialize, Serialize};

/// Signal values for one instrument at one bar close.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// Volatility compression has released (entry-readiness gate).
    pub squeeze_fired: bool,
    /// Momentum at this bar close.
    pub momentum: f64,
    /// Momentum one bar earlier, for the increasing-magnitude confirmation.
    pub momentum_prev: f64,
    /// Directional trend confirmation.
    pub trend_up: bool,
    pub trend_down: bool,
    /// Momentum has reset since the last extreme (optional entry gate).
    pub good_momentum: bool,
    /// Average true range at this bar.
    pub atr: f64,

    // Channel fields for the multi-instrument build machine.
    /// Close is inside the entry channel band.
    pub in_channel: bool,
    /// Stop level for a long build (lower channel bound).
    pub channel_stop_long: f64,
    /// Stop level for a short build (upper channel bound).
    pub channel_stop_short: f64,
    /// Target level for a long build.
    pub channel_target_long: f64,
    /// Target level for a short build.
    pub channel_target_short: f64,
    /// Signed build signal: positive while the bullish alignment holds,
    /// negative while bearish, zero otherwise.
    pub bias: f64,
}

/// Produces one `SignalSnapshot` per instrument per bar.
///
/// `history` is the full bar series for `symbol` up to and including the
/// current bar; implementations must not look ahead.
pub trait SignalProvider {
    /// Bars to consume before the strategy starts acting on snapshots.
    fn warmup_bars(&self) -> usize {
        0
    }

    fn snapshot(&mut self, symbol: &str, history: &[Bar]) -> SignalSnapshot;
}
