//! Strategy seam: the trait the engine drives, plus the two shipped state
//! machines.

pub mod multi;
pub mod squeeze;

pub use multi::{ChannelBuildConfig, ChannelBuildStrategy, TickerState};
pub use squeeze::{SqueezeConfig, SqueezeStrategy};

use crate::broker::BrokerGateway;
use crate::domain::{Bar, Order};
use crate::signal::SignalSnapshot;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Where the engine currently is in the series.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub bar_index: usize,
    pub timestamp: NaiveDateTime,
}

/// A strategy reacts to order lifecycle events first, then to the bar close.
/// Both maps are keyed by symbol and iterate in symbol order.
pub trait Strategy {
    /// Called once per order status change, before `on_bar` for the same bar.
    fn on_order_event(&mut self, order: &Order, broker: &mut dyn BrokerGateway);

    /// Called once per bar after matching, with this bar's snapshot per
    /// instrument.
    fn on_bar(
        &mut self,
        clock: &Clock,
        bars: &BTreeMap<String, Bar>,
        snapshots: &BTreeMap<String, SignalSnapshot>,
        broker: &mut dyn BrokerGateway,
    );
}
