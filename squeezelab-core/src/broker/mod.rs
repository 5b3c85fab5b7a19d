//! Broker seam: the gateway trait strategies talk to, the order ledger, and
//! the bar-driven simulated broker.

pub mod ledger;
pub mod sim;

pub use ledger::{LedgerError, OrderLedger, OrderSpec};
pub use sim::{SimBroker, SimBrokerConfig};

use crate::domain::{Order, OrderId, Position};

/// Everything a strategy may do to the broker. Strategies hold this as a
/// `&mut dyn BrokerGateway` so the same state machines run against the
/// simulator today and a live adapter later.
pub trait BrokerGateway {
    /// Submit a new order; it participates in matching from the next bar.
    fn submit(&mut self, spec: OrderSpec) -> Result<OrderId, LedgerError>;

    /// Cancel a working order. Canceling does not touch an OCO sibling.
    fn cancel(&mut self, id: OrderId) -> Result<(), LedgerError>;

    /// Grow or shrink the remaining size of a working order.
    fn resize(&mut self, id: OrderId, delta: f64) -> Result<(), LedgerError>;

    /// Move the trigger (or limit) price of a working order.
    fn update_trigger(&mut self, id: OrderId, price: f64) -> Result<(), LedgerError>;

    fn order(&self, id: OrderId) -> Option<&Order>;

    /// Current net position for one instrument.
    fn position(&self, symbol: &str) -> Position;

    /// Account cash after all booked fills.
    fn cash(&self) -> f64;
}
