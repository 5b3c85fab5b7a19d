//! Order record: side, kind, linkage role, lifecycle status, fill details.

use super::ids::OrderId;
use serde::{Deserialize, Serialize};

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1.0 for buys, -1.0 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Execution kind and its price parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Fill at the next bar's open.
    Market,
    /// Triggers when price reaches the trigger level, then fills as market.
    Stop { trigger_price: f64 },
    /// Fill at limit price or better.
    Limit { limit_price: f64 },
    /// Stop whose trigger follows the best price reached at a fixed distance.
    /// The trigger only tightens, never loosens.
    TrailingStop { distance: f64, trigger_price: f64 },
}

impl OrderKind {
    pub fn trigger_price(&self) -> Option<f64> {
        match self {
            OrderKind::Stop { trigger_price } => Some(*trigger_price),
            OrderKind::TrailingStop { trigger_price, .. } => Some(*trigger_price),
            _ => None,
        }
    }
}

/// Role of the order within a bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRole {
    Entry,
    StopLoss,
    TakeProfit,
}

/// Order lifecycle states.
///
/// `Submitted` children wait for their parent's fill; `Accepted` orders are
/// working at the broker. `Canceled`, `Margin` and `Rejected` are normal
/// control flow for the state machines, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Accepted,
    Filled,
    Canceled,
    Margin,
    Rejected,
}

/// Execution details recorded once an order fills.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    pub bar: usize,
}

/// A single order with full linkage: optional parent (bracket child) and
/// optional OCO sibling (fill of one voids the other).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub role: OrderRole,
    pub quantity: f64,
    /// Working quantity still live at the broker; adjusted by scaled entries.
    pub remaining: f64,
    pub status: OrderStatus,
    pub parent: Option<OrderId>,
    pub oco_sibling: Option<OrderId>,
    pub created_bar: usize,
    pub fill: Option<Fill>,
}

impl Order {
    /// Working at the broker and eligible for trigger/fill checks.
    pub fn is_working(&self) -> bool {
        self.status == OrderStatus::Accepted
    }

    /// Terminal: no further notifications will be produced.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Margin | OrderStatus::Rejected
        )
    }
}
