//! TradeRecord — a completed round-trip trade.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Trade direction, from the sign of the position while it was open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Long,
    Short,
}

/// A closed round-trip trade. Created when a position returns to zero;
/// immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub direction: TradeDirection,

    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_price: f64,

    pub quantity: f64,
    pub commission: f64,

    /// Net PnL after commission.
    pub pnl: f64,
    /// Net PnL as a percentage of entry notional.
    pub pnl_pct: f64,

    /// Bars from entry fill to exit fill.
    pub bar_duration: usize,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn is_long(&self) -> bool {
        self.direction == TradeDirection::Long
    }
}
