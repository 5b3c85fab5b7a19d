//! Net position derived strictly from filled orders.

use serde::{Deserialize, Serialize};

/// Net signed position for one instrument. Positive quantity = long.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub quantity: f64,
    pub avg_entry_price: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    pub fn market_value(&self, current_price: f64) -> f64 {
        self.quantity * current_price
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.quantity * (current_price - self.avg_entry_price)
    }

    /// Apply a fill. Adds average up on increases; realizes nothing here —
    /// PnL accounting lives with the broker's trade extraction.
    pub fn apply_fill(&mut self, signed_qty: f64, price: f64) {
        let new_qty = self.quantity + signed_qty;

        if self.quantity == 0.0 || self.quantity.signum() == signed_qty.signum() {
            // Opening or scaling in: blend the average entry price.
            let total = self.quantity.abs() + signed_qty.abs();
            if total > 0.0 {
                self.avg_entry_price = (self.avg_entry_price * self.quantity.abs()
                    + price * signed_qty.abs())
                    / total;
            }
        } else if new_qty != 0.0 && new_qty.signum() != self.quantity.signum() {
            // Reversal: remainder opens a fresh position at the fill price.
            self.avg_entry_price = price;
        }

        self.quantity = new_qty;
        if self.quantity == 0.0 {
            self.avg_entry_price = 0.0;
        }
    }
}
