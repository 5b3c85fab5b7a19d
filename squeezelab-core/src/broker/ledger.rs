//! OrderLedger — in-memory record of active orders and their linkage for one
//! backtest run: parent/child brackets, OCO pairs, lifecycle bookkeeping.

use crate::domain::{Fill, Order, OrderId, OrderKind, OrderRole, OrderSide, OrderStatus};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {0} cannot be modified in status {1:?}")]
    InvalidStatus(OrderId, OrderStatus),

    #[error("order {0} has no trigger price to update")]
    NoTrigger(OrderId),
}

/// Specification for a new order submission.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
    pub role: OrderRole,
    /// Bracket parent: the order stays dormant until the parent fills.
    pub parent: Option<OrderId>,
    /// OCO sibling: filling either cancels the other.
    pub oco: Option<OrderId>,
}

impl OrderSpec {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64, role: OrderRole) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Market,
            role,
            parent: None,
            oco: None,
        }
    }

}

/// All orders of one instrument-strategy instance, keyed by id.
#[derive(Debug, Default)]
pub struct OrderLedger {
    orders: HashMap<OrderId, Order>,
    next_id: u64,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            next_id: 1,
        }
    }

    /// Record a new order. Orders without a parent go straight to `Accepted`
    /// (working); bracket children stay `Submitted` until the parent fills,
    /// so the stop activates atomically with the entry.
    pub fn submit(&mut self, spec: OrderSpec, bar: usize) -> OrderId {
        let id = OrderId(self.next_id);
        self.next_id += 1;

        let status = if spec.parent.is_some() {
            OrderStatus::Submitted
        } else {
            OrderStatus::Accepted
        };

        let order = Order {
            id,
            symbol: spec.symbol,
            side: spec.side,
            kind: spec.kind,
            role: spec.role,
            quantity: spec.quantity,
            remaining: spec.quantity,
            status,
            parent: spec.parent,
            oco_sibling: None,
            created_bar: bar,
            fill: None,
        };
        self.orders.insert(id, order);

        if let Some(sibling) = spec.oco {
            // A sibling that is already gone is not linked.
            if self.orders.contains_key(&sibling) {
                if let Some(o) = self.orders.get_mut(&id) {
                    o.oco_sibling = Some(sibling);
                }
                if let Some(o) = self.orders.get_mut(&sibling) {
                    o.oco_sibling = Some(id);
                }
            }
        }

        id
    }

    /// Fill an order completely. Cancels the OCO sibling in the same step and
    /// activates any dormant children. Returns the ids whose status changed,
    /// filled order first.
    pub fn fill(
        &mut self,
        id: OrderId,
        price: f64,
        commission: f64,
        bar: usize,
    ) -> Result<Vec<OrderId>, LedgerError> {
        let sibling = {
            let order = self.orders.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
            if order.is_terminal() {
                return Err(LedgerError::InvalidStatus(id, order.status));
            }
            order.status = OrderStatus::Filled;
            order.fill = Some(Fill {
                price,
                quantity: order.remaining,
                commission,
                bar,
            });
            order.oco_sibling
        };

        let mut changed = vec![id];

        // OCO mutual exclusion: the sibling is voided within the same
        // notification step as the fill.
        if let Some(sibling_id) = sibling {
            if self
                .orders
                .get(&sibling_id)
                .map(|o| !o.is_terminal())
                .unwrap_or(false)
            {
                self.set_status(sibling_id, OrderStatus::Canceled)?;
                changed.push(sibling_id);
            }
        }

        // Activate bracket children waiting on this parent.
        let children: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.parent == Some(id) && o.status == OrderStatus::Submitted)
            .map(|o| o.id)
            .collect();
        for child in children {
            self.set_status(child, OrderStatus::Accepted)?;
            changed.push(child);
        }

        Ok(changed)
    }

    /// Cancel a single order. Does not touch the OCO sibling: only fills
    /// propagate through the pair.
    pub fn cancel(&mut self, id: OrderId) -> Result<(), LedgerError> {
        let order = self.orders.get(&id).ok_or(LedgerError::NotFound(id))?;
        if order.is_terminal() {
            return Err(LedgerError::InvalidStatus(id, order.status));
        }
        self.set_status(id, OrderStatus::Canceled)
    }

    /// Mark an order margin-rejected or rejected.
    pub fn reject(&mut self, id: OrderId, status: OrderStatus) -> Result<(), LedgerError> {
        debug_assert!(matches!(status, OrderStatus::Margin | OrderStatus::Rejected));
        let order = self.orders.get(&id).ok_or(LedgerError::NotFound(id))?;
        if order.is_terminal() {
            return Err(LedgerError::InvalidStatus(id, order.status));
        }
        self.set_status(id, status)
    }

    /// Adjust the remaining working size of an order (scaled entries resize
    /// their existing stop/target instead of resubmitting).
    pub fn resize(&mut self, id: OrderId, delta: f64) -> Result<(), LedgerError> {
        let order = self.orders.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        if order.is_terminal() {
            return Err(LedgerError::InvalidStatus(id, order.status));
        }
        order.remaining += delta;
        order.quantity = order.quantity.max(order.remaining);
        Ok(())
    }

    /// Replace the trigger price of a working stop order. The caller owns
    /// any monotonicity rule; the ledger just records the level.
    pub fn update_trigger(&mut self, id: OrderId, price: f64) -> Result<(), LedgerError> {
        let order = self.orders.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        match &mut order.kind {
            OrderKind::Stop { trigger_price } => {
                *trigger_price = price;
                Ok(())
            }
            OrderKind::TrailingStop { trigger_price, .. } => {
                *trigger_price = price;
                Ok(())
            }
            OrderKind::Limit { limit_price } => {
                *limit_price = price;
                Ok(())
            }
            OrderKind::Market => Err(LedgerError::NoTrigger(id)),
        }
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    /// Orders working at the broker for one symbol, stop-loss roles first so
    /// intrabar fills resolve conservatively.
    pub fn working_orders(&self, symbol: &str) -> Vec<OrderId> {
        let mut ids: Vec<(OrderId, OrderRole)> = self
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.is_working())
            .map(|o| (o.id, o.role))
            .collect();
        ids.sort_by_key(|(id, role)| {
            let rank = match role {
                OrderRole::StopLoss => 0,
                OrderRole::TakeProfit => 1,
                OrderRole::Entry => 2,
            };
            (rank, id.0)
        });
        ids.into_iter().map(|(id, _)| id).collect()
    }

    fn set_status(&mut self, id: OrderId, status: OrderStatus) -> Result<(), LedgerError> {
        let order = self.orders.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        order.status = status;
        Ok(())
    }
}
