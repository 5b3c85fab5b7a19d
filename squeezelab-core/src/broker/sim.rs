//! SimBroker — bar-driven matching engine over the order ledger.
//!
//! Matching happens once per bar, before the strategy sees the bar: market
//! orders fill at the open, stops and limits fill when the bar range crosses
//! their level, with the open taken when it gaps past the level. Stops are
//! matched before targets so an ambiguous bar resolves against the position.

use crate::domain::{
    Bar, Order, OrderId, OrderKind, OrderRole, OrderSide, OrderStatus, Position, TradeDirection,
    TradeRecord,
};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::debug;

use super::ledger::{LedgerError, OrderLedger, OrderSpec};
use super::BrokerGateway;

/// Account settings for one simulated run.
#[derive(Debug, Clone)]
pub struct SimBrokerConfig {
    pub initial_cash: f64,
    /// Commission as a fraction of traded notional, charged per fill.
    pub commission_rate: f64,
}

impl Default for SimBrokerConfig {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            commission_rate: 0.0006,
        }
    }
}

/// Round-trip bookkeeping for a position while it is open.
#[derive(Debug, Clone)]
struct OpenTrade {
    entry_time: NaiveDateTime,
    entry_bar: usize,
    commission: f64,
}

/// Simulated broker: owns the ledger, the cash account, net positions and
/// the closed-trade log.
#[derive(Debug)]
pub struct SimBroker {
    config: SimBrokerConfig,
    cash: f64,
    ledger: OrderLedger,
    positions: HashMap<String, Position>,
    open_trades: HashMap<String, OpenTrade>,
    trades: Vec<TradeRecord>,
    current_bar: usize,
}

impl SimBroker {
    pub fn new(config: SimBrokerConfig) -> Self {
        let cash = config.initial_cash;
        Self {
            config,
            cash,
            ledger: OrderLedger::new(),
            positions: HashMap::new(),
            open_trades: HashMap::new(),
            trades: Vec::new(),
            current_bar: 0,
        }
    }

    /// Closed round trips so far.
    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<TradeRecord> {
        self.trades
    }

    /// Match working orders against one bar and return every order whose
    /// status changed, in matching sequence. Orders submitted during this
    /// bar's callbacks wait for the next bar.
    pub fn process_bar(&mut self, bar_index: usize, bar: &Bar) -> Vec<Order> {
        self.current_bar = bar_index;
        let mut events = Vec::new();

        let working = self.ledger.working_orders(&bar.symbol);
        for id in working {
            let order = match self.ledger.get(id) {
                Some(o) if o.is_working() && o.created_bar < bar_index => o.clone(),
                _ => continue,
            };
            if let Some(price) = execution_price(&order, bar) {
                self.execute(&order, price, bar_index, bar, &mut events);
            }
        }

        self.trail_stops(bar);
        events
    }

    fn execute(
        &mut self,
        order: &Order,
        price: f64,
        bar_index: usize,
        bar: &Bar,
        events: &mut Vec<Order>,
    ) {
        // Entries that would exceed available cash are margin-rejected, not
        // partially filled.
        if order.role == OrderRole::Entry {
            let notional = price * order.remaining;
            if notional > self.cash {
                debug!(order = %order.id, notional, cash = self.cash, "margin rejection");
                if self.ledger.reject(order.id, OrderStatus::Margin).is_ok() {
                    if let Some(o) = self.ledger.get(order.id) {
                        events.push(o.clone());
                    }
                }
                return;
            }
        }

        let quantity = order.remaining;
        let signed_qty = order.side.sign() * quantity;
        let commission = self.config.commission_rate * price * quantity;

        let position = self.positions.entry(order.symbol.clone()).or_default();
        let was_flat = position.is_flat();
        let prev_qty = position.quantity;
        let prev_avg = position.avg_entry_price;
        position.apply_fill(signed_qty, price);
        let now_flat = position.is_flat();

        self.cash -= signed_qty * price;
        self.cash -= commission;

        let changed = match self.ledger.fill(order.id, price, commission, bar_index) {
            Ok(ids) => ids,
            Err(err) => {
                debug!(order = %order.id, %err, "fill bookkeeping failed");
                return;
            }
        };

        if was_flat && !now_flat {
            self.open_trades.insert(
                order.symbol.clone(),
                OpenTrade {
                    entry_time: bar.timestamp,
                    entry_bar: bar_index,
                    commission,
                },
            );
        } else if let Some(open) = self.open_trades.get_mut(&order.symbol) {
            open.commission += commission;
            if now_flat {
                let open = self.open_trades.remove(&order.symbol).unwrap();
                let direction = if prev_qty > 0.0 {
                    TradeDirection::Long
                } else {
                    TradeDirection::Short
                };
                let qty_closed = prev_qty.abs();
                let pnl = (price - prev_avg) * prev_qty - open.commission;
                let entry_notional = prev_avg * qty_closed;
                let pnl_pct = if entry_notional > 0.0 {
                    pnl / entry_notional * 100.0
                } else {
                    0.0
                };
                self.trades.push(TradeRecord {
                    symbol: order.symbol.clone(),
                    direction,
                    entry_time: open.entry_time,
                    exit_time: bar.timestamp,
                    entry_price: prev_avg,
                    exit_price: price,
                    quantity: qty_closed,
                    commission: open.commission,
                    pnl,
                    pnl_pct,
                    bar_duration: bar_index - open.entry_bar,
                });
            }
        }

        for id in changed {
            if let Some(o) = self.ledger.get(id) {
                events.push(o.clone());
            }
        }
    }

    /// Ratchet trailing-stop triggers from the bar close. Triggers only ever
    /// tighten toward the market.
    fn trail_stops(&mut self, bar: &Bar) {
        let working = self.ledger.working_orders(&bar.symbol);
        for id in working {
            let Some(order) = self.ledger.get_mut(id) else {
                continue;
            };
            if !order.is_working() {
                continue;
            }
            if let OrderKind::TrailingStop {
                distance,
                trigger_price,
            } = &mut order.kind
            {
                match order.side {
                    // Sell stop protects a long: only moves up.
                    OrderSide::Sell => {
                        let candidate = bar.close - *distance;
                        if candidate > *trigger_price {
                            *trigger_price = candidate;
                        }
                    }
                    // Buy stop protects a short: only moves down.
                    OrderSide::Buy => {
                        let candidate = bar.close + *distance;
                        if candidate < *trigger_price {
                            *trigger_price = candidate;
                        }
                    }
                }
            }
        }
    }
}

/// Price at which an order executes against this bar, or `None` if the bar
/// does not reach it.
fn execution_price(order: &Order, bar: &Bar) -> Option<f64> {
    match &order.kind {
        OrderKind::Market => Some(bar.open),
        OrderKind::Stop { trigger_price } | OrderKind::TrailingStop { trigger_price, .. } => {
            match order.side {
                OrderSide::Sell => {
                    if bar.open <= *trigger_price {
                        Some(bar.open)
                    } else if bar.low <= *trigger_price {
                        Some(*trigger_price)
                    } else {
                        None
                    }
                }
                OrderSide::Buy => {
                    if bar.open >= *trigger_price {
                        Some(bar.open)
                    } else if bar.high >= *trigger_price {
                        Some(*trigger_price)
                    } else {
                        None
                    }
                }
            }
        }
        OrderKind::Limit { limit_price } => match order.side {
            OrderSide::Sell => {
                if bar.open >= *limit_price {
                    Some(bar.open)
                } else if bar.high >= *limit_price {
                    Some(*limit_price)
                } else {
                    None
                }
            }
            OrderSide::Buy => {
                if bar.open <= *limit_price {
                    Some(bar.open)
                } else if bar.low <= *limit_price {
                    Some(*limit_price)
                } else {
                    None
                }
            }
        },
    }
}

impl BrokerGateway for SimBroker {
    fn submit(&mut self, spec: OrderSpec) -> Result<OrderId, LedgerError> {
        let id = self.ledger.submit(spec, self.current_bar);
        debug!(order = %id, "order submitted");
        Ok(id)
    }

    fn cancel(&mut self, id: OrderId) -> Result<(), LedgerError> {
        self.ledger.cancel(id)
    }

    fn resize(&mut self, id: OrderId, delta: f64) -> Result<(), LedgerError> {
        self.ledger.resize(id, delta)
    }

    fn update_trigger(&mut self, id: OrderId, price: f64) -> Result<(), LedgerError> {
        self.ledger.update_trigger(id, price)
    }

    fn order(&self, id: OrderId) -> Option<&Order> {
        self.ledger.get(id)
    }

    fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).cloned().unwrap_or_default()
    }

    fn cash(&self) -> f64 {
        self.cash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(index: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
        let t0 = NaiveDate::from_ymd_opt(2023, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Bar {
            symbol: "BTC".into(),
            timestamp: t0 + chrono::Duration::minutes(5 * index as i64),
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    fn broker() -> SimBroker {
        SimBroker::new(SimBrokerConfig {
            initial_cash: 10_000.0,
            commission_rate: 0.0,
        })
    }

    #[test]
    fn market_order_fills_at_next_bar_open() {
        let mut broker = broker();
        broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.5));
        let id = broker
            .submit(OrderSpec::market("BTC", OrderSide::Buy, 1.0, OrderRole::Entry))
            .unwrap();

        // Not filled on the submission bar.
        assert!(broker.order(id).unwrap().is_working());

        let events = broker.process_bar(1, &bar(1, 102.0, 103.0, 101.0, 102.5));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, OrderStatus::Filled);
        assert_eq!(events[0].fill.as_ref().unwrap().price, 102.0);
        assert_eq!(broker.position("BTC").quantity, 1.0);
    }

    #[test]
    fn trailing_stop_ratchets_up_and_fills() {
        let mut broker = broker();
        broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Buy, 1.0, OrderRole::Entry))
            .unwrap();
        broker.process_bar(1, &bar(1, 100.0, 101.0, 99.5, 100.0));

        let stop = broker
            .submit(OrderSpec {
                symbol: "BTC".into(),
                side: OrderSide::Sell,
                quantity: 1.0,
                kind: OrderKind::TrailingStop {
                    distance: 2.0,
                    trigger_price: 98.0,
                },
                role: OrderRole::StopLoss,
                parent: None,
                oco: None,
            })
            .unwrap();

        // Rally: trigger ratchets to close - distance.
        broker.process_bar(2, &bar(2, 104.0, 106.0, 103.0, 105.0));
        let trigger = broker.order(stop).unwrap().kind.trigger_price().unwrap();
        assert_eq!(trigger, 103.0);

        // Pullback that stays above the trigger leaves it in place.
        broker.process_bar(3, &bar(3, 104.5, 104.8, 103.5, 104.0));
        let trigger = broker.order(stop).unwrap().kind.trigger_price().unwrap();
        assert_eq!(trigger, 103.0);

        // Drop through the trigger fills at the trigger.
        let events = broker.process_bar(4, &bar(4, 103.8, 103.9, 102.0, 102.2));
        let fill = events
            .iter()
            .find(|o| o.id == stop && o.status == OrderStatus::Filled)
            .expect("stop should fill");
        assert_eq!(fill.fill.as_ref().unwrap().price, 103.0);
        assert!(broker.position("BTC").is_flat());
        assert_eq!(broker.trades().len(), 1);
    }

    #[test]
    fn gap_through_stop_fills_at_open() {
        let mut broker = broker();
        broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Buy, 1.0, OrderRole::Entry))
            .unwrap();
        broker.process_bar(1, &bar(1, 100.0, 101.0, 99.5, 100.0));
        let stop = broker
            .submit(OrderSpec {
                symbol: "BTC".into(),
                side: OrderSide::Sell,
                quantity: 1.0,
                kind: OrderKind::Stop { trigger_price: 98.0 },
                role: OrderRole::StopLoss,
                parent: None,
                oco: None,
            })
            .unwrap();

        let events = broker.process_bar(2, &bar(2, 95.0, 96.0, 94.0, 95.5));
        let fill = events.iter().find(|o| o.id == stop).unwrap();
        assert_eq!(fill.fill.as_ref().unwrap().price, 95.0);
    }

    #[test]
    fn entry_beyond_cash_is_margin_rejected() {
        let mut broker = broker();
        broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.0));
        let id = broker
            .submit(OrderSpec::market(
                "BTC",
                OrderSide::Buy,
                1_000.0,
                OrderRole::Entry,
            ))
            .unwrap();

        let events = broker.process_bar(1, &bar(1, 100.0, 101.0, 99.0, 100.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, OrderStatus::Margin);
        assert_eq!(broker.order(id).unwrap().status, OrderStatus::Margin);
        assert!(broker.position("BTC").is_flat());
        assert_eq!(broker.cash(), 10_000.0);
    }

    #[test]
    fn oco_target_fill_cancels_stop() {
        let mut broker = broker();
        broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Buy, 1.0, OrderRole::Entry))
            .unwrap();
        broker.process_bar(1, &bar(1, 100.0, 101.0, 99.5, 100.0));

        let stop = broker
            .submit(OrderSpec {
                symbol: "BTC".into(),
                side: OrderSide::Sell,
                quantity: 1.0,
                kind: OrderKind::Stop { trigger_price: 95.0 },
                role: OrderRole::StopLoss,
                parent: None,
                oco: None,
            })
            .unwrap();
        let target = broker
            .submit(OrderSpec {
                symbol: "BTC".into(),
                side: OrderSide::Sell,
                quantity: 1.0,
                kind: OrderKind::Limit { limit_price: 110.0 },
                role: OrderRole::TakeProfit,
                parent: None,
                oco: Some(stop),
            })
            .unwrap();

        let events = broker.process_bar(2, &bar(2, 108.0, 112.0, 107.0, 111.0));
        assert!(events
            .iter()
            .any(|o| o.id == target && o.status == OrderStatus::Filled));
        assert!(events
            .iter()
            .any(|o| o.id == stop && o.status == OrderStatus::Canceled));

        let trade = &broker.trades()[0];
        assert_eq!(trade.exit_price, 110.0);
        assert!(trade.is_winner());
    }

    #[test]
    fn commission_reduces_trade_pnl() {
        let mut broker = SimBroker::new(SimBrokerConfig {
            initial_cash: 10_000.0,
            commission_rate: 0.001,
        });
        broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Buy, 1.0, OrderRole::Entry))
            .unwrap();
        broker.process_bar(1, &bar(1, 100.0, 101.0, 99.0, 100.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Sell, 1.0, OrderRole::TakeProfit))
            .unwrap();
        broker.process_bar(2, &bar(2, 110.0, 111.0, 109.0, 110.0));

        let trade = &broker.trades()[0];
        let expected_commission = 0.001 * 100.0 + 0.001 * 110.0;
        assert!((trade.commission - expected_commission).abs() < 1e-10);
        assert!((trade.pnl - (10.0 - expected_commission)).abs() < 1e-10);
        assert_eq!(trade.bar_duration, 1);
    }

    proptest::proptest! {
        // The protective trigger of a long only ever moves up, whatever the
        // close sequence does.
        #[test]
        fn trailing_trigger_never_loosens(closes in proptest::collection::vec(50.0f64..150.0, 1..40)) {
            let mut broker = SimBroker::new(SimBrokerConfig {
                initial_cash: 1_000_000.0,
                commission_rate: 0.0,
            });
            broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.0));
            let stop = broker
                .submit(OrderSpec {
                    symbol: "BTC".into(),
                    side: OrderSide::Sell,
                    quantity: 1.0,
                    kind: OrderKind::TrailingStop {
                        distance: 5.0,
                        trigger_price: 0.0,
                    },
                    role: OrderRole::StopLoss,
                    parent: None,
                    oco: None,
                })
                .unwrap();

            let mut last_trigger = 0.0;
            for (i, close) in closes.iter().enumerate() {
                // Degenerate bars that never cross the stop, so only the
                // ratchet moves.
                let b = bar(i + 1, *close + 200.0, *close + 200.0, *close + 200.0, *close);
                broker.process_bar(i + 1, &b);
                let Some(order) = broker.order(stop) else { break };
                if !order.is_working() {
                    break;
                }
                let trigger = order.kind.trigger_price().unwrap();
                proptest::prop_assert!(trigger >= last_trigger);
                last_trigger = trigger;
            }
        }
    }

    #[test]
    fn scale_in_produces_single_round_trip() {
        let mut broker = broker();
        broker.process_bar(0, &bar(0, 100.0, 101.0, 99.0, 100.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Buy, 1.0, OrderRole::Entry))
            .unwrap();
        broker.process_bar(1, &bar(1, 100.0, 101.0, 99.0, 100.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Buy, 1.0, OrderRole::Entry))
            .unwrap();
        broker.process_bar(2, &bar(2, 110.0, 111.0, 109.0, 110.0));
        broker
            .submit(OrderSpec::market("BTC", OrderSide::Sell, 2.0, OrderRole::TakeProfit))
            .unwrap();
        broker.process_bar(3, &bar(3, 120.0, 121.0, 119.0, 120.0));

        assert_eq!(broker.trades().len(), 1);
        let trade = &broker.trades()[0];
        assert_eq!(trade.quantity, 2.0);
        assert!((trade.entry_price - 105.0).abs() < 1e-10);
        assert!((trade.pnl - 30.0).abs() < 1e-10);
    }
}
