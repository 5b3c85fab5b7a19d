//! Single-instrument squeeze strategy.
//!
//! Entries trigger on a volatility-squeeze release confirmed by rising
//! momentum and trend direction. A trailing stop rides the whole trade; once
//! price reaches an ATR-multiple target the stop gets an OCO trailing-target
//! partner, and a trade that never reaches the target is flattened after a
//! maximum number of bars.

use crate::broker::{BrokerGateway, OrderSpec};
use crate::domain::{Bar, Order, OrderId, OrderKind, OrderRole, OrderSide, OrderStatus};
use crate::signal::SignalSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::{Clock, Strategy};

/// Tunable knobs for one squeeze run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqueezeConfig {
    /// Trailing distance of the profit-target stop.
    pub tp_trail_percent: f64,
    /// Trailing distance of the protective stop.
    pub sl_trail_percent: f64,
    /// Interpret the trail values as ATR multiples instead of percent of price.
    pub percent_is_atr: bool,
    /// Target level as a multiple of the entry-bar ATR.
    pub tp_atr_multiplier: f64,
    /// Bars to hold before flattening a trade that never reached its target.
    pub max_trade_duration: usize,
    /// Require a momentum reset between consecutive entries.
    pub use_good_momentum: bool,
    /// Order size.
    pub quantity: f64,
}

impl Default for SqueezeConfig {
    fn default() -> Self {
        Self {
            tp_trail_percent: 0.4,
            sl_trail_percent: 0.7,
            percent_is_atr: true,
            tp_atr_multiplier: 2.3,
            max_trade_duration: 9,
            use_good_momentum: true,
            quantity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Flat, scanning for an entry signal.
    Idle,
    /// Entry order submitted, waiting for its fill.
    PendingEntry,
    /// Position open, protective stop working.
    InPosition,
    /// An exit is working the position flat: either the trailing target
    /// after the ATR level was reached, or the timeout market order.
    PendingExit,
}

/// The squeeze state machine for one instrument.
pub struct SqueezeStrategy {
    symbol: String,
    config: SqueezeConfig,

    phase: Phase,
    entry_side: OrderSide,
    entry_order: Option<OrderId>,
    sl_order: Option<OrderId>,
    tp_order: Option<OrderId>,

    entry_bar: usize,
    entry_price: f64,
    entry_atr: f64,

    /// Cleared when a trade closes; re-armed on the next momentum zero
    /// crossing so back-to-back entries need a fresh momentum cycle.
    momentum_armed: bool,
}

impl SqueezeStrategy {
    pub fn new(symbol: impl Into<String>, config: SqueezeConfig) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            phase: Phase::Idle,
            entry_side: OrderSide::Buy,
            entry_order: None,
            sl_order: None,
            tp_order: None,
            entry_bar: 0,
            entry_price: 0.0,
            entry_atr: 0.0,
            momentum_armed: true,
        }
    }

    fn trail_distance(&self, percent: f64, atr: f64, price: f64) -> f64 {
        if self.config.percent_is_atr {
            percent * atr
        } else {
            percent / 100.0 * price
        }
    }

    fn momentum_gate(&self, snap: &SignalSnapshot) -> bool {
        !self.config.use_good_momentum || (snap.good_momentum && self.momentum_armed)
    }

    fn entry_signal(&self, snap: &SignalSnapshot) -> Option<OrderSide> {
        if !snap.squeeze_fired || !self.momentum_gate(snap) {
            return None;
        }
        if snap.trend_up && snap.momentum > 0.0 && snap.momentum > snap.momentum_prev {
            Some(OrderSide::Buy)
        } else if snap.trend_down && snap.momentum < 0.0 && snap.momentum < snap.momentum_prev {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    fn open_entry(
        &mut self,
        side: OrderSide,
        bar: &Bar,
        snap: &SignalSnapshot,
        broker: &mut dyn BrokerGateway,
    ) {
        let entry = match broker.submit(OrderSpec::market(
            self.symbol.clone(),
            side,
            self.config.quantity,
            OrderRole::Entry,
        )) {
            Ok(id) => id,
            Err(err) => {
                debug!(symbol = %self.symbol, %err, "entry submit failed");
                return;
            }
        };

        let distance = self.trail_distance(self.config.sl_trail_percent, snap.atr, bar.close);
        let trigger = match side {
            OrderSide::Buy => bar.close - distance,
            OrderSide::Sell => bar.close + distance,
        };
        let stop = broker.submit(OrderSpec {
            symbol: self.symbol.clone(),
            side: side.opposite(),
            quantity: self.config.quantity,
            kind: OrderKind::TrailingStop {
                distance,
                trigger_price: trigger,
            },
            role: OrderRole::StopLoss,
            parent: Some(entry),
            oco: None,
        });

        self.entry_side = side;
        self.entry_order = Some(entry);
        self.sl_order = stop.ok();
        self.tp_order = None;
        self.entry_atr = snap.atr;
        self.phase = Phase::PendingEntry;
        debug!(symbol = %self.symbol, ?side, "entry submitted");
    }

    fn target_reached(&self, close: f64) -> bool {
        let offset = self.config.tp_atr_multiplier * self.entry_atr;
        match self.entry_side {
            OrderSide::Buy => close >= self.entry_price + offset,
            OrderSide::Sell => close <= self.entry_price - offset,
        }
    }

    fn place_trailing_target(
        &mut self,
        bar: &Bar,
        snap: &SignalSnapshot,
        broker: &mut dyn BrokerGateway,
    ) {
        let distance = self.trail_distance(self.config.tp_trail_percent, snap.atr, bar.close);
        let trigger = match self.entry_side {
            OrderSide::Buy => bar.close - distance,
            OrderSide::Sell => bar.close + distance,
        };
        let spec = OrderSpec {
            symbol: self.symbol.clone(),
            side: self.entry_side.opposite(),
            quantity: self.config.quantity,
            kind: OrderKind::TrailingStop {
                distance,
                trigger_price: trigger,
            },
            role: OrderRole::TakeProfit,
            parent: None,
            oco: self.sl_order,
        };
        match broker.submit(spec) {
            Ok(id) => {
                self.tp_order = Some(id);
                self.phase = Phase::PendingExit;
                debug!(symbol = %self.symbol, trigger, "trailing target placed");
            }
            Err(err) => debug!(symbol = %self.symbol, %err, "target submit failed"),
        }
    }

    fn flatten_on_timeout(&mut self, broker: &mut dyn BrokerGateway) {
        if let Some(sl) = self.sl_order.take() {
            if let Err(err) = broker.cancel(sl) {
                debug!(symbol = %self.symbol, %err, "stop cancel failed");
            }
        }
        if broker
            .submit(OrderSpec::market(
                self.symbol.clone(),
                self.entry_side.opposite(),
                self.config.quantity,
                OrderRole::TakeProfit,
            ))
            .is_ok()
        {
            self.phase = Phase::PendingExit;
            debug!(symbol = %self.symbol, "max duration reached, flattening");
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.entry_order = None;
        self.sl_order = None;
        self.tp_order = None;
        self.entry_price = 0.0;
        self.entry_atr = 0.0;
    }
}

impl Strategy for SqueezeStrategy {
    fn on_order_event(&mut self, order: &Order, broker: &mut dyn BrokerGateway) {
        if order.symbol != self.symbol {
            return;
        }
        match order.status {
            OrderStatus::Filled => {
                if Some(order.id) == self.entry_order {
                    let fill = order.fill.as_ref();
                    self.entry_price = fill.map(|f| f.price).unwrap_or(self.entry_price);
                    self.entry_bar = fill.map(|f| f.bar).unwrap_or(self.entry_bar);
                    self.phase = Phase::InPosition;
                    debug!(symbol = %self.symbol, price = self.entry_price, "entry filled");
                } else if order.role != OrderRole::Entry {
                    // Stop, target or timeout close: the trade is over.
                    self.momentum_armed = false;
                    self.reset();
                    debug!(symbol = %self.symbol, order = %order.id, "position closed");
                }
            }
            OrderStatus::Margin | OrderStatus::Rejected => {
                if Some(order.id) == self.entry_order {
                    // The bracket stop never activated; drop it with the entry.
                    if let Some(sl) = self.sl_order.take() {
                        let _ = broker.cancel(sl);
                    }
                    self.reset();
                }
            }
            OrderStatus::Canceled => {
                if Some(order.id) == self.sl_order {
                    self.sl_order = None;
                }
                if Some(order.id) == self.tp_order {
                    self.tp_order = None;
                }
            }
            _ => {}
        }
    }

    fn on_bar(
        &mut self,
        clock: &Clock,
        bars: &BTreeMap<String, Bar>,
        snapshots: &BTreeMap<String, SignalSnapshot>,
        broker: &mut dyn BrokerGateway,
    ) {
        let (Some(bar), Some(snap)) = (bars.get(&self.symbol), snapshots.get(&self.symbol)) else {
            return;
        };

        // A fresh momentum zero crossing re-arms the entry gate.
        if !self.momentum_armed
            && (snap.momentum == 0.0 || snap.momentum.signum() != snap.momentum_prev.signum())
        {
            self.momentum_armed = true;
        }

        match self.phase {
            Phase::Idle => {
                if let Some(side) = self.entry_signal(snap) {
                    self.open_entry(side, bar, snap, broker);
                }
            }
            Phase::PendingEntry | Phase::PendingExit => {
                // Waiting on the broker; nothing to decide this bar.
            }
            Phase::InPosition => {
                if self.target_reached(bar.close) {
                    self.place_trailing_target(bar, snap, broker);
                } else if self.config.max_trade_duration > 0
                    // Entry bar counts; the closing market order fills on the
                    // next open, so the round trip lasts exactly the limit.
                    && clock.bar_index + 1 - self.entry_bar >= self.config.max_trade_duration
                {
                    self.flatten_on_timeout(broker);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{SimBroker, SimBrokerConfig};
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

    fn flat_snapshot(atr: f64) -> SignalSnapshot {
        SignalSnapshot {
            atr,
            ..SignalSnapshot::default()
        }
    }

    /// Positive momentum drifting lower without a zero crossing.
    fn drift_snapshot(atr: f64) -> SignalSnapshot {
        SignalSnapshot {
            momentum: 1.0,
            momentum_prev: 1.2,
            atr,
            ..SignalSnapshot::default()
        }
    }

    fn long_entry_snapshot(atr: f64) -> SignalSnapshot {
        SignalSnapshot {
            squeeze_fired: true,
            momentum: 2.0,
            momentum_prev: 1.0,
            trend_up: true,
            good_momentum: true,
            atr,
            ..SignalSnapshot::default()
        }
    }

    fn step(
        broker: &mut SimBroker,
        strategy: &mut SqueezeStrategy,
        index: usize,
        bar: &Bar,
        snap: SignalSnapshot,
    ) {
        let events = broker.process_bar(index, bar);
        for order in &events {
            strategy.on_order_event(order, broker);
        }
        let clock = Clock {
            bar_index: index,
            timestamp: bar.timestamp,
        };
        let mut bars = BTreeMap::new();
        bars.insert(bar.symbol.clone(), bar.clone());
        let mut snaps = BTreeMap::new();
        snaps.insert(bar.symbol.clone(), snap);
        strategy.on_bar(&clock, &bars, &snaps, broker);
    }

    fn test_broker() -> SimBroker {
        SimBroker::new(SimBrokerConfig {
            initial_cash: 100_000.0,
            commission_rate: 0.0,
        })
    }

    #[test]
    fn long_trade_reaches_target_and_trails_out() {
        let mut broker = test_broker();
        let mut strategy = SqueezeStrategy::new("BTC", SqueezeConfig::default());

        // Signal bar: squeeze fires with rising positive momentum.
        step(&mut broker, &mut strategy, 0, &bar(0, 100.0, 101.0, 99.0, 100.0), long_entry_snapshot(2.0));

        // Entry fills at next open.
        step(&mut broker, &mut strategy, 1, &bar(1, 100.0, 101.0, 99.5, 100.5), flat_snapshot(2.0));
        assert_eq!(broker.position("BTC").quantity, 1.0);

        // Close crosses entry + 2.3 * atr = 104.6: trailing target goes on
        // and the machine hands the exit to the bracket.
        step(&mut broker, &mut strategy, 2, &bar(2, 104.0, 106.0, 103.5, 105.0), flat_snapshot(2.0));
        assert!(strategy.tp_order.is_some());
        assert_eq!(strategy.phase, Phase::PendingExit);

        // Rally ratchets the target trigger up.
        step(&mut broker, &mut strategy, 3, &bar(3, 106.0, 108.0, 105.5, 107.5), flat_snapshot(2.0));

        // Pullback through the trailed trigger closes the trade in profit.
        step(&mut broker, &mut strategy, 4, &bar(4, 107.0, 107.2, 104.0, 104.5), flat_snapshot(2.0));

        assert!(broker.position("BTC").is_flat());
        assert_eq!(broker.trades().len(), 1);
        assert!(broker.trades()[0].is_winner());
        assert_eq!(strategy.phase, Phase::Idle);
    }

    #[test]
    fn stale_trade_is_flattened_after_max_duration() {
        let mut broker = test_broker();
        // Default limit of 9 bars, ATR-relative trails.
        let mut strategy = SqueezeStrategy::new("BTC", SqueezeConfig::default());

        step(&mut broker, &mut strategy, 0, &bar(0, 100.0, 101.0, 99.0, 100.0), long_entry_snapshot(2.0));
        // Price goes nowhere: never reaches the target, never hits the stop.
        // Entry fills at bar 1, so the duration limit elapses on bar 9.
        for i in 1..=9 {
            step(&mut broker, &mut strategy, i, &bar(i, 100.0, 100.8, 99.2, 100.0), flat_snapshot(2.0));
        }
        assert_eq!(strategy.phase, Phase::PendingExit);
        // The ATR target path never armed a take-profit order.
        assert!(strategy.tp_order.is_none());

        // Flattening market order fills on the following bar.
        step(&mut broker, &mut strategy, 10, &bar(10, 100.0, 100.5, 99.5, 100.0), flat_snapshot(2.0));
        assert!(broker.position("BTC").is_flat());
        assert_eq!(broker.trades().len(), 1);
        assert_eq!(broker.trades()[0].bar_duration, 9);
        assert_eq!(strategy.phase, Phase::Idle);
    }

    #[test]
    fn short_entry_on_falling_momentum() {
        let mut broker = test_broker();
        let mut strategy = SqueezeStrategy::new("BTC", SqueezeConfig::default());

        let snap = SignalSnapshot {
            squeeze_fired: true,
            momentum: -2.0,
            momentum_prev: -1.0,
            trend_down: true,
            good_momentum: true,
            atr: 2.0,
            ..SignalSnapshot::default()
        };
        step(&mut broker, &mut strategy, 0, &bar(0, 100.0, 101.0, 99.0, 100.0), snap);
        step(&mut broker, &mut strategy, 1, &bar(1, 99.5, 100.0, 98.5, 99.0), flat_snapshot(2.0));
        assert!(broker.position("BTC").is_short());
    }

    #[test]
    fn good_momentum_gate_blocks_back_to_back_entries() {
        let mut broker = test_broker();
        let mut strategy = SqueezeStrategy::new(
            "BTC",
            SqueezeConfig {
                max_trade_duration: 2,
                ..SqueezeConfig::default()
            },
        );

        step(&mut broker, &mut strategy, 0, &bar(0, 100.0, 101.0, 99.0, 100.0), long_entry_snapshot(2.0));
        step(&mut broker, &mut strategy, 1, &bar(1, 100.0, 100.8, 99.2, 100.0), drift_snapshot(2.0));
        step(&mut broker, &mut strategy, 2, &bar(2, 100.0, 100.8, 99.2, 100.0), drift_snapshot(2.0));
        step(&mut broker, &mut strategy, 3, &bar(3, 100.0, 100.8, 99.2, 100.0), drift_snapshot(2.0));
        // Timeout close fills here; the gate is now disarmed.
        step(&mut broker, &mut strategy, 4, &bar(4, 100.0, 100.8, 99.2, 100.0), long_entry_snapshot(2.0));
        assert_eq!(broker.trades().len(), 1);
        assert_eq!(strategy.phase, Phase::Idle);

        // Same signal without a momentum reset: no new entry.
        step(&mut broker, &mut strategy, 5, &bar(5, 100.0, 100.8, 99.2, 100.0), long_entry_snapshot(2.0));
        assert_eq!(strategy.phase, Phase::Idle);

        // Momentum crosses zero, gate re-arms, entry goes through.
        let reset = SignalSnapshot {
            momentum: -0.5,
            momentum_prev: 0.5,
            atr: 2.0,
            ..SignalSnapshot::default()
        };
        step(&mut broker, &mut strategy, 6, &bar(6, 100.0, 100.8, 99.2, 100.0), reset);
        step(&mut broker, &mut strategy, 7, &bar(7, 100.0, 100.8, 99.2, 100.0), long_entry_snapshot(2.0));
        assert_eq!(strategy.phase, Phase::PendingEntry);
    }

    #[test]
    fn margin_rejected_entry_returns_to_idle() {
        let mut broker = SimBroker::new(SimBrokerConfig {
            initial_cash: 10.0,
            commission_rate: 0.0,
        });
        let mut strategy = SqueezeStrategy::new("BTC", SqueezeConfig::default());

        step(&mut broker, &mut strategy, 0, &bar(0, 100.0, 101.0, 99.0, 100.0), long_entry_snapshot(2.0));
        assert_eq!(strategy.phase, Phase::PendingEntry);

        step(&mut broker, &mut strategy, 1, &bar(1, 100.0, 101.0, 99.0, 100.0), flat_snapshot(2.0));
        assert_eq!(strategy.phase, Phase::Idle);
        assert!(broker.position("BTC").is_flat());
    }
}
