//! Multi-instrument scaled-entry strategy.
//!
//! Each instrument runs an independent build machine: a unanimous run of
//! directional bias arms a build, entries scale in one unit per bar while
//! price sits inside the channel, and a shared stop/target pair is resized to
//! cover the whole position. When the signal breaks, a flat instrument resets
//! and a positioned one stops scaling and lets the bracket finish the trade.

use crate::broker::{BrokerGateway, OrderSpec};
use crate::domain::{Bar, Order, OrderId, OrderKind, OrderRole, OrderSide, OrderStatus};
use crate::signal::SignalSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use super::{Clock, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBuildConfig {
    /// Consecutive bars of unanimous bias required to arm a build.
    pub build_window: usize,
    /// Zero-bias bars that invalidate a signal active this many bars ago.
    pub break_window: usize,
    /// Size of each scale-in entry.
    pub quantity_per_entry: f64,
}

impl Default for ChannelBuildConfig {
    fn default() -> Self {
        Self {
            build_window: 6,
            break_window: 3,
            quantity_per_entry: 1.0,
        }
    }
}

/// Lifecycle of one instrument inside the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerState {
    /// No active signal.
    Neutral,
    /// Bullish signal armed, scaling in while price is in the channel.
    BuildLong,
    /// Bearish counterpart of `BuildLong`.
    BuildShort,
    /// Long position kept after the signal broke; bracket manages the exit.
    HoldLong,
    HoldShort,
}

impl TickerState {
    fn is_build(&self) -> bool {
        matches!(self, TickerState::BuildLong | TickerState::BuildShort)
    }
}

/// Per-instrument order slots and signal memory.
#[derive(Debug, Default)]
struct InstrumentBook {
    state: Option<TickerState>,
    bias_history: VecDeque<f64>,
    entry_orders: Vec<OrderId>,
    sl_order: Option<OrderId>,
    tp_order: Option<OrderId>,
}

impl InstrumentBook {
    fn state(&self) -> TickerState {
        self.state.unwrap_or(TickerState::Neutral)
    }

    fn clear_orders(&mut self) {
        self.entry_orders.clear();
        self.sl_order = None;
        self.tp_order = None;
    }
}

pub struct ChannelBuildStrategy {
    config: ChannelBuildConfig,
    books: BTreeMap<String, InstrumentBook>,
}

impl ChannelBuildStrategy {
    pub fn new(config: ChannelBuildConfig) -> Self {
        Self {
            config,
            books: BTreeMap::new(),
        }
    }

    pub fn ticker_state(&self, symbol: &str) -> TickerState {
        self.books
            .get(symbol)
            .map(|b| b.state())
            .unwrap_or(TickerState::Neutral)
    }

    /// The bias was live `break_window` bars ago and has been flat since.
    fn signal_broken(history: &VecDeque<f64>, break_window: usize) -> bool {
        let n = history.len();
        if n < break_window + 1 {
            return false;
        }
        let was_live = history[n - 1 - break_window] != 0.0;
        let now_flat = history.iter().skip(n - break_window).all(|b| *b == 0.0);
        was_live && now_flat
    }

    /// The bar reached the stop or target level before any size was on.
    fn levels_touched(state: TickerState, bar: &Bar, snap: &SignalSnapshot) -> bool {
        match state {
            TickerState::BuildLong => {
                bar.low <= snap.channel_stop_long || bar.high >= snap.channel_target_long
            }
            TickerState::BuildShort => {
                bar.high >= snap.channel_stop_short || bar.low <= snap.channel_target_short
            }
            _ => false,
        }
    }

    fn cancel_working(&mut self, symbol: &str, broker: &mut dyn BrokerGateway) {
        let Some(book) = self.books.get_mut(symbol) else {
            return;
        };
        let mut ids = book.entry_orders.clone();
        ids.extend(book.sl_order);
        ids.extend(book.tp_order);
        for id in ids {
            let working = broker
                .order(id)
                .map(|o| !o.is_terminal())
                .unwrap_or(false);
            if working {
                if let Err(err) = broker.cancel(id) {
                    debug!(symbol, order = %id, %err, "cancel failed");
                }
            }
        }
        book.clear_orders();
    }

    fn submit_entry(
        &mut self,
        symbol: &str,
        snap: &SignalSnapshot,
        broker: &mut dyn BrokerGateway,
    ) {
        let state = self.ticker_state(symbol);
        let (entry_side, stop_level, target_level) = match state {
            TickerState::BuildLong => {
                (OrderSide::Buy, snap.channel_stop_long, snap.channel_target_long)
            }
            TickerState::BuildShort => {
                (OrderSide::Sell, snap.channel_stop_short, snap.channel_target_short)
            }
            _ => return,
        };
        let qty = self.config.quantity_per_entry;

        let entry = match broker.submit(OrderSpec::market(
            symbol.to_string(),
            entry_side,
            qty,
            OrderRole::Entry,
        )) {
            Ok(id) => id,
            Err(err) => {
                debug!(symbol, %err, "entry submit failed");
                return;
            }
        };

        let book = self.books.entry(symbol.to_string()).or_default();
        let first = book.entry_orders.is_empty();
        book.entry_orders.push(entry);

        if first {
            // One bracket covers the whole build; later entries only resize it.
            let stop = broker.submit(OrderSpec {
                symbol: symbol.to_string(),
                side: entry_side.opposite(),
                quantity: qty,
                kind: OrderKind::Stop {
                    trigger_price: stop_level,
                },
                role: OrderRole::StopLoss,
                parent: Some(entry),
                oco: None,
            });
            let book_stop = stop.ok();
            let target = broker.submit(OrderSpec {
                symbol: symbol.to_string(),
                side: entry_side.opposite(),
                quantity: qty,
                kind: OrderKind::Limit {
                    limit_price: target_level,
                },
                role: OrderRole::TakeProfit,
                parent: Some(entry),
                oco: book_stop,
            });
            let book = self.books.entry(symbol.to_string()).or_default();
            book.sl_order = book_stop;
            book.tp_order = target.ok();
            debug!(symbol, ?entry_side, "bracket entry submitted");
        } else {
            let (sl, tp) = (book.sl_order, book.tp_order);
            for id in [sl, tp].into_iter().flatten() {
                if let Err(err) = broker.resize(id, qty) {
                    debug!(symbol, order = %id, %err, "resize failed");
                }
            }
            debug!(symbol, "scale-in entry submitted");
        }
    }

    /// Move the bracket to this bar's channel bounds.
    fn refresh_levels(&self, symbol: &str, snap: &SignalSnapshot, broker: &mut dyn BrokerGateway) {
        let Some(book) = self.books.get(symbol) else {
            return;
        };
        let (stop_level, target_level) = match book.state() {
            TickerState::BuildLong | TickerState::HoldLong => {
                (snap.channel_stop_long, snap.channel_target_long)
            }
            TickerState::BuildShort | TickerState::HoldShort => {
                (snap.channel_stop_short, snap.channel_target_short)
            }
            TickerState::Neutral => return,
        };
        for (id, level) in [(book.sl_order, stop_level), (book.tp_order, target_level)] {
            let Some(id) = id else { continue };
            let updatable = broker
                .order(id)
                .map(|o| !o.is_terminal())
                .unwrap_or(false);
            if updatable {
                if let Err(err) = broker.update_trigger(id, level) {
                    debug!(symbol, order = %id, %err, "level update failed");
                }
            }
        }
    }

    /// Phase one: record the bias, apply the state transition, and say what
    /// phase two should do with the broker. No orders move here.
    fn plan_symbol(
        &mut self,
        symbol: &str,
        bar: &Bar,
        snap: &SignalSnapshot,
        broker: &dyn BrokerGateway,
    ) -> BarAction {
        let build_window = self.config.build_window;
        let break_window = self.config.break_window;
        let capacity = build_window + break_window;

        let book = self.books.entry(symbol.to_string()).or_default();
        book.bias_history.push_back(snap.bias);
        while book.bias_history.len() > capacity {
            book.bias_history.pop_front();
        }

        match book.state() {
            TickerState::Neutral => {
                let n = book.bias_history.len();
                if n >= build_window {
                    let window = book.bias_history.iter().skip(n - build_window);
                    let mut longs = 0usize;
                    let mut shorts = 0usize;
                    for bias in window {
                        if *bias > 0.0 {
                            longs += 1;
                        } else if *bias < 0.0 {
                            shorts += 1;
                        }
                    }
                    if longs == build_window {
                        book.state = Some(TickerState::BuildLong);
                        debug!(symbol, "build long armed");
                    } else if shorts == build_window {
                        book.state = Some(TickerState::BuildShort);
                        debug!(symbol, "build short armed");
                    }
                }
                BarAction::Nothing
            }
            state if state.is_build() => {
                let broken = Self::signal_broken(&book.bias_history, break_window);
                let position = broker.position(symbol);

                if position.is_flat() && (broken || Self::levels_touched(state, bar, snap)) {
                    // The setup died before any size was on.
                    book.state = Some(TickerState::Neutral);
                    debug!(symbol, "build abandoned");
                    BarAction::Abandon
                } else if !position.is_flat() && broken {
                    // Stop scaling, keep the bracket working the exit.
                    let hold = if state == TickerState::BuildLong {
                        TickerState::HoldLong
                    } else {
                        TickerState::HoldShort
                    };
                    book.state = Some(hold);
                    debug!(symbol, ?hold, "signal broke, holding position");
                    BarAction::EnterHold
                } else if snap.in_channel {
                    BarAction::Scale
                } else {
                    BarAction::Refresh
                }
            }
            _ => {
                // Hold states only track the bracket levels.
                BarAction::Refresh
            }
        }
    }

    /// Phase two: broker work decided in phase one.
    fn apply_action(
        &mut self,
        symbol: &str,
        action: BarAction,
        snap: &SignalSnapshot,
        broker: &mut dyn BrokerGateway,
    ) {
        match action {
            BarAction::Nothing => {}
            BarAction::Abandon => self.cancel_working(symbol, broker),
            BarAction::EnterHold => {
                let pending: Vec<OrderId> = self
                    .books
                    .get(symbol)
                    .map(|b| b.entry_orders.clone())
                    .unwrap_or_default();
                for id in pending {
                    let working = broker.order(id).map(|o| o.is_working()).unwrap_or(false);
                    if working {
                        let _ = broker.cancel(id);
                    }
                }
                self.refresh_levels(symbol, snap, broker);
            }
            BarAction::Scale => {
                self.submit_entry(symbol, snap, broker);
                self.refresh_levels(symbol, snap, broker);
            }
            BarAction::Refresh => self.refresh_levels(symbol, snap, broker),
        }
    }
}

/// Broker work owed to one instrument after its transition.
#[derive(Debug, Clone, Copy)]
enum BarAction {
    Nothing,
    /// Flat and the setup died: cancel everything.
    Abandon,
    /// Position kept after a signal break: cancel pending entries only.
    EnterHold,
    /// Still building and in channel: add size.
    Scale,
    /// Track the channel with the bracket.
    Refresh,
}

impl Strategy for ChannelBuildStrategy {
    fn on_order_event(&mut self, order: &Order, broker: &mut dyn BrokerGateway) {
        let Some(book) = self.books.get_mut(&order.symbol) else {
            return;
        };

        match order.status {
            OrderStatus::Filled => {
                let closed = Some(order.id) == book.sl_order || Some(order.id) == book.tp_order;
                if closed {
                    // A scale-in entry submitted before the close can still be
                    // working; left alone it would reopen the flat position.
                    for id in book.entry_orders.clone() {
                        let working = broker.order(id).map(|o| o.is_working()).unwrap_or(false);
                        if working {
                            if let Err(err) = broker.cancel(id) {
                                debug!(symbol = %order.symbol, order = %id, %err, "cancel failed");
                            }
                        }
                    }
                    book.state = Some(TickerState::Neutral);
                    book.clear_orders();
                    book.bias_history.clear();
                    debug!(symbol = %order.symbol, order = %order.id, "build closed");
                }
            }
            OrderStatus::Margin | OrderStatus::Rejected => {
                let was_first = book.entry_orders.first() == Some(&order.id);
                book.entry_orders.retain(|id| *id != order.id);
                if was_first {
                    // Its bracket children never activated.
                    let symbol = order.symbol.clone();
                    self.cancel_working(&symbol, broker);
                    if let Some(book) = self.books.get_mut(&symbol) {
                        book.state = Some(TickerState::Neutral);
                    }
                }
            }
            _ => {}
        }
    }

    /// Two passes over the instruments: every transition settles before any
    /// order is submitted, so simultaneous decisions see consistent state.
    fn on_bar(
        &mut self,
        _clock: &Clock,
        bars: &BTreeMap<String, Bar>,
        snapshots: &BTreeMap<String, SignalSnapshot>,
        broker: &mut dyn BrokerGateway,
    ) {
        let mut actions: Vec<(String, BarAction)> = Vec::with_capacity(snapshots.len());
        for (symbol, snap) in snapshots {
            let Some(bar) = bars.get(symbol) else {
                continue;
            };
            let action = self.plan_symbol(symbol, bar, snap, broker);
            actions.push((symbol.clone(), action));
        }

        for (symbol, action) in actions {
            if let Some(snap) = snapshots.get(&symbol) {
                self.apply_action(&symbol, action, snap, broker);
            }
        }
    }
}
