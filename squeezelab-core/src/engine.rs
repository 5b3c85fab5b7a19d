//! Backtest engine: aligns bars across instruments, drives the broker and
//! strategy per tick, and collects the run artifacts.

use crate::broker::{BrokerGateway, SimBroker, SimBrokerConfig};
use crate::domain::{Bar, TradeRecord};
use crate::signal::SignalProvider;
use crate::strategy::{Clock, Strategy};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no market data supplied")]
    NoData,

    #[error("bar for unknown symbol {0}")]
    UnknownSymbol(String),
}

/// One timestamp across all instruments. Instruments without a bar at this
/// timestamp are simply absent from the map.
#[derive(Debug, Clone)]
pub struct TickSlice {
    pub timestamp: NaiveDateTime,
    pub bars: BTreeMap<String, Bar>,
}

/// Bars grouped by timestamp, in time order.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub symbols: Vec<String>,
    pub ticks: Vec<TickSlice>,
}

impl MarketData {
    /// Group a flat bar list into aligned ticks. Bars may arrive in any
    /// order; output ticks are sorted by timestamp.
    pub fn from_bars(bars: Vec<Bar>) -> Self {
        let mut by_time: BTreeMap<NaiveDateTime, BTreeMap<String, Bar>> = BTreeMap::new();
        let mut symbols: Vec<String> = Vec::new();
        for bar in bars {
            if !symbols.contains(&bar.symbol) {
                symbols.push(bar.symbol.clone());
            }
            by_time
                .entry(bar.timestamp)
                .or_default()
                .insert(bar.symbol.clone(), bar);
        }
        symbols.sort();
        let ticks = by_time
            .into_iter()
            .map(|(timestamp, bars)| TickSlice { timestamp, bars })
            .collect();
        Self { symbols, ticks }
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

/// Account settings for one run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_cash: f64,
    pub commission_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let broker = SimBrokerConfig::default();
        Self {
            initial_cash: broker.initial_cash,
            commission_rate: broker.commission_rate,
        }
    }
}

/// Everything a single backtest produces.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub trades: Vec<TradeRecord>,
    /// Account equity at each tick close.
    pub equity_curve: Vec<f64>,
    pub bar_count: usize,
    pub end_value: f64,
}

/// Run one strategy over one data set.
///
/// Per tick: match working orders on every instrument's bar, deliver order
/// events, then hand the strategy the bar close with fresh signal snapshots.
/// The strategy stays quiet until the provider's warmup has elapsed.
pub fn run_backtest<P, S>(
    data: &MarketData,
    provider: &mut P,
    strategy: &mut S,
    config: &EngineConfig,
) -> Result<RunResult, EngineError>
where
    P: SignalProvider + ?Sized,
    S: Strategy + ?Sized,
{
    if data.is_empty() {
        return Err(EngineError::NoData);
    }

    let mut broker = SimBroker::new(SimBrokerConfig {
        initial_cash: config.initial_cash,
        commission_rate: config.commission_rate,
    });

    let mut histories: BTreeMap<String, Vec<Bar>> = data
        .symbols
        .iter()
        .map(|s| (s.clone(), Vec::new()))
        .collect();
    let mut equity_curve = Vec::with_capacity(data.ticks.len());
    let warmup = provider.warmup_bars();

    for (bar_index, tick) in data.ticks.iter().enumerate() {
        // Matching first: fills land before the strategy sees the bar.
        let mut events = Vec::new();
        for bar in tick.bars.values() {
            events.extend(broker.process_bar(bar_index, bar));
        }
        for order in &events {
            strategy.on_order_event(order, &mut broker);
        }

        let mut snapshots = BTreeMap::new();
        for (symbol, bar) in &tick.bars {
            let history = histories
                .get_mut(symbol)
                .ok_or_else(|| EngineError::UnknownSymbol(symbol.clone()))?;
            history.push(bar.clone());
            snapshots.insert(symbol.clone(), provider.snapshot(symbol, history));
        }

        if bar_index >= warmup {
            let clock = Clock {
                bar_index,
                timestamp: tick.timestamp,
            };
            strategy.on_bar(&clock, &tick.bars, &snapshots, &mut broker);
        }

        let mut equity = broker.cash();
        for (symbol, bar) in &tick.bars {
            equity += broker.position(symbol).market_value(bar.close);
        }
        equity_curve.push(equity);
    }

    let bar_count = data.ticks.len();
    let end_value = equity_curve.last().copied().unwrap_or(config.initial_cash);
    let trades = broker.into_trades();
    info!(bar_count, trades = trades.len(), end_value, "backtest complete");

    Ok(RunResult {
        trades,
        equity_curve,
        bar_count,
        end_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalSnapshot;
    use crate::strategy::{SqueezeConfig, SqueezeStrategy};
    use chrono::NaiveDate;

    fn bar(symbol: &str, index: usize, close: f64) -> Bar {
        let t0 = NaiveDate::from_ymd_opt(2023, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Bar {
            symbol: symbol.into(),
            timestamp: t0 + chrono::Duration::minutes(5 * index as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    /// Fires a long signal on one chosen bar, quiet otherwise.
    struct OneShotProvider {
        fire_at: usize,
    }

    impl SignalProvider for OneShotProvider {
        fn snapshot(&mut self, _symbol: &str, history: &[Bar]) -> SignalSnapshot {
            if history.len() == self.fire_at + 1 {
                SignalSnapshot {
                    squeeze_fired: true,
                    momentum: 2.0,
                    momentum_prev: 1.0,
                    trend_up: true,
                    good_momentum: true,
                    atr: 2.0,
                    ..SignalSnapshot::default()
                }
            } else {
                SignalSnapshot {
                    atr: 2.0,
                    ..SignalSnapshot::default()
                }
            }
        }
    }

    #[test]
    fn empty_data_is_an_error() {
        let data = MarketData::default();
        let mut provider = OneShotProvider { fire_at: 0 };
        let mut strategy = SqueezeStrategy::new("BTC", SqueezeConfig::default());
        let result = run_backtest(&data, &mut provider, &mut strategy, &EngineConfig::default());
        assert!(matches!(result, Err(EngineError::NoData)));
    }

    #[test]
    fn from_bars_aligns_by_timestamp() {
        let bars = vec![
            bar("ETH", 0, 50.0),
            bar("BTC", 0, 100.0),
            bar("BTC", 1, 101.0),
            bar("ETH", 1, 51.0),
        ];
        let data = MarketData::from_bars(bars);
        assert_eq!(data.symbols, vec!["BTC".to_string(), "ETH".to_string()]);
        assert_eq!(data.ticks.len(), 2);
        assert_eq!(data.ticks[0].bars.len(), 2);
        assert!(data.ticks[0].timestamp < data.ticks[1].timestamp);
    }

    #[test]
    fn full_run_produces_equity_curve_and_trades() {
        let mut bars: Vec<Bar> = Vec::new();
        // Flat, then a signal, then a rally that hits the target and rolls over.
        let closes = [
            100.0, 100.0, 100.0, 100.0, 100.5, 102.0, 105.0, 107.0, 109.0, 104.0, 103.0, 103.0,
        ];
        for (i, close) in closes.iter().enumerate() {
            bars.push(bar("BTC", i, *close));
        }
        let data = MarketData::from_bars(bars);

        let mut provider = OneShotProvider { fire_at: 3 };
        let mut strategy = SqueezeStrategy::new("BTC", SqueezeConfig::default());
        let result = run_backtest(
            &data,
            &mut provider,
            &mut strategy,
            &EngineConfig {
                initial_cash: 10_000.0,
                commission_rate: 0.0,
            },
        )
        .unwrap();

        assert_eq!(result.bar_count, 12);
        assert_eq!(result.equity_curve.len(), 12);
        assert_eq!(result.trades.len(), 1);
        assert!(result.trades[0].is_winner());
        assert!(result.end_value > 10_000.0);
    }
}
