//! Core backtesting engine: domain types, the simulated broker, the shipped
//! strategies and signal providers, and the bar-driven run loop.

pub mod broker;
pub mod domain;
pub mod engine;
pub mod signal;
pub mod signals;
pub mod strategy;

pub use broker::{BrokerGateway, LedgerError, OrderSpec, SimBroker, SimBrokerConfig};
pub use domain::{Bar, Order, OrderId, OrderKind, OrderRole, OrderSide, OrderStatus, Position, TradeRecord};
pub use engine::{run_backtest, EngineConfig, EngineError, MarketData, RunResult, TickSlice};
pub use signal::{SignalProvider, SignalSnapshot};
pub use signals::SqueezeProProvider;
pub use strategy::{
    ChannelBuildConfig, ChannelBuildStrategy, Clock, SqueezeConfig, SqueezeStrategy, Strategy,
    TickerState,
};
