//! Shared domain types: bars, orders, positions, trades.

pub mod bar;
pub mod ids;
pub mod order;
pub mod position;
pub mod trade;

pub use bar::Bar;
pub use ids::OrderId;
pub use order::{Fill, Order, OrderKind, OrderRole, OrderSide, OrderStatus};
pub use position::Position;
pub use trade::{TradeDirection, TradeRecord};
