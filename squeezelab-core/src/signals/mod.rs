//! Shipped signal providers.

pub mod squeeze_pro;

pub use squeeze_pro::SqueezeProProvider;
