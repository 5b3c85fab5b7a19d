//! Strategy parameters and sweep expansion.

use serde::{Deserialize, Serialize};
use squeezelab_core::signals::SqueezeProProvider;
use squeezelab_core::strategy::SqueezeConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("failed to parse sweep spec: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One complete parameter set for a squeeze run. Every field participates in
/// the result fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqueezeParams {
    #[serde(default = "default_squeeze_len")]
    pub squeeze_len: usize,
    #[serde(default = "default_atr_len")]
    pub atr_len: usize,
    #[serde(default = "default_trend_len")]
    pub trend_len: usize,

    #[serde(default = "default_tp_trail_percent")]
    pub tp_trail_percent: f64,
    #[serde(default = "default_sl_trail_percent")]
    pub sl_trail_percent: f64,
    #[serde(default = "default_percent_is_atr")]
    pub percent_is_atr: bool,
    #[serde(default = "default_tp_atr_multiplier")]
    pub tp_atr_multiplier: f64,
    #[serde(default = "default_max_trade_duration")]
    pub max_trade_duration: usize,
    #[serde(default = "default_use_good_momentum")]
    pub use_good_momentum: bool,

    /// Bar frequency of the input data, in minutes.
    #[serde(default = "default_frequency_minutes")]
    pub frequency_minutes: u32,
}

fn default_squeeze_len() -> usize {
    20
}
fn default_atr_len() -> usize {
    10
}
fn default_trend_len() -> usize {
    14
}
fn default_tp_trail_percent() -> f64 {
    0.4
}
fn default_sl_trail_percent() -> f64 {
    0.7
}
fn default_percent_is_atr() -> bool {
    true
}
fn default_tp_atr_multiplier() -> f64 {
    2.3
}
fn default_max_trade_duration() -> usize {
    9
}
fn default_use_good_momentum() -> bool {
    true
}
fn default_frequency_minutes() -> u32 {
    5
}

impl Default for SqueezeParams {
    fn default() -> Self {
        Self {
            squeeze_len: default_squeeze_len(),
            atr_len: default_atr_len(),
            trend_len: default_trend_len(),
            tp_trail_percent: default_tp_trail_percent(),
            sl_trail_percent: default_sl_trail_percent(),
            percent_is_atr: default_percent_is_atr(),
            tp_atr_multiplier: default_tp_atr_multiplier(),
            max_trade_duration: default_max_trade_duration(),
            use_good_momentum: default_use_good_momentum(),
            frequency_minutes: default_frequency_minutes(),
        }
    }
}

impl SqueezeParams {
    pub fn strategy_config(&self) -> SqueezeConfig {
        SqueezeConfig {
            tp_trail_percent: self.tp_trail_percent,
            sl_trail_percent: self.sl_trail_percent,
            percent_is_atr: self.percent_is_atr,
            tp_atr_multiplier: self.tp_atr_multiplier,
            max_trade_duration: self.max_trade_duration,
            use_good_momentum: self.use_good_momentum,
            quantity: 1.0,
        }
    }

    pub fn provider(&self) -> SqueezeProProvider {
        SqueezeProProvider {
            squeeze_len: self.squeeze_len,
            atr_len: self.atr_len,
            trend_len: self.trend_len,
        }
    }
}

/// Either one value or an explicit list to sweep over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamRange<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> ParamRange<T> {
    pub fn values(&self) -> Vec<T> {
        match self {
            ParamRange::One(v) => vec![v.clone()],
            ParamRange::Many(vs) => vs.clone(),
        }
    }
}

impl<T> Default for ParamRange<T>
where
    T: Default,
{
    fn default() -> Self {
        ParamRange::One(T::default())
    }
}

/// Declarative sweep: each numeric knob takes one value or a list, and the
/// expansion is the cartesian product.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SweepSpec {
    pub squeeze_len: ParamRange<usize>,
    pub atr_len: ParamRange<usize>,
    pub trend_len: ParamRange<usize>,
    pub tp_trail_percent: ParamRange<f64>,
    pub sl_trail_percent: ParamRange<f64>,
    pub tp_atr_multiplier: ParamRange<f64>,
    pub max_trade_duration: ParamRange<usize>,

    pub percent_is_atr: bool,
    pub use_good_momentum: bool,
    pub frequency_minutes: u32,
}

impl Default for SweepSpec {
    fn default() -> Self {
        let d = SqueezeParams::default();
        Self {
            squeeze_len: ParamRange::One(d.squeeze_len),
            atr_len: ParamRange::One(d.atr_len),
            trend_len: ParamRange::One(d.trend_len),
            tp_trail_percent: ParamRange::One(d.tp_trail_percent),
            sl_trail_percent: ParamRange::One(d.sl_trail_percent),
            tp_atr_multiplier: ParamRange::One(d.tp_atr_multiplier),
            max_trade_duration: ParamRange::One(d.max_trade_duration),
            percent_is_atr: d.percent_is_atr,
            use_good_momentum: d.use_good_momentum,
            frequency_minutes: d.frequency_minutes,
        }
    }
}

impl SweepSpec {
    pub fn from_toml_str(text: &str) -> Result<Self, ParamsError> {
        Ok(toml::from_str(text)?)
    }

    /// Cartesian product of all ranges, in deterministic order.
    pub fn expand(&self) -> Vec<SqueezeParams> {
        let mut out = Vec::new();
        for squeeze_len in self.squeeze_len.values() {
            for atr_len in self.atr_len.values() {
                for trend_len in self.trend_len.values() {
                    for tp_trail_percent in self.tp_trail_percent.values() {
                        for sl_trail_percent in self.sl_trail_percent.values() {
                            for tp_atr_multiplier in self.tp_atr_multiplier.values() {
                                for max_trade_duration in self.max_trade_duration.values() {
                                    out.push(SqueezeParams {
                                        squeeze_len,
                                        atr_len,
                                        trend_len,
                                        tp_trail_percent,
                                        sl_trail_percent,
                                        percent_is_atr: self.percent_is_atr,
                                        tp_atr_multiplier,
                                        max_trade_duration,
                                        use_good_momentum: self.use_good_momentum,
                                        frequency_minutes: self.frequency_minutes,
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// Knobs that change how a sweep runs without changing what it computes.
/// None of these participate in the fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Write results through the store.
    pub save_results: bool,
    /// Consult the store before computing.
    pub use_cache: bool,
    /// Worker threads; defaults to all available execution units, 1 forces
    /// the fully sequential path.
    pub threads: usize,
}

/// All execution units the machine reports, falling back to one.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            save_results: true,
            use_cache: true,
            threads: default_threads(),
        }
    }
}
