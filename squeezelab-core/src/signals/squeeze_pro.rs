//! Squeeze/momentum/trend snapshot provider.
//!
//! Bollinger bands inside Keltner bands marks the squeeze; the release bar
//! sets `squeeze_fired`. Momentum is the regression endpoint of the
//! midline-detrended close, trend comes from directional movement, and the
//! Keltner bounds double as the channel levels for the build strategy.

use crate::domain::Bar;
use crate::signal::{SignalProvider, SignalSnapshot};

const BOLLINGER_MULT: f64 = 2.0;
const KELTNER_MULT: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct SqueezeProProvider {
    pub squeeze_len: usize,
    pub atr_len: usize,
    pub trend_len: usize,
}

impl Default for SqueezeProProvider {
    fn default() -> Self {
        Self {
            squeeze_len: 20,
            atr_len: 10,
            trend_len: 14,
        }
    }
}

impl SqueezeProProvider {
    fn min_history(&self) -> usize {
        self.squeeze_len.max(self.trend_len).max(self.atr_len) + 1
    }

    /// Squeeze state at the last bar of `bars`: Bollinger fully inside Keltner.
    fn squeeze_on(&self, bars: &[Bar]) -> bool {
        let n = bars.len();
        if n < self.min_history() {
            return false;
        }
        let closes: Vec<f64> = bars[n - self.squeeze_len..].iter().map(|b| b.close).collect();
        let mid = mean(&closes);
        let dev = stddev(&closes, mid);
        let bb_upper = mid + BOLLINGER_MULT * dev;
        let bb_lower = mid - BOLLINGER_MULT * dev;

        let atr = self.atr(bars, self.squeeze_len);
        let kc_upper = mid + KELTNER_MULT * atr;
        let kc_lower = mid - KELTNER_MULT * atr;

        bb_upper < kc_upper && bb_lower > kc_lower
    }

    fn atr(&self, bars: &[Bar], len: usize) -> f64 {
        let n = bars.len();
        if n < len + 1 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in n - len..n {
            sum += true_range(&bars[i], &bars[i - 1]);
        }
        sum / len as f64
    }

    /// Regression endpoint of the close detrended by the squeeze midline.
    fn momentum(&self, bars: &[Bar]) -> f64 {
        let n = bars.len();
        if n < self.min_history() {
            return 0.0;
        }
        let deltas = self.detrended(bars);
        linreg_endpoint(&deltas)
    }

    fn detrended(&self, bars: &[Bar]) -> Vec<f64> {
        let n = bars.len();
        let window = &bars[n - self.squeeze_len..];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let sma = mean(&closes);
        let midline = ((highest + lowest) / 2.0 + sma) / 2.0;
        window.iter().map(|b| b.close - midline).collect()
    }

    /// Directional movement over `trend_len`: (plus_di, minus_di).
    fn directional(&self, bars: &[Bar]) -> (f64, f64) {
        let n = bars.len();
        if n < self.trend_len + 1 {
            return (0.0, 0.0);
        }
        let mut plus_dm = 0.0;
        let mut minus_dm = 0.0;
        let mut tr_sum = 0.0;
        for i in n - self.trend_len..n {
            let up = bars[i].high - bars[i - 1].high;
            let down = bars[i - 1].low - bars[i].low;
            if up > down && up > 0.0 {
                plus_dm += up;
            }
            if down > up && down > 0.0 {
                minus_dm += down;
            }
            tr_sum += true_range(&bars[i], &bars[i - 1]);
        }
        if tr_sum == 0.0 {
            return (0.0, 0.0);
        }
        (100.0 * plus_dm / tr_sum, 100.0 * minus_dm / tr_sum)
    }
}

impl SignalProvider for SqueezeProProvider {
    fn warmup_bars(&self) -> usize {
        self.min_history()
    }

    fn snapshot(&mut self, _symbol: &str, history: &[Bar]) -> SignalSnapshot {
        let n = history.len();
        if n < self.min_history() + 1 {
            return SignalSnapshot::default();
        }

        let atr = self.atr(history, self.atr_len);
        let momentum = self.momentum(history);
        let momentum_prev = self.momentum(&history[..n - 1]);

        let squeeze_now = self.squeeze_on(history);
        let squeeze_before = self.squeeze_on(&history[..n - 1]);
        let squeeze_fired = squeeze_before && !squeeze_now;

        let (plus_di, minus_di) = self.directional(history);
        let trend_up = plus_di > minus_di;
        let trend_down = minus_di > plus_di;

        // Momentum counts as fresh while the detrended series crossed zero
        // inside the lookback.
        let deltas = self.detrended(history);
        let good_momentum = deltas.windows(2).any(|w| w[0].signum() != w[1].signum());

        let closes: Vec<f64> = history[n - self.squeeze_len..]
            .iter()
            .map(|b| b.close)
            .collect();
        let mid = mean(&closes);
        let channel_atr = self.atr(history, self.squeeze_len);
        let upper = mid + KELTNER_MULT * channel_atr;
        let lower = mid - KELTNER_MULT * channel_atr;
        let close = history[n - 1].close;
        let in_channel = close >= lower && close <= upper;

        let bias = if trend_up && momentum > 0.0 {
            1.0
        } else if trend_down && momentum < 0.0 {
            -1.0
        } else {
            0.0
        };

        SignalSnapshot {
            squeeze_fired,
            momentum,
            momentum_prev,
            trend_up,
            trend_down,
            good_momentum,
            atr,
            in_channel,
            channel_stop_long: lower,
            channel_stop_short: upper,
            channel_target_long: upper,
            channel_target_short: lower,
            bias,
        }
    }
}

fn true_range(bar: &Bar, prev: &Bar) -> f64 {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev.close).abs();
    let lc = (bar.low - prev.close).abs();
    hl.max(hc).max(lc)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Least-squares fit over the series, evaluated at the last index.
fn linreg_endpoint(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return values.first().copied().unwrap_or(0.0);
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = mean(values);
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        return y_mean;
    }
    let slope = num / den;
    y_mean + slope * (nf - 1.0 - x_mean)
}
