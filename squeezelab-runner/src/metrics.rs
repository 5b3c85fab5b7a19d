//! Summary metrics for one run, flattened for the CSV result store.

use serde::{Deserialize, Serialize};
use squeezelab_core::engine::RunResult;

/// Aggregates over the trade list and equity curve of one backtest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub end_value: f64,

    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_pct: f64,
    pub loss_pct: f64,

    pub pnl_net: f64,
    pub pnl_gross: f64,
    pub pnl_avg: f64,
    pub largest_win: f64,
    pub largest_loss: f64,

    pub long_trades: usize,
    pub long_won: usize,
    pub short_trades: usize,
    pub short_won: usize,

    /// Bar counts across all closed trades.
    pub duration_total: usize,
    pub duration_avg: f64,
    pub duration_max: usize,
    pub duration_min: usize,

    pub win_streak_max: usize,
    pub loss_streak_max: usize,

    /// Drawdown state at the final bar.
    pub drawdown_pct: f64,
    pub drawdown_money: f64,
    pub drawdown_len: usize,
    /// Worst drawdown seen anywhere in the run.
    pub max_drawdown_pct: f64,
    pub max_drawdown_money: f64,
    pub max_drawdown_len: usize,
}

impl SummaryMetrics {
    pub fn from_run(result: &RunResult) -> Self {
        let mut m = SummaryMetrics {
            end_value: result.end_value,
            total_trades: result.trades.len(),
            ..SummaryMetrics::default()
        };

        let mut win_streak = 0usize;
        let mut loss_streak = 0usize;
        for trade in &result.trades {
            m.pnl_net += trade.pnl;
            m.pnl_gross += trade.pnl + trade.commission;

            if trade.is_winner() {
                m.trades_won += 1;
                m.largest_win = m.largest_win.max(trade.pnl);
                win_streak += 1;
                loss_streak = 0;
            } else {
                m.trades_lost += 1;
                m.largest_loss = m.largest_loss.min(trade.pnl);
                loss_streak += 1;
                win_streak = 0;
            }
            m.win_streak_max = m.win_streak_max.max(win_streak);
            m.loss_streak_max = m.loss_streak_max.max(loss_streak);

            if trade.is_long() {
                m.long_trades += 1;
                if trade.is_winner() {
                    m.long_won += 1;
                }
            } else {
                m.short_trades += 1;
                if trade.is_winner() {
                    m.short_won += 1;
                }
            }

            m.duration_total += trade.bar_duration;
            m.duration_max = m.duration_max.max(trade.bar_duration);
        }

        if m.total_trades > 0 {
            m.win_pct = 100.0 * m.trades_won as f64 / m.total_trades as f64;
            m.loss_pct = 100.0 * m.trades_lost as f64 / m.total_trades as f64;
            m.pnl_avg = m.pnl_net / m.total_trades as f64;
            m.duration_avg = m.duration_total as f64 / m.total_trades as f64;
            m.duration_min = result
                .trades
                .iter()
                .map(|t| t.bar_duration)
                .min()
                .unwrap_or(0);
        }

        m.apply_drawdown(&result.equity_curve);
        m
    }

    fn apply_drawdown(&mut self, equity: &[f64]) {
        let mut peak = f64::MIN;
        let mut len = 0usize;
        for value in equity {
            if *value >= peak {
                peak = *value;
                len = 0;
                self.drawdown_pct = 0.0;
                self.drawdown_money = 0.0;
            } else {
                len += 1;
                self.drawdown_money = peak - value;
                self.drawdown_pct = if peak != 0.0 {
                    100.0 * self.drawdown_money / peak
                } else {
                    0.0
                };
            }
            self.drawdown_len = len;
            if self.drawdown_pct > self.max_drawdown_pct {
                self.max_drawdown_pct = self.drawdown_pct;
            }
            if self.drawdown_money > self.max_drawdown_money {
                self.max_drawdown_money = self.drawdown_money;
            }
            if len > self.max_drawdown_len {
                self.max_drawdown_len = len;
            }
        }
    }

    /// Column names, in the order `values` emits them.
    pub fn columns() -> Vec<&'static str> {
        vec![
            "end_value",
            "total_trades",
            "trades_won",
            "trades_lost",
            "win_pct",
            "loss_pct",
            "pnl_net",
            "pnl_gross",
            "pnl_avg",
            "largest_win",
            "largest_loss",
            "long_trades",
            "long_won",
            "short_trades",
            "short_won",
            "duration_total",
            "duration_avg",
            "duration_max",
            "duration_min",
            "win_streak_max",
            "loss_streak_max",
            "drawdown_pct",
            "drawdown_money",
            "drawdown_len",
            "max_drawdown_pct",
            "max_drawdown_money",
            "max_drawdown_len",
        ]
    }

    pub fn values(&self) -> Vec<String> {
        vec![
            self.end_value.to_string(),
            self.total_trades.to_string(),
            self.trades_won.to_string(),
            self.trades_lost.to_string(),
            self.win_pct.to_string(),
            self.loss_pct.to_string(),
            self.pnl_net.to_string(),
            self.pnl_gross.to_string(),
            self.pnl_avg.to_string(),
            self.largest_win.to_string(),
            self.largest_loss.to_string(),
            self.long_trades.to_string(),
            self.long_won.to_string(),
            self.short_trades.to_string(),
            self.short_won.to_string(),
            self.duration_total.to_string(),
            self.duration_avg.to_string(),
            self.duration_max.to_string(),
            self.duration_min.to_string(),
            self.win_streak_max.to_string(),
            self.loss_streak_max.to_string(),
            self.drawdown_pct.to_string(),
            self.drawdown_money.to_string(),
            self.drawdown_len.to_string(),
            self.max_drawdown_pct.to_string(),
            self.max_drawdown_money.to_string(),
            self.max_drawdown_len.to_string(),
        ]
    }
}
