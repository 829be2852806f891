use std::collections::HashMap;

use crate::models::ExitReason;
use crate::trading::trade_record::ClosedTrade;

/// Aggregate statistics reduced from the closed trades of one run.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent.
    pub win_rate: f64,
    /// Sum of positive PnL over |sum of negative PnL|; +inf with winners
    /// and no losers, 0 with losers and no winners.
    pub profit_factor: f64,
    pub avg_holding_bars: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub weak_count: usize,
    pub trailing_activated_count: usize,
    pub by_reason: HashMap<ExitReason, ReasonStats>,

    // Run counters filled in by the runner.
    pub signals_detected: usize,
    pub signals_admitted: usize,
    pub signals_dropped_capacity: usize,
    pub bars_rejected: usize,
    pub unresolved_positions: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReasonStats {
    pub trades: usize,
    pub wins: usize,
    pub total_pnl: f64,
}

impl BacktestReport {
    /// Pure reduction over closed trades. Counters start at zero.
    pub fn from_trades(trades: &[ClosedTrade]) -> Self {
        let total = trades.len();
        let wins: Vec<f64> = trades.iter().filter(|t| t.pnl_usdt > 0.0).map(|t| t.pnl_usdt).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| t.pnl_usdt <= 0.0).map(|t| t.pnl_usdt).collect();

        let win_sum: f64 = wins.iter().sum();
        let loss_sum: f64 = losses.iter().sum();

        let profit_factor = if loss_sum.abs() > 0.0 {
            win_sum / loss_sum.abs()
        } else if !wins.is_empty() {
            f64::INFINITY
        } else {
            0.0
        };

        let mut by_reason: HashMap<ExitReason, ReasonStats> = HashMap::new();
        for t in trades {
            let entry = by_reason.entry(t.exit_reason).or_default();
            entry.trades += 1;
            entry.total_pnl += t.pnl_usdt;
            if t.pnl_usdt > 0.0 {
                entry.wins += 1;
            }
        }

        Self {
            total_trades: total,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: if total > 0 {
                wins.len() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            profit_factor,
            avg_holding_bars: if total > 0 {
                trades.iter().map(|t| t.holding_bars as f64).sum::<f64>() / total as f64
            } else {
                0.0
            },
            total_pnl: win_sum + loss_sum,
            avg_win: if wins.is_empty() {
                0.0
            } else {
                win_sum / wins.len() as f64
            },
            avg_loss: if losses.is_empty() {
                0.0
            } else {
                loss_sum / losses.len() as f64
            },
            weak_count: trades.iter().filter(|t| t.was_weak).count(),
            trailing_activated_count: trades.iter().filter(|t| t.trailing_activated).count(),
            by_reason,
            signals_detected: 0,
            signals_admitted: 0,
            signals_dropped_capacity: 0,
            bars_rejected: 0,
            unresolved_positions: 0,
        }
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("  BACKTEST REPORT");
        println!("{}", "=".repeat(70));
        println!("  TRADES");
        println!("  ───────────────────────────────────");
        println!("  Total:       {}", self.total_trades);
        println!(
            "  Win/Loss:    {} / {}",
            self.winning_trades, self.losing_trades
        );
        println!("  Win Rate:    {:.1}%", self.win_rate);
        println!("  Avg Win:     {:+.4} USDT", self.avg_win);
        println!("  Avg Loss:    {:+.4} USDT", self.avg_loss);
        println!("  Profit Factor: {:.2}", self.profit_factor);
        println!("  Avg Holding: {:.1} bars", self.avg_holding_bars);
        println!("  Total PnL:   {:+.4} USDT", self.total_pnl);
        println!();
        println!("  REGIMES");
        println!("  ───────────────────────────────────");
        println!("  Weak:        {}", self.weak_count);
        println!("  Trailing:    {}", self.trailing_activated_count);
        println!();
        println!("  BY EXIT REASON");
        println!("  ───────────────────────────────────");
        for reason in ExitReason::ALL {
            if let Some(stats) = self.by_reason.get(&reason) {
                println!(
                    "  {:>13}: {} trades | {} wins | PnL {:+.4} USDT",
                    reason.as_str(),
                    stats.trades,
                    stats.wins,
                    stats.total_pnl
                );
            }
        }
        println!();
        println!("  SIGNALS");
        println!("  ───────────────────────────────────");
        println!("  Detected:    {}", self.signals_detected);
        println!("  Admitted:    {}", self.signals_admitted);
        println!("  Dropped:     {} (book full)", self.signals_dropped_capacity);
        println!("  Bad bars:    {}", self.bars_rejected);
        println!("  Unresolved:  {} (excluded)", self.unresolved_positions);
        println!("{}", "=".repeat(70));
    }
}
