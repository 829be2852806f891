use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::core::exits::BarExit;
use crate::models::{Candle, Direction, ExitReason};
use crate::trading::position::Position;

/// Immutable record of one finished trade, carrying enough context (the
/// qualifying candles included) to audit the entry decision without
/// re-fetching market data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: u64,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub size_usdt: f64,
    pub holding_bars: u32,
    pub exit_reason: ExitReason,
    pub leveraged_return_pct: f64,
    pub pnl_usdt: f64,
    pub was_weak: bool,
    pub trailing_activated: bool,
    pub k1: Candle,
    pub k2: Candle,
    pub k3: Option<Candle>,
}

impl ClosedTrade {
    pub fn from_exit(pos: Position, exit_time: DateTime<Utc>, exit: &BarExit) -> Self {
        Self {
            id: pos.id,
            direction: pos.direction,
            entry_time: pos.entry_time,
            entry_price: pos.entry_price,
            exit_time,
            exit_price: exit.price,
            size_usdt: pos.size_usdt,
            holding_bars: pos.bars_held,
            exit_reason: exit.reason,
            leveraged_return_pct: exit.leveraged_return_pct,
            pnl_usdt: pos.size_usdt * exit.leveraged_return_pct / 100.0,
            was_weak: pos.is_weak,
            trailing_activated: pos.trailing_active,
            k1: pos.k1,
            k2: pos.k2,
            k3: pos.k3,
        }
    }
}

const CSV_HEADER: &str = "id,direction,entry_time,entry_price,exit_time,exit_price,size_usdt,\
holding_bars,exit_reason,leveraged_return_pct,pnl_usdt,weak,trailing,\
k1_open,k1_high,k1_low,k1_close,k2_open,k2_high,k2_low,k2_close,\
k3_open,k3_high,k3_low,k3_close";

fn fmt_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

/// Write one CSV row per closed trade.
pub fn write_csv(path: &Path, trades: &[ClosedTrade]) -> Result<()> {
    let mut f = std::fs::File::create(path)?;
    writeln!(f, "{}", CSV_HEADER)?;

    for t in trades {
        let k3 = match &t.k3 {
            Some(k) => format!("{:.4},{:.4},{:.4},{:.4}", k.open, k.high, k.low, k.close),
            None => ",,,".to_string(),
        };
        writeln!(
            f,
            "{},{},{},{:.4},{},{:.4},{:.2},{},{},{:.2},{:.4},{},{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{}",
            t.id,
            t.direction,
            fmt_time(t.entry_time),
            t.entry_price,
            fmt_time(t.exit_time),
            t.exit_price,
            t.size_usdt,
            t.holding_bars,
            t.exit_reason,
            t.leveraged_return_pct,
            t.pnl_usdt,
            t.was_weak as u8,
            t.trailing_activated as u8,
            t.k1.open,
            t.k1.high,
            t.k1.low,
            t.k1.close,
            t.k2.open,
            t.k2.high,
            t.k2.low,
            t.k2.close,
            k3,
        )?;
    }

    Ok(())
}

/// Human-readable log: aggregate header then one block per trade.
pub fn write_txt(
    path: &Path,
    trades: &[ClosedTrade],
    report: &crate::backtesting::report::BacktestReport,
) -> Result<()> {
    let mut f = std::fs::File::create(path)?;

    writeln!(f, "{}", "=".repeat(80))?;
    writeln!(f, "Breakout-reversal strategy trade log")?;
    writeln!(f, "{}", "=".repeat(80))?;
    writeln!(f, "Total trades:   {}", report.total_trades)?;
    writeln!(
        f,
        "Win/Loss:       {} / {}  ({:.2}%)",
        report.winning_trades, report.losing_trades, report.win_rate
    )?;
    writeln!(f, "Profit factor:  {:.2}", report.profit_factor)?;
    writeln!(f, "Avg holding:    {:.2} bars", report.avg_holding_bars)?;
    writeln!(f, "Total PnL:      {:+.4} USDT", report.total_pnl)?;
    writeln!(f, "{}", "=".repeat(80))?;
    writeln!(f)?;

    for t in trades {
        writeln!(
            f,
            "#{} {} [{}]",
            t.id,
            t.direction.as_str().to_uppercase(),
            t.exit_reason
        )?;
        writeln!(
            f,
            "  in:  {} @ {:.4}   out: {} @ {:.4}",
            fmt_time(t.entry_time),
            t.entry_price,
            fmt_time(t.exit_time),
            t.exit_price
        )?;
        writeln!(
            f,
            "  held {} bars | size {:.2} USDT | return {:+.2}% | pnl {:+.4} USDT",
            t.holding_bars, t.size_usdt, t.leveraged_return_pct, t.pnl_usdt
        )?;
        writeln!(
            f,
            "  weak: {} | trailing: {}",
            if t.was_weak { "yes" } else { "no" },
            if t.trailing_activated { "yes" } else { "no" }
        )?;
        writeln!(
            f,
            "  K1 O:{:.4} H:{:.4} L:{:.4} C:{:.4}",
            t.k1.open, t.k1.high, t.k1.low, t.k1.close
        )?;
        writeln!(
            f,
            "  K2 O:{:.4} H:{:.4} L:{:.4} C:{:.4}",
            t.k2.open, t.k2.high, t.k2.low, t.k2.close
        )?;
        if let Some(k3) = &t.k3 {
            writeln!(
                f,
                "  K3 O:{:.4} H:{:.4} L:{:.4} C:{:.4}",
                k3.open, k3.high, k3.low, k3.close
            )?;
        }
        writeln!(f, "{}", "-".repeat(80))?;
    }

    Ok(())
}
