use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::core::exits::{BarExit, LateStopPolicy};
use crate::models::{Candle, CandleSeries, Direction, ExitReason, Interval};
use crate::strategies::detector::SizeTier;
use crate::strategies::signals::Signal;
use crate::trading::position::Position;
use crate::trading::trade_record::ClosedTrade;

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// A 15m candle at slot `i` (open_time = base + i * 15m).
pub fn candle_at(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    let open_time = base_time() + Duration::minutes(15 * i);
    Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume: 100.0,
        close_time: open_time + Duration::minutes(15) - Duration::milliseconds(1),
    }
}

/// A bar with zero range, handy for aging positions without price action.
pub fn flat_bar(i: i64, price: f64) -> Candle {
    candle_at(i, price, price, price, price)
}

/// Candles from (open, high, low, close) tuples at consecutive 15m slots.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| candle_at(i as i64, o, h, l, c))
        .collect();
    CandleSeries::new(candles)
}

/// A reference K1/K2 pair qualifying as a long entry at `entry`.
pub fn long_signal(entry: f64) -> Signal {
    let k1 = candle_at(0, 100.00, 100.30, 99.90, 100.25);
    let k2 = candle_at(1, 100.25, 100.28, 99.80, 100.10);
    Signal {
        direction: Direction::Long,
        entry_price: entry,
        entry_time: k2.close_time,
        size_usdt: 1.0,
        k1_body_pct: k1.body_pct(),
        k2_body_ratio: 0.6,
        k1,
        k2,
        k3: None,
    }
}

/// An already-admitted long position at `entry`, bars_held = 0.
pub fn long_position(entry: f64) -> Position {
    Position::from_signal(1, &long_signal(entry))
}

/// A closed trade with the given reason and leveraged return.
pub fn closed_trade(reason: ExitReason, leveraged_return_pct: f64, size_usdt: f64) -> ClosedTrade {
    let mut pos = long_position(100.0);
    pos.size_usdt = size_usdt;
    pos.bars_held = 5;
    let exit = BarExit {
        price: 100.0 * (1.0 + leveraged_return_pct / 140.0 / 100.0),
        reason,
        leveraged_return_pct,
    };
    ClosedTrade::from_exit(pos, base_time() + Duration::minutes(90), &exit)
}

/// A Config with the production defaults but no env lookups.
pub fn default_test_config() -> Config {
    Config {
        symbol: "ETHUSDT".to_string(),
        coarse_interval: Interval::M15,
        fine_interval: Interval::M1,
        backtest_candles: 1000,

        min_k1_body: 0.0021,
        body_ratio_min: 0.5,
        body_ratio_max: 1.6,
        size_tiers: vec![
            SizeTier { min_body_pct: 0.0048, size_usdt: 4.0 },
            SizeTier { min_body_pct: 0.0030, size_usdt: 1.6 },
            SizeTier { min_body_pct: 0.0021, size_usdt: 1.0 },
        ],

        leverage: 140.0,
        base_tp_pct: 330.0,
        base_sl_pct: 530.0,
        weak_after_bars: 30,
        weak_floor_fraction: 0.30,
        weak_sl_tighten: 0.85,
        weak_trailing_pct: 6.0,
        trail_after_bars: 40,
        trail_floor_fraction: 0.30,
        default_trailing_pct: 8.0,
        late_after_bars: 40,
        late_tp_ratio: 0.9,
        late_sl_ratio: 0.3,
        late_stop_policy: LateStopPolicy::Override,
        max_open_positions: 4,

        check_interval_secs: 10,
        coarse_refresh_secs: 60,
        max_consecutive_failures: 5,

        serverchan_send_key: String::new(),
        data_dir: std::env::temp_dir()
            .join("reversal_bot_test_data")
            .to_string_lossy()
            .to_string(),
        log_dir: std::env::temp_dir()
            .join("reversal_bot_test_logs")
            .to_string_lossy()
            .to_string(),
        log_level: "error".to_string(),
    }
}
