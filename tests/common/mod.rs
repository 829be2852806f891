use chrono::{DateTime, Duration, Utc};

use reversal_bot::config::Config;
use reversal_bot::core::exits::LateStopPolicy;
use reversal_bot::models::{Candle, Interval};
use reversal_bot::strategies::detector::SizeTier;

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// A 15m candle at slot `i`.
pub fn coarse_candle(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
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

/// A 1m candle `minutes` after the base time.
pub fn fine_candle(minutes: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    let open_time = base_time() + Duration::minutes(minutes);
    Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume: 10.0,
        close_time: open_time + Duration::minutes(1) - Duration::milliseconds(1),
    }
}

pub fn flat_coarse(i: i64, price: f64) -> Candle {
    coarse_candle(i, price, price, price, price)
}

/// Production defaults, temp dirs, no env lookups.
pub fn test_config() -> Config {
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
            .join(format!("reversal_bot_integ_{}", std::process::id()))
            .to_string_lossy()
            .to_string(),
        log_dir: std::env::temp_dir()
            .join(format!("reversal_bot_integ_logs_{}", std::process::id()))
            .to_string_lossy()
            .to_string(),
        log_level: "error".to_string(),
    }
}
