use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::exits::{LateStopPolicy, RiskParams};
use crate::models::Interval;
use crate::strategies::detector::{DetectorParams, SizeTier};

pub type SharedConfig = Arc<RwLock<Config>>;

/// Everything the engine can be tuned with. Each threshold is external so
/// sweep drivers can re-parameterize the exit machine without code
/// changes. Body percentages and tier thresholds are fractions
/// (0.0021 = 0.21%); TP/SL/trailing values are leveraged percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Instrument
    pub symbol: String,
    pub coarse_interval: Interval,
    pub fine_interval: Interval,
    /// How many coarse candles a backtest pulls.
    pub backtest_candles: usize,

    // Entry rules
    pub min_k1_body: f64,
    pub body_ratio_min: f64,
    pub body_ratio_max: f64,
    pub size_tiers: Vec<SizeTier>,

    // Risk / exits
    pub leverage: f64,
    pub base_tp_pct: f64,
    pub base_sl_pct: f64,
    pub weak_after_bars: u32,
    pub weak_floor_fraction: f64,
    pub weak_sl_tighten: f64,
    pub weak_trailing_pct: f64,
    pub trail_after_bars: u32,
    pub trail_floor_fraction: f64,
    pub default_trailing_pct: f64,
    pub late_after_bars: u32,
    pub late_tp_ratio: f64,
    pub late_sl_ratio: f64,
    pub late_stop_policy: LateStopPolicy,
    pub max_open_positions: usize,

    // Live loop cadence
    pub check_interval_secs: u64,
    pub coarse_refresh_secs: u64,
    pub max_consecutive_failures: u32,

    // Sinks
    pub serverchan_send_key: String,
    pub data_dir: String,
    pub log_dir: String,
    pub log_level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be positive (got {value})")]
    NonPositive { name: &'static str, value: f64 },
    #[error("body ratio window is inverted: [{min}, {max}]")]
    InvertedRatioWindow { min: f64, max: f64 },
    #[error("size tiers must not be empty")]
    EmptySizeTiers,
    #[error("size tiers must be sorted descending by threshold")]
    UnorderedSizeTiers,
    #[error("lowest size tier ({tier}) is below the K1 body minimum ({min})")]
    TierBelowMinimum { tier: f64, min: f64 },
    #[error("max_open_positions must be at least 1")]
    ZeroPositionCap,
    #[error("backtest_candles must be at least 3")]
    TooFewCandles,
    #[error("fine interval {fine} must be shorter than coarse interval {coarse}")]
    IntervalOrder { fine: Interval, coarse: Interval },
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let env_f64 = |key: &str, default: f64| -> f64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };
        let env_u32 = |key: &str, default: u32| -> u32 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        // Percent-valued env vars follow the exchange UI convention
        // (0.21 means 0.21%); fractions internally.
        let min_k1_body = env_f64("MIN_K1_BODY_PERCENT", 0.21) / 100.0;

        let late_stop_policy = match env("LATE_STOP_POLICY", "override").to_lowercase().as_str() {
            "compound" => LateStopPolicy::Compound,
            _ => LateStopPolicy::Override,
        };

        Config {
            symbol: env("SYMBOL", "ETHUSDT"),
            coarse_interval: Interval::from_str_loose(&env("COARSE_INTERVAL", "15m"))
                .unwrap_or(Interval::M15),
            fine_interval: Interval::from_str_loose(&env("FINE_INTERVAL", "1m"))
                .unwrap_or(Interval::M1),
            backtest_candles: env_u32("BACKTEST_CANDLES", 30_000) as usize,

            min_k1_body,
            body_ratio_min: env_f64("BODY_RATIO_MIN", 0.5),
            body_ratio_max: env_f64("BODY_RATIO_MAX", 1.6),
            size_tiers: vec![
                SizeTier { min_body_pct: 0.0048, size_usdt: 4.0 },
                SizeTier { min_body_pct: 0.0030, size_usdt: 1.6 },
                SizeTier { min_body_pct: 0.0021, size_usdt: 1.0 },
            ],

            leverage: env_f64("LEVERAGE", 140.0),
            base_tp_pct: env_f64("TAKE_PROFIT_PERCENT", 330.0),
            base_sl_pct: env_f64("STOP_LOSS_PERCENT", 530.0),
            weak_after_bars: env_u32("WEAK_AFTER_BARS", 30),
            weak_floor_fraction: env_f64("WEAK_FLOOR_FRACTION", 0.30),
            weak_sl_tighten: env_f64("WEAK_SL_TIGHTEN", 0.85),
            weak_trailing_pct: env_f64("WEAK_TRAILING_PERCENT", 6.0),
            trail_after_bars: env_u32("TRAIL_AFTER_BARS", 40),
            trail_floor_fraction: env_f64("TRAIL_FLOOR_FRACTION", 0.30),
            default_trailing_pct: env_f64("TRAILING_PERCENT", 8.0),
            late_after_bars: env_u32("LATE_AFTER_BARS", 40),
            late_tp_ratio: env_f64("LATE_TP_RATIO", 0.9),
            late_sl_ratio: env_f64("LATE_SL_RATIO", 0.3),
            late_stop_policy,
            max_open_positions: env_u32("MAX_OPEN_POSITIONS", 4) as usize,

            check_interval_secs: env_u32("CHECK_INTERVAL_SECS", 10) as u64,
            coarse_refresh_secs: env_u32("COARSE_REFRESH_SECS", 60) as u64,
            max_consecutive_failures: env_u32("MAX_CONSECUTIVE_FAILURES", 5),

            serverchan_send_key: env("SERVERCHAN_SEND_KEY", ""),
            data_dir: env("DATA_DIR", "data"),
            log_dir: env("LOG_DIR", "logs"),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    /// Batch runs fail fast on contradictory parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("leverage", self.leverage),
            ("base_tp_pct", self.base_tp_pct),
            ("base_sl_pct", self.base_sl_pct),
            ("min_k1_body", self.min_k1_body),
            ("weak_sl_tighten", self.weak_sl_tighten),
            ("weak_trailing_pct", self.weak_trailing_pct),
            ("default_trailing_pct", self.default_trailing_pct),
            ("late_tp_ratio", self.late_tp_ratio),
            ("late_sl_ratio", self.late_sl_ratio),
            ("body_ratio_min", self.body_ratio_min),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if self.body_ratio_min > self.body_ratio_max {
            return Err(ConfigError::InvertedRatioWindow {
                min: self.body_ratio_min,
                max: self.body_ratio_max,
            });
        }

        if self.size_tiers.is_empty() {
            return Err(ConfigError::EmptySizeTiers);
        }
        if self
            .size_tiers
            .windows(2)
            .any(|w| w[0].min_body_pct <= w[1].min_body_pct)
        {
            return Err(ConfigError::UnorderedSizeTiers);
        }
        let lowest = self.size_tiers.last().map(|t| t.min_body_pct).unwrap_or(0.0);
        if lowest < self.min_k1_body {
            return Err(ConfigError::TierBelowMinimum {
                tier: lowest,
                min: self.min_k1_body,
            });
        }

        if self.max_open_positions == 0 {
            return Err(ConfigError::ZeroPositionCap);
        }
        if self.backtest_candles < 3 {
            return Err(ConfigError::TooFewCandles);
        }
        if self.fine_interval.as_seconds() >= self.coarse_interval.as_seconds() {
            return Err(ConfigError::IntervalOrder {
                fine: self.fine_interval,
                coarse: self.coarse_interval,
            });
        }

        Ok(())
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            min_k1_body: self.min_k1_body,
            body_ratio_min: self.body_ratio_min,
            body_ratio_max: self.body_ratio_max,
            size_tiers: self.size_tiers.clone(),
        }
    }

    pub fn risk_params(&self) -> RiskParams {
        RiskParams {
            leverage: self.leverage,
            base_tp_pct: self.base_tp_pct,
            base_sl_pct: self.base_sl_pct,
            weak_after_bars: self.weak_after_bars,
            weak_floor_fraction: self.weak_floor_fraction,
            weak_sl_tighten: self.weak_sl_tighten,
            weak_trailing_pct: self.weak_trailing_pct,
            trail_after_bars: self.trail_after_bars,
            trail_floor_fraction: self.trail_floor_fraction,
            default_trailing_pct: self.default_trailing_pct,
            late_after_bars: self.late_after_bars,
            late_tp_ratio: self.late_tp_ratio,
            late_sl_ratio: self.late_sl_ratio,
            late_stop_policy: self.late_stop_policy,
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::default_test_config;

    #[test]
    fn default_test_config_validates() {
        assert!(default_test_config().validate().is_ok());
    }

    #[test]
    fn inverted_ratio_window_rejected() {
        let mut cfg = default_test_config();
        cfg.body_ratio_min = 2.0;
        cfg.body_ratio_max = 0.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvertedRatioWindow { .. })
        ));
    }

    #[test]
    fn zero_cap_rejected() {
        let mut cfg = default_test_config();
        cfg.max_open_positions = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroPositionCap)));
    }

    #[test]
    fn unordered_tiers_rejected() {
        let mut cfg = default_test_config();
        cfg.size_tiers.reverse();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnorderedSizeTiers)
        ));
    }

    #[test]
    fn tier_below_detection_minimum_rejected() {
        let mut cfg = default_test_config();
        cfg.size_tiers.push(SizeTier {
            min_body_pct: cfg.min_k1_body / 2.0,
            size_usdt: 0.5,
        });
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TierBelowMinimum { .. })
        ));
    }

    #[test]
    fn negative_leverage_rejected() {
        let mut cfg = default_test_config();
        cfg.leverage = -1.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive { name: "leverage", .. })
        ));
    }

    #[test]
    fn interval_order_enforced() {
        let mut cfg = default_test_config();
        cfg.fine_interval = Interval::H1;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::IntervalOrder { .. })
        ));
    }

    #[test]
    fn risk_params_mirror_config() {
        let cfg = default_test_config();
        let rp = cfg.risk_params();
        assert_eq!(rp.leverage, cfg.leverage);
        assert_eq!(rp.base_sl_pct, cfg.base_sl_pct);
        assert_eq!(rp.late_stop_policy, cfg.late_stop_policy);
    }
}
