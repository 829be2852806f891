use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Direction};
use crate::strategies::signals::Signal;

/// Mutable state for one open trade. Exclusively owned by the position
/// book from creation until it closes.
///
/// `favorable_extreme` only ever moves toward profit and `adverse_extreme`
/// toward loss; `is_weak` and `trailing_active`, once set, never revert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub size_usdt: f64,
    /// Bars evaluated since entry. The creating bar is never counted.
    pub bars_held: u32,
    /// Best price reached so far, direction-adjusted.
    pub favorable_extreme: f64,
    /// Worst price reached so far, direction-adjusted.
    pub adverse_extreme: f64,
    pub is_weak: bool,
    pub trailing_active: bool,
    /// Retracement allowance in leveraged-return points, once trailing.
    pub trailing_pct: f64,
    /// Highest leveraged return seen since trailing activated.
    pub trailing_peak_pct: f64,
    pub k1_body_pct: f64,
    pub k2_body_ratio: f64,
    pub k1: Candle,
    pub k2: Candle,
    pub k3: Option<Candle>,
}

impl Position {
    pub fn from_signal(id: u64, signal: &Signal) -> Self {
        Self {
            id,
            direction: signal.direction,
            entry_price: signal.entry_price,
            entry_time: signal.entry_time,
            size_usdt: signal.size_usdt,
            bars_held: 0,
            favorable_extreme: signal.entry_price,
            adverse_extreme: signal.entry_price,
            is_weak: false,
            trailing_active: false,
            trailing_pct: 0.0,
            trailing_peak_pct: 0.0,
            k1_body_pct: signal.k1_body_pct,
            k2_body_ratio: signal.k2_body_ratio,
            k1: signal.k1.clone(),
            k2: signal.k2.clone(),
            k3: signal.k3.clone(),
        }
    }
}
