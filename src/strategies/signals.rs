use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Direction};

/// A qualifying breakout-reversal entry. Produced at most once per closed
/// bar and consumed immediately by the position book (or dropped when the
/// book is full). The reference candles ride along so a trade can be
/// audited without re-fetching market data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Margin committed to this trade, from the sizing tiers.
    pub size_usdt: f64,
    /// K1 body strength as a fraction (drives the sizing tier).
    pub k1_body_pct: f64,
    /// K2 body size relative to K1 body size.
    pub k2_body_ratio: f64,
    pub k1: Candle,
    pub k2: Candle,
    /// Present when the containment rule deferred entry to a third candle.
    pub k3: Option<Candle>,
}

impl Signal {
    /// The candle whose close is the entry price.
    pub fn breaking_candle(&self) -> &Candle {
        self.k3.as_ref().unwrap_or(&self.k2)
    }
}
