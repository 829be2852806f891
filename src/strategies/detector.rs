use serde::{Deserialize, Serialize};

use crate::models::{Candle, Direction};
use crate::strategies::signals::Signal;

/// One rung of the margin ladder: signals whose K1 body strength reaches
/// `min_body_pct` (fraction) are sized at `size_usdt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeTier {
    pub min_body_pct: f64,
    pub size_usdt: f64,
}

/// Entry-rule thresholds. All body percentages are fractions (0.0021 = 0.21%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorParams {
    pub min_k1_body: f64,
    pub body_ratio_min: f64,
    pub body_ratio_max: f64,
    /// Sorted descending by `min_body_pct`; highest qualifying tier wins.
    pub size_tiers: Vec<SizeTier>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            min_k1_body: 0.0021,
            body_ratio_min: 0.5,
            body_ratio_max: 1.6,
            size_tiers: vec![
                SizeTier { min_body_pct: 0.0048, size_usdt: 4.0 },
                SizeTier { min_body_pct: 0.0030, size_usdt: 1.6 },
                SizeTier { min_body_pct: 0.0021, size_usdt: 1.0 },
            ],
        }
    }
}

/// `inner` sits entirely within `outer`'s high/low range.
pub fn is_contained(outer: &Candle, inner: &Candle) -> bool {
    inner.high <= outer.high && inner.low >= outer.low
}

/// Evaluate the trailing window of closed candles (newest last, up to 3).
///
/// With three candles [k1, k2, k3] where k2 is contained in k1, the
/// containment rule runs the breakout test between k1 and k3 and the entry
/// price becomes k3's close. Otherwise the plain two-candle rule runs on
/// the newest adjacent pair. At most one signal per bar; pure function of
/// the supplied candles.
pub fn evaluate_window(window: &[Candle], params: &DetectorParams) -> Option<Signal> {
    match window {
        [k1, k2, k3] if is_contained(k1, k2) => {
            rule_a(k1, k3, params).map(|(direction, ratio, size)| Signal {
                direction,
                entry_price: k3.close,
                entry_time: k3.close_time,
                size_usdt: size,
                k1_body_pct: k1.body_pct(),
                k2_body_ratio: ratio,
                k1: k1.clone(),
                k2: k2.clone(),
                k3: Some(k3.clone()),
            })
        }
        [.., k1, k2] => rule_a(k1, k2, params).map(|(direction, ratio, size)| Signal {
            direction,
            entry_price: k2.close,
            entry_time: k2.close_time,
            size_usdt: size,
            k1_body_pct: k1.body_pct(),
            k2_body_ratio: ratio,
            k1: k1.clone(),
            k2: k2.clone(),
            k3: None,
        }),
        _ => None,
    }
}

/// The direct breakout-reversal rule between a reference candle and the
/// breaking candle. Returns (direction, body ratio, tier size).
fn rule_a(k1: &Candle, k2: &Candle, params: &DetectorParams) -> Option<(Direction, f64, f64)> {
    if k1.body_pct() < params.min_k1_body {
        return None;
    }

    let k1_body = k1.body_size();
    if k1_body == 0.0 {
        return None;
    }
    let ratio = k2.body_size() / k1_body;
    if ratio < params.body_ratio_min || ratio > params.body_ratio_max {
        return None;
    }

    // The breaking candle's body must stay inside the reference range;
    // only a wick may poke out.
    if k2.body_high() > k1.high || k2.body_low() < k1.low {
        return None;
    }

    let lower_break = k2.low < k1.low;
    let upper_break = k2.high > k1.high;

    // A bar sweeping both sides is ambiguous, not a signal.
    let direction = match (lower_break, upper_break) {
        (true, true) | (false, false) => return None,
        (true, false) => Direction::Long,
        (false, true) => Direction::Short,
    };

    let size = size_for(&params.size_tiers, k1.body_pct())?;
    Some((direction, ratio, size))
}

/// Highest qualifying tier wins; below the lowest tier nothing opens.
fn size_for(tiers: &[SizeTier], body_pct: f64) -> Option<f64> {
    tiers
        .iter()
        .find(|t| body_pct >= t.min_body_pct)
        .map(|t| t.size_usdt)
}
