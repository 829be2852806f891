use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fixed-interval OHLC bar. Immutable once `close_time` has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

impl Candle {
    pub fn body_size(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Body strength: |close - open| / open, as a fraction.
    pub fn body_pct(&self) -> f64 {
        if self.open == 0.0 {
            return 0.0;
        }
        self.body_size() / self.open
    }

    pub fn body_high(&self) -> f64 {
        self.close.max(self.open)
    }

    pub fn body_low(&self) -> f64 {
        self.close.min(self.open)
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Whether this bar has finished forming at `now`. Live feeds include
    /// the still-forming last bar; it must not drive bar-counted state.
    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        self.close_time <= now
    }

    /// Basic sanity check used to reject malformed bars one at a time.
    pub fn is_well_formed(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite());
        finite && self.high >= self.low && self.open > 0.0
    }
}

/// Wraps Vec<Candle> with the accessors the engine needs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn tail(&self, n: usize) -> CandleSeries {
        let start = self.candles.len().saturating_sub(n);
        CandleSeries::new(self.candles[start..].to_vec())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles.push(candle);
    }

    /// Candles fully closed at `now`, dropping a still-forming tail bar.
    pub fn closed_at(&self, now: DateTime<Utc>) -> CandleSeries {
        let candles: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| c.is_closed_at(now))
            .cloned()
            .collect();
        CandleSeries::new(candles)
    }
}

impl std::ops::Index<usize> for CandleSeries {
    type Output = Candle;
    fn index(&self, index: usize) -> &Self::Output {
        &self.candles[index]
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;
    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{candle_at, make_candles};
    use chrono::Duration;

    fn bullish_candle() -> Candle {
        candle_at(0, 100.0, 115.0, 95.0, 110.0)
    }

    fn bearish_candle() -> Candle {
        candle_at(0, 110.0, 115.0, 95.0, 100.0)
    }

    #[test]
    fn candle_body_size_and_pct() {
        let c = bullish_candle();
        assert!((c.body_size() - 10.0).abs() < 1e-9);
        assert!((c.body_pct() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn candle_body_top_bottom() {
        let b = bullish_candle();
        assert!((b.body_high() - 110.0).abs() < 1e-9);
        assert!((b.body_low() - 100.0).abs() < 1e-9);
        let br = bearish_candle();
        assert!((br.body_high() - 110.0).abs() < 1e-9);
        assert!((br.body_low() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn candle_bullish_bearish() {
        assert!(bullish_candle().is_bullish());
        assert!(!bullish_candle().is_bearish());
        assert!(bearish_candle().is_bearish());
    }

    #[test]
    fn candle_well_formed_rejects_inverted_range() {
        let mut c = bullish_candle();
        assert!(c.is_well_formed());
        c.high = c.low - 1.0;
        assert!(!c.is_well_formed());
        let mut nan = bullish_candle();
        nan.close = f64::NAN;
        assert!(!nan.is_well_formed());
    }

    #[test]
    fn series_basics() {
        let s = make_candles(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0),
            (106.0, 112.0, 104.0, 110.0),
        ]);
        assert_eq!(s.len(), 3);
        assert!(!s.is_empty());
        assert!((s[1].open - 102.0).abs() < 1e-9);

        let tail = s.tail(2);
        assert_eq!(tail.len(), 2);
        assert!((tail[0].open - 102.0).abs() < 1e-9);
    }

    #[test]
    fn closed_at_drops_forming_tail() {
        let s = make_candles(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0),
        ]);
        // "now" is just before the second bar's close_time
        let now = s[1].close_time - Duration::seconds(1);
        let closed = s.closed_at(now);
        assert_eq!(closed.len(), 1);
        assert!((closed[0].open - 100.0).abs() < 1e-9);
    }
}
