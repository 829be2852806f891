use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::exchange::CandleSource;
use crate::models::{Candle, CandleSeries, Interval};

/// A CandleSource that replays pre-loaded data. A movable cursor (`now`)
/// controls visibility: bars that have opened by `now` are served, and the
/// newest of them may still be forming, matching what a live feed returns.
pub struct HistoricalReplay {
    data: HashMap<Interval, Vec<Candle>>,
    now: DateTime<Utc>,
}

impl HistoricalReplay {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            now: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Load candles for an interval. Must be sorted oldest-first.
    pub fn load(&mut self, interval: Interval, candles: Vec<Candle>) {
        self.data.insert(interval, candles);
    }

    /// Advance the replay clock.
    pub fn set_time(&mut self, t: DateTime<Utc>) {
        self.now = t;
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.now
    }

    fn visible(&self, interval: Interval, limit: usize) -> CandleSeries {
        let empty = Vec::new();
        let all = self.data.get(&interval).unwrap_or(&empty);

        let end = all.partition_point(|c| c.open_time <= self.now);
        if end == 0 {
            return CandleSeries::default();
        }
        let start = end.saturating_sub(limit);
        CandleSeries::new(all[start..end].to_vec())
    }
}

impl Default for HistoricalReplay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleSource for HistoricalReplay {
    async fn fetch_klines(&mut self, interval: Interval, limit: usize) -> Result<CandleSeries> {
        Ok(self.visible(interval, limit))
    }

    async fn server_time(&mut self) -> Result<DateTime<Utc>> {
        Ok(self.now)
    }
}
