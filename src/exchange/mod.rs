pub mod binance;
pub mod historical;

pub use binance::BinanceClient;
pub use historical::HistoricalReplay;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CandleSeries, Interval};

/// Ordered candle supply for one instrument. Live implementations return
/// the most recent bars including the still-forming last one; consumers
/// filter with `Candle::is_closed_at` before advancing bar-counted state.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_klines(&mut self, interval: Interval, limit: usize) -> Result<CandleSeries>;
    async fn server_time(&mut self) -> Result<DateTime<Utc>>;
}
