use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::exchange::CandleSource;
use crate::models::{Candle, CandleSeries, Interval};

/// Binance mirrors; retries rotate through them.
const HOSTS: [&str; 4] = [
    "https://api.binance.com",
    "https://api1.binance.com",
    "https://api2.binance.com",
    "https://api3.binance.com",
];

const MAX_RETRIES: usize = 3;
const MAX_KLINES_PER_REQUEST: usize = 1000;
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
const PAGE_SLEEP: Duration = Duration::from_millis(150);

#[derive(Debug, Deserialize)]
struct ServerTimeResponse {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

/// Public market-data client for Binance spot klines. No authentication;
/// transient failures retry with increasing backoff across host mirrors
/// before surfacing an error.
pub struct BinanceClient {
    client: Client,
    symbol: String,
    last_request: Option<Instant>,
}

impl BinanceClient {
    pub fn new(symbol: &str) -> Self {
        Self {
            client: Client::new(),
            symbol: symbol.to_string(),
            last_request: None,
        }
    }

    async fn rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// GET with bounded retry: attempt n sleeps n*2 seconds and moves to
    /// the next host mirror. The final error is returned to the caller,
    /// which decides whether tracking state survives.
    async fn get_with_retry(&mut self, path_and_query: &str) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            self.rate_limit().await;
            let url = format!("{}{}", HOSTS[attempt % HOSTS.len()], path_and_query);

            match self.try_get(&url).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt + 1 < MAX_RETRIES {
                        let wait = Duration::from_secs((attempt as u64 + 1) * 2);
                        warn!(
                            "request failed (attempt {}/{}): {e:#}; retrying in {}s",
                            attempt + 1,
                            MAX_RETRIES,
                            wait.as_secs()
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("request failed")))
    }

    async fn try_get(&self, url: &str) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("request send failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {}: {}", status, body);
        }

        resp.json::<Value>().await.context("invalid JSON response")
    }

    fn klines_path(&self, interval: Interval, limit: usize, end_time: Option<i64>) -> String {
        let mut path = format!(
            "/api/v3/klines?symbol={}&interval={}&limit={}",
            self.symbol,
            interval.binance_interval(),
            limit
        );
        if let Some(end) = end_time {
            path.push_str(&format!("&endTime={}", end));
        }
        path
    }

    /// Fetch the most recent `limit` klines (capped at one request).
    pub async fn fetch_klines(&mut self, interval: Interval, limit: usize) -> Result<CandleSeries> {
        let limit = limit.min(MAX_KLINES_PER_REQUEST);
        let path = self.klines_path(interval, limit, None);
        let value = self.get_with_retry(&path).await?;
        parse_klines(&value)
    }

    /// Page backwards through history until `total` klines are collected
    /// (or the exchange runs out), concatenated oldest-first.
    pub async fn fetch_klines_paged(
        &mut self,
        interval: Interval,
        total: usize,
    ) -> Result<Vec<Candle>> {
        let mut all: Vec<Candle> = Vec::new();
        let mut remaining = total;
        let mut end_time: Option<i64> = None;

        while remaining > 0 {
            let batch = remaining.min(MAX_KLINES_PER_REQUEST);
            let path = self.klines_path(interval, batch, end_time);
            let value = self.get_with_retry(&path).await?;
            let series = parse_klines(&value)?;
            if series.is_empty() {
                break;
            }

            let fetched = series.len();
            end_time = Some(series[0].open_time.timestamp_millis() - 1);

            let mut chunk: Vec<Candle> = series.into_iter().collect();
            chunk.extend(all);
            all = chunk;

            remaining = remaining.saturating_sub(fetched);
            if fetched < batch {
                break;
            }
            tokio::time::sleep(PAGE_SLEEP).await;
        }

        Ok(all)
    }

    pub async fn server_time(&mut self) -> Result<DateTime<Utc>> {
        let value = self.get_with_retry("/api/v3/time").await?;
        let parsed: ServerTimeResponse =
            serde_json::from_value(value).context("invalid server time response")?;
        DateTime::from_timestamp_millis(parsed.server_time)
            .context("server time out of range")
    }
}

/// Binance kline rows are heterogeneous arrays:
/// [open_time, "open", "high", "low", "close", "volume", close_time, ...].
/// Rows that fail to parse are skipped; the remainder is sorted oldest-first.
fn parse_klines(value: &Value) -> Result<CandleSeries> {
    let rows = value.as_array().context("kline response is not an array")?;

    let mut candles: Vec<Candle> = rows.iter().filter_map(parse_kline_row).collect();
    candles.sort_by_key(|c| c.open_time);
    Ok(CandleSeries::new(candles))
}

fn parse_kline_row(row: &Value) -> Option<Candle> {
    let row = row.as_array()?;
    let open_time = DateTime::from_timestamp_millis(row.first()?.as_i64()?)?;
    let close_time = DateTime::from_timestamp_millis(row.get(6)?.as_i64()?)?;

    let field = |i: usize| -> Option<f64> { row.get(i)?.as_str()?.parse().ok() };

    Some(Candle {
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
        close_time,
    })
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_klines(&mut self, interval: Interval, limit: usize) -> Result<CandleSeries> {
        self.fetch_klines(interval, limit).await
    }

    async fn server_time(&mut self) -> Result<DateTime<Utc>> {
        self.server_time().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row(open_ms: i64, o: &str, h: &str, l: &str, c: &str) -> Value {
        json!([
            open_ms, o, h, l, c, "123.4", open_ms + 899_999, "0", 10, "0", "0", "0"
        ])
    }

    #[test]
    fn parses_rows_and_sorts_oldest_first() {
        let value = json!([
            sample_row(1_700_000_900_000, "101.0", "102.0", "100.5", "101.5"),
            sample_row(1_700_000_000_000, "100.0", "101.0", "99.5", "100.8"),
        ]);
        let series = parse_klines(&value).unwrap();
        assert_eq!(series.len(), 2);
        assert!(series[0].open_time < series[1].open_time);
        assert!((series[0].open - 100.0).abs() < 1e-9);
        assert!((series[1].volume - 123.4).abs() < 1e-9);
    }

    #[test]
    fn skips_unparsable_rows() {
        let value = json!([
            sample_row(1_700_000_000_000, "100.0", "101.0", "99.5", "100.8"),
            json!(["garbage"]),
        ]);
        let series = parse_klines(&value).unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn close_time_is_parsed() {
        let value = json!([sample_row(1_700_000_000_000, "1", "2", "0.5", "1.5")]);
        let series = parse_klines(&value).unwrap();
        assert_eq!(
            series[0].close_time.timestamp_millis(),
            1_700_000_000_000 + 899_999
        );
    }
}
