use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::exchange::BinanceClient;
use crate::models::Candle;

/// Fetch historical klines for the configured symbol/interval, caching to
/// a JSON file so repeated runs (and sweeps) skip the network entirely.
/// Delete the cache file to force a refresh.
pub async fn fetch_and_cache(cfg: &Config, limit: usize) -> Result<Vec<Candle>> {
    std::fs::create_dir_all(&cfg.data_dir)?;
    let cache_file = format!(
        "{}/{}_{}_klines.json",
        cfg.data_dir,
        cfg.symbol.to_lowercase(),
        cfg.coarse_interval
    );

    if Path::new(&cache_file).exists() {
        match load_cache(&cache_file) {
            Ok(candles) if !candles.is_empty() => {
                info!("Loaded {} cached candles from {}", candles.len(), cache_file);
                return Ok(candles);
            }
            Ok(_) => warn!("Cache {} is empty; refetching", cache_file),
            Err(e) => warn!("Failed to read cache {}: {}; refetching", cache_file, e),
        }
    }

    info!(
        "Fetching {} {} candles for {} from Binance...",
        limit, cfg.coarse_interval, cfg.symbol
    );
    let mut client = BinanceClient::new(&cfg.symbol);
    let candles = client.fetch_klines_paged(cfg.coarse_interval, limit).await?;
    info!("Fetched {} candles", candles.len());

    match serde_json::to_string(&candles) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&cache_file, json) {
                warn!("Failed to write cache {}: {}", cache_file, e);
            } else {
                info!("Cached to {}", cache_file);
            }
        }
        Err(e) => warn!("Failed to serialize cache: {}", e),
    }

    Ok(candles)
}

fn load_cache(path: &str) -> Result<Vec<Candle>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
