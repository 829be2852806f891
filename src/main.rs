use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use reversal_bot::bot::LiveBot;
use reversal_bot::config::Config;
use reversal_bot::exchange::BinanceClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    cfg.validate()?;

    let source = Box::new(BinanceClient::new(&cfg.symbol));
    let mut bot = LiveBot::new(cfg, source);
    bot.run().await?;

    Ok(())
}
