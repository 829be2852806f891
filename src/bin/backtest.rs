use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use reversal_bot::backtesting::{data_fetcher, BacktestRunner};
use reversal_bot::config::Config;
use reversal_bot::trading::trade_record;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    // Optional override: number of coarse candles to replay.
    let args: Vec<String> = std::env::args().collect();
    if let Some(n) = args.get(1).and_then(|s| s.parse::<usize>().ok()) {
        cfg.backtest_candles = n;
    }

    cfg.validate()?;

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          BREAKOUT-REVERSAL BACKTESTER                    ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  Symbol:    {:<12}                                 ║", cfg.symbol);
    println!("║  Interval:  {:<6}                                       ║", cfg.coarse_interval.to_string());
    println!("║  Candles:   {:<8}                                     ║", cfg.backtest_candles);
    println!("║  Leverage:  {:<6}                                       ║", cfg.leverage);
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let candles = data_fetcher::fetch_and_cache(&cfg, cfg.backtest_candles).await?;
    if candles.len() < 3 {
        println!("ERROR: not enough candle data to backtest ({} bars)", candles.len());
        return Ok(());
    }

    println!(
        "Replaying {} candles from {} to {}",
        candles.len(),
        candles[0].open_time.format("%Y-%m-%d %H:%M"),
        candles[candles.len() - 1].open_time.format("%Y-%m-%d %H:%M"),
    );
    println!();

    let mut runner = BacktestRunner::new(&cfg);
    let result = runner.run(&candles);

    result.report.print_summary();

    std::fs::create_dir_all(&cfg.data_dir)?;
    let csv_path = PathBuf::from(&cfg.data_dir).join(format!(
        "trades_{}_{}.csv",
        cfg.symbol.to_lowercase(),
        cfg.coarse_interval
    ));
    let txt_path = csv_path.with_extension("txt");

    trade_record::write_csv(&csv_path, &result.trades)?;
    trade_record::write_txt(&txt_path, &result.trades, &result.report)?;

    println!("\nTrade log saved to: {}", csv_path.display());
    println!("Readable log saved to: {}", txt_path.display());

    Ok(())
}
