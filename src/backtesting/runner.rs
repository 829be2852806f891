use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::Candle;
use crate::strategies::detector::{self, DetectorParams};
use crate::trading::book::PositionBook;
use crate::trading::trade_record::ClosedTrade;

use super::report::BacktestReport;

/// Outcome of one deterministic run over a candle sequence.
pub struct BacktestResult {
    pub trades: Vec<ClosedTrade>,
    pub report: BacktestReport,
}

/// Steps through historical candles strictly in timestamp order, advancing
/// every open position before admitting the signal detected on that bar.
///
/// Fully synchronous with no shared state, so sweep drivers can run many
/// instances in parallel; identical inputs always produce the identical
/// closed-trade sequence.
pub struct BacktestRunner {
    detector_params: DetectorParams,
    book: PositionBook,
    /// Rolling window of the last validated bars (at most 3).
    window: Vec<Candle>,
    signals_detected: usize,
    signals_admitted: usize,
    bars_rejected: usize,
}

impl BacktestRunner {
    pub fn new(cfg: &Config) -> Self {
        Self {
            detector_params: cfg.detector_params(),
            book: PositionBook::new(cfg.risk_params(), cfg.max_open_positions),
            window: Vec::with_capacity(3),
            signals_detected: 0,
            signals_admitted: 0,
            bars_rejected: 0,
        }
    }

    pub fn run(&mut self, candles: &[Candle]) -> BacktestResult {
        let total = candles.len();
        let log_interval = (total / 20).max(1);
        info!("=== BACKTEST START === ({} candles)", total);

        let mut trades: Vec<ClosedTrade> = Vec::new();

        for (i, bar) in candles.iter().enumerate() {
            if i % log_interval == 0 && i > 0 {
                info!(
                    "  Progress: {:.0}% | {} | trades: {} | open: {}",
                    i as f64 / total as f64 * 100.0,
                    bar.open_time.format("%Y-%m-%d %H:%M"),
                    trades.len(),
                    self.book.open_count(),
                );
            }

            if let Some(validated) = self.validate(bar) {
                trades.extend(self.step(validated));
            }
        }

        // Positions that never resolved are excluded from statistics.
        let unresolved = self.book.drain_open();
        if !unresolved.is_empty() {
            info!(
                "{} position(s) still open at end of data; excluded from statistics",
                unresolved.len()
            );
        }

        info!("=== BACKTEST COMPLETE === ({} trades)", trades.len());

        let mut report = BacktestReport::from_trades(&trades);
        report.signals_detected = self.signals_detected;
        report.signals_admitted = self.signals_admitted;
        report.signals_dropped_capacity = self.book.dropped_at_capacity;
        report.bars_rejected = self.bars_rejected;
        report.unresolved_positions = unresolved.len();

        BacktestResult { trades, report }
    }

    /// Reject malformed or out-of-order bars individually; the run goes on.
    fn validate<'a>(&mut self, bar: &'a Candle) -> Option<&'a Candle> {
        if !bar.is_well_formed() {
            warn!("rejecting malformed bar at {}", bar.open_time);
            self.bars_rejected += 1;
            return None;
        }
        if let Some(last) = self.window.last() {
            if bar.open_time <= last.open_time {
                warn!(
                    "rejecting out-of-order bar {} (last was {})",
                    bar.open_time, last.open_time
                );
                self.bars_rejected += 1;
                return None;
            }
        }
        Some(bar)
    }

    /// One bar: advance the whole book first, then look for a new entry.
    /// The admit-after-advance order guarantees a position never evaluates
    /// exits against the candle that created it.
    fn step(&mut self, bar: &Candle) -> Vec<ClosedTrade> {
        let closed = self.book.advance(bar);

        if self.window.len() == 3 {
            self.window.remove(0);
        }
        self.window.push(bar.clone());

        if let Some(signal) = detector::evaluate_window(&self.window, &self.detector_params) {
            self.signals_detected += 1;
            debug!(
                "signal: {} @ {:.4} ({} USDT) at {}",
                signal.direction, signal.entry_price, signal.size_usdt, signal.entry_time
            );
            if self.book.admit(&signal).is_some() {
                self.signals_admitted += 1;
            }
        }

        closed
    }
}
