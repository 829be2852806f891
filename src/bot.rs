use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::exchange::CandleSource;
use crate::notify::{spawn_push, ServerChanNotifier};
use crate::strategies::tracker::{CoarseEvent, LiveSignal, WindowTracker};

/// Live monitor: a coarse loop maintaining the tracked reference window
/// and a fine loop watching for the breakout-then-reversion trigger.
///
/// Candle fetches tolerate transient failures: a failed fetch leaves the
/// tracking state untouched, and only sustained unavailability tears the
/// window down. Notification delivery is spawned off-loop and can never
/// stall the next evaluation.
pub struct LiveBot {
    config: Config,
    source: Box<dyn CandleSource>,
    tracker: WindowTracker,
    notifier: Option<Arc<ServerChanNotifier>>,

    last_coarse_refresh: Option<Instant>,
    /// open_time of the newest coarse bar already fed to the tracker.
    last_coarse_processed: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    pub signals_emitted: usize,
}

impl LiveBot {
    pub fn new(config: Config, source: Box<dyn CandleSource>) -> Self {
        info!("{}", "=".repeat(60));
        info!("Breakout-reversal live monitor starting");
        info!("Symbol: {}", config.symbol);
        info!(
            "Window: {} reference, {} trigger stream",
            config.coarse_interval, config.fine_interval
        );
        info!(
            "K1 body minimum: {:.3}%",
            config.min_k1_body * 100.0
        );
        info!("{}", "=".repeat(60));

        let tracker = WindowTracker::new(config.min_k1_body);
        let notifier = ServerChanNotifier::new(&config.serverchan_send_key).map(Arc::new);

        Self {
            config,
            source,
            tracker,
            notifier,
            last_coarse_refresh: None,
            last_coarse_processed: None,
            consecutive_failures: 0,
            signals_emitted: 0,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Monitor running. Press Ctrl+C to stop.");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down. Signals emitted: {}", self.signals_emitted);
                    return Ok(());
                }
                _ = self.tick() => {}
            }
        }
    }

    async fn tick(&mut self) {
        let coarse_due = match self.last_coarse_refresh {
            Some(at) => at.elapsed().as_secs() >= self.config.coarse_refresh_secs,
            None => true,
        };
        if coarse_due {
            self.refresh_coarse().await;
            self.last_coarse_refresh = Some(Instant::now());
        }

        if self.tracker.is_watching() {
            self.check_fine().await;
        } else {
            info!("waiting for a qualifying {} reference bar", self.config.coarse_interval);
        }

        tokio::time::sleep(Duration::from_secs(self.config.check_interval_secs)).await;
    }

    /// Coarse loop body: feed the newest closed coarse bar through the
    /// window lifecycle.
    pub async fn refresh_coarse(&mut self) {
        let series = match self
            .source
            .fetch_klines(self.config.coarse_interval, 3)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.note_failure(&format!("coarse fetch failed: {e:#}"));
                return;
            }
        };
        let now = match self.source.server_time().await {
            Ok(t) => t,
            Err(_) => Utc::now(),
        };
        self.consecutive_failures = 0;

        let closed = series.closed_at(now);
        let newest = match closed.last() {
            Some(bar) => bar.clone(),
            None => return,
        };
        if self.last_coarse_processed == Some(newest.open_time) {
            return;
        }
        self.last_coarse_processed = Some(newest.open_time);

        match self.tracker.on_coarse_close(&newest) {
            CoarseEvent::Idle => {}
            CoarseEvent::Opened => {
                if let Some(w) = self.tracker.window() {
                    info!(
                        "reference window opened: body {:.3}%, range [{:.4} - {:.4}]",
                        w.k1.body_pct() * 100.0,
                        w.k1.low,
                        w.k1.high
                    );
                }
            }
            CoarseEvent::Containment => {
                let Some(w) = self.tracker.window() else {
                    return;
                };
                info!(
                    "second bar contained; watching the third bar against [{:.4} - {:.4}]",
                    w.k1.low, w.k1.high
                );
                if let Some(notifier) = &self.notifier {
                    let body = format!(
                        "## Containment pattern\n\n**Reference range:** [{:.4} - {:.4}]\n\n\
                         The second bar closed inside the reference; the third bar decides.",
                        w.k1.low, w.k1.high
                    );
                    spawn_push(
                        notifier.clone(),
                        format!("{} containment", self.config.symbol),
                        body,
                    );
                }
            }
            CoarseEvent::Expired => {
                info!("reference window expired; waiting for a new qualifying bar");
            }
        }
    }

    /// Fine loop body: test the latest fine bar for the reversion trigger.
    pub async fn check_fine(&mut self) {
        let series = match self
            .source
            .fetch_klines(self.config.fine_interval, 1)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.note_failure(&format!("fine fetch failed: {e:#}"));
                return;
            }
        };
        self.consecutive_failures = 0;

        let bar = match series.last() {
            Some(b) => b.clone(),
            None => return,
        };

        if let Some(signal) = self.tracker.on_fine_bar(&bar) {
            self.emit(signal);
        } else if !self.tracker.is_watching() {
            info!("window invalidated (both reference boundaries breached)");
        }
    }

    /// A failed fetch never touches tracking state; sustained failure
    /// tears the window down and the monitor degrades to waiting.
    fn note_failure(&mut self, what: &str) {
        self.consecutive_failures += 1;
        warn!(
            "{} ({}/{})",
            what, self.consecutive_failures, self.config.max_consecutive_failures
        );
        if self.consecutive_failures >= self.config.max_consecutive_failures {
            warn!("sustained fetch failure; tearing down tracking state");
            self.tracker.reset();
            self.consecutive_failures = 0;
        }
    }

    fn emit(&mut self, signal: LiveSignal) {
        self.signals_emitted += 1;
        // Any downstream order submission must be idempotent per intended
        // trade; this id is the dedupe key a retry would reuse.
        let client_order_id = Uuid::new_v4();

        info!("{}", "=".repeat(60));
        info!("SIGNAL — {}", signal.direction.as_str().to_uppercase());
        info!("  Trigger close: {:.4}", signal.trigger_price);
        info!("  Swept level:   {:.4}", signal.reference_price);
        info!("  Breakout peak: {:.4}", signal.breakout_price);
        info!("  Client order id: {}", client_order_id);
        info!("{}", "=".repeat(60));

        if let Some(notifier) = &self.notifier {
            let title = format!("{} signal - {}", self.config.symbol, signal.direction);
            let body = format!(
                "## Breakout-reversal signal\n\n\
                 **Direction:** {}\n\n\
                 **Trigger close:** {:.4}\n\n\
                 **Swept level:** {:.4}\n\n\
                 **Breakout peak:** {:.4}\n\n\
                 **Time:** {}\n\n\
                 **Order id:** {}",
                signal.direction,
                signal.trigger_price,
                signal.reference_price,
                signal.breakout_price,
                signal.at.format("%Y-%m-%d %H:%M:%S"),
                client_order_id,
            );
            spawn_push(notifier.clone(), title, body);
        }
    }
}
