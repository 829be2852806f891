use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candle, Direction};
use crate::strategies::detector::is_contained;

/// Which coarse bar the fine stream is currently being watched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchStage {
    /// The bar right after K1 is forming; watch it against K1's range.
    Second,
    /// K2 closed contained in K1; the following bar is watched instead.
    Third,
}

/// The currently tracked reference window. Owned behind an `Option` so a
/// reset is one assignment: no evaluation can observe it half-cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedWindow {
    pub k1: Candle,
    /// The contained middle bar, once seen.
    pub k2: Option<Candle>,
    pub stage: WatchStage,
    pub breakout_up: bool,
    pub breakout_down: bool,
    pub breakout_up_price: f64,
    pub breakout_down_price: f64,
    signaled_short: bool,
    signaled_long: bool,
}

impl TrackedWindow {
    fn new(k1: Candle) -> Self {
        Self {
            k1,
            k2: None,
            stage: WatchStage::Second,
            breakout_up: false,
            breakout_down: false,
            breakout_up_price: 0.0,
            breakout_down_price: 0.0,
            signaled_short: false,
            signaled_long: false,
        }
    }
}

/// Breakout-then-reversion trigger observed on the fine stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSignal {
    pub direction: Direction,
    /// Fine close back inside the reference range.
    pub trigger_price: f64,
    /// The K1 boundary that was swept.
    pub reference_price: f64,
    pub breakout_price: f64,
    pub at: DateTime<Utc>,
}

/// Window lifecycle outcome of one newly closed coarse bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoarseEvent {
    /// Nothing tracked and the bar did not qualify as a reference.
    Idle,
    /// The bar became K1; the next coarse period is being watched.
    Opened,
    /// K2 closed inside K1; watching shifted to the third bar.
    Containment,
    /// The watched period ended; the window was torn down.
    Expired,
}

/// Per-instrument tracking state for the live loops. Holding it by value
/// (not module-global) lets several instrument trackers coexist and makes
/// the reset semantics directly testable.
pub struct WindowTracker {
    min_k1_body: f64,
    window: Option<TrackedWindow>,
}

impl WindowTracker {
    pub fn new(min_k1_body: f64) -> Self {
        Self {
            min_k1_body,
            window: None,
        }
    }

    pub fn window(&self) -> Option<&TrackedWindow> {
        self.window.as_ref()
    }

    pub fn is_watching(&self) -> bool {
        self.window.is_some()
    }

    /// Atomic teardown.
    pub fn reset(&mut self) {
        self.window = None;
    }

    /// Feed one NEWLY CLOSED coarse bar (callers dedupe by open_time).
    pub fn on_coarse_close(&mut self, bar: &Candle) -> CoarseEvent {
        match self.window.take() {
            None => self.try_open(bar),
            Some(mut w) => match w.stage {
                WatchStage::Second => {
                    // `bar` is K2. Contained -> defer to the third bar;
                    // otherwise the watched period just ended.
                    if is_contained(&w.k1, bar) {
                        w.k2 = Some(bar.clone());
                        w.stage = WatchStage::Third;
                        // Fresh breakout state for the new watched period.
                        w.breakout_up = false;
                        w.breakout_down = false;
                        w.breakout_up_price = 0.0;
                        w.breakout_down_price = 0.0;
                        w.signaled_short = false;
                        w.signaled_long = false;
                        self.window = Some(w);
                        CoarseEvent::Containment
                    } else {
                        // Window over; the closing bar may itself seed the
                        // next reference.
                        self.expire_into(bar)
                    }
                }
                WatchStage::Third => self.expire_into(bar),
            },
        }
    }

    fn try_open(&mut self, bar: &Candle) -> CoarseEvent {
        if bar.body_pct() >= self.min_k1_body {
            self.window = Some(TrackedWindow::new(bar.clone()));
            CoarseEvent::Opened
        } else {
            CoarseEvent::Idle
        }
    }

    fn expire_into(&mut self, bar: &Candle) -> CoarseEvent {
        match self.try_open(bar) {
            CoarseEvent::Opened => CoarseEvent::Opened,
            _ => CoarseEvent::Expired,
        }
    }

    /// Feed the latest fine bar while a window is tracked. Records
    /// breakouts beyond K1's range and fires when a later close returns
    /// inside; a single bar engulfing both sides invalidates the window.
    pub fn on_fine_bar(&mut self, fine: &Candle) -> Option<LiveSignal> {
        // Engulfment breaching both reference boundaries: not a reversion
        // setup any more. Invalidate atomically.
        let engulfs = {
            let w = self.window.as_ref()?;
            fine.high > w.k1.high && fine.low < w.k1.low
        };
        if engulfs {
            self.window = None;
            return None;
        }

        let w = self.window.as_mut()?;

        if fine.high > w.k1.high && !w.breakout_up {
            w.breakout_up = true;
            w.breakout_up_price = fine.high;
        }
        if fine.low < w.k1.low && !w.breakout_down {
            w.breakout_down = true;
            w.breakout_down_price = fine.low;
        }

        let close_in_range = fine.close >= w.k1.low && fine.close <= w.k1.high;
        if !close_in_range {
            return None;
        }

        if w.breakout_up && !w.signaled_short {
            w.signaled_short = true;
            return Some(LiveSignal {
                direction: Direction::Short,
                trigger_price: fine.close,
                reference_price: w.k1.high,
                breakout_price: w.breakout_up_price,
                at: fine.close_time,
            });
        }
        if w.breakout_down && !w.signaled_long {
            w.signaled_long = true;
            return Some(LiveSignal {
                direction: Direction::Long,
                trigger_price: fine.close,
                reference_price: w.k1.low,
                breakout_price: w.breakout_down_price,
                at: fine.close_time,
            });
        }

        None
    }
}
