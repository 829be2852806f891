use tracing::debug;

use crate::core::exits::{self, RiskParams};
use crate::models::Candle;
use crate::strategies::signals::Signal;
use crate::trading::position::Position;
use crate::trading::trade_record::ClosedTrade;

/// Owns every open position, enforces the concurrency cap, and advances
/// the whole set exactly once per incoming bar.
///
/// Positions live in a dense owned Vec; closing swap-removes, so the walk
/// never holds references across a removal. Callers must `advance` a bar
/// before admitting the signal detected on that same bar, which is what
/// keeps a position from ever evaluating exits against its creating
/// candle.
pub struct PositionBook {
    params: RiskParams,
    max_open: usize,
    open: Vec<Position>,
    next_id: u64,
    /// Signals dropped because the book was full.
    pub dropped_at_capacity: usize,
}

impl PositionBook {
    pub fn new(params: RiskParams, max_open: usize) -> Self {
        Self {
            params,
            max_open,
            open: Vec::new(),
            next_id: 0,
            dropped_at_capacity: 0,
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    /// Create a position for the signal, or drop it when the cap is hit.
    /// Dropped signals are not retried.
    pub fn admit(&mut self, signal: &Signal) -> Option<u64> {
        if self.open.len() >= self.max_open {
            self.dropped_at_capacity += 1;
            debug!(
                "signal dropped: book full ({}/{})",
                self.open.len(),
                self.max_open
            );
            return None;
        }

        self.next_id += 1;
        let id = self.next_id;
        self.open.push(Position::from_signal(id, signal));
        Some(id)
    }

    /// Run every open position through the exit machine for one bar.
    /// Positions that close are removed and returned.
    pub fn advance(&mut self, bar: &Candle) -> Vec<ClosedTrade> {
        let mut closed = Vec::new();

        let mut i = 0;
        while i < self.open.len() {
            match exits::evaluate_bar(&mut self.open[i], bar, &self.params) {
                Some(exit) => {
                    let pos = self.open.swap_remove(i);
                    closed.push(ClosedTrade::from_exit(pos, bar.close_time, &exit));
                    // swap_remove moved a not-yet-advanced position into
                    // slot i; do not step past it.
                }
                None => i += 1,
            }
        }

        closed
    }

    /// Positions abandoned when the data stream ends. They are excluded
    /// from every statistic.
    pub fn drain_open(&mut self) -> Vec<Position> {
        std::mem::take(&mut self.open)
    }
}
