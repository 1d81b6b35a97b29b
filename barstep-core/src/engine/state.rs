//! Run state, cancellation, and the run result.

use crate::domain::{Fill, Order, Position, RunLogEntry, Trade};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    NotStarted,
    Running,
    Finished,
    Aborted,
}

/// What one call to [`Engine::step`](super::Engine::step) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// A step completed; carries its number.
    Advanced(usize),
    /// Cancellation was requested while waiting for live data.
    Interrupted,
    /// Every feed is exhausted.
    Exhausted,
}

/// Cooperative stop signal, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final state of a completed (or cancelled) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub steps: usize,
    pub final_cash: f64,
    pub final_value: f64,
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub fills: Vec<Fill>,
    /// Closed round trips.
    pub trades: Vec<Trade>,
    pub open_trades: Vec<Trade>,
    pub run_log: Vec<RunLogEntry>,
    /// Analyzer reports keyed by analyzer name.
    pub analyses: BTreeMap<String, serde_json::Value>,
    /// Stopped by a [`CancelToken`] before the feeds ran out.
    pub cancelled: bool,
}

impl RunResult {
    pub fn total_return(&self, starting_cash: f64) -> f64 {
        if starting_cash == 0.0 {
            0.0
        } else {
            self.final_value / starting_cash - 1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
