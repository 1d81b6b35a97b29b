//! Liquidity constraints — participation limits and remainder policies.
//!
//! When configured, an order fills at most a fraction of the bar's volume.
//! All orders on one instrument share that cap across a step's matching
//! passes (the regular pass and the cheat-on-close pass). The
//! unfilled remainder is either carried to the next bar or canceled.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Keep the order working with the remaining size.
    #[default]
    Carry,
    /// Cancel whatever could not be filled.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityPolicy {
    /// Maximum participation as a fraction of bar volume (0.0 to 1.0).
    pub max_participation: f64,
    #[serde(default)]
    pub remainder: RemainderPolicy,
}

impl LiquidityPolicy {
    pub fn new(max_participation: f64, remainder: RemainderPolicy) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&max_participation),
            "participation rate must be 0.0 to 1.0"
        );
        Self {
            max_participation,
            remainder,
        }
    }

    pub fn max_fill(&self, bar_volume: f64) -> f64 {
        (bar_volume * self.max_participation).max(0.0)
    }

    /// Split a desired size into `(fill, remainder)` given what the bar can
    /// still absorb after `already_filled` earlier fills this pass.
    pub fn constrain(&self, desired: f64, bar_volume: f64, already_filled: f64) -> (f64, f64) {
        let available = (self.max_fill(bar_volume) - already_filled).max(0.0);
        if desired <= available {
            (desired, 0.0)
        } else {
            (available, desired - available)
        }
    }
}
