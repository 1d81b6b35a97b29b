//! TimeFrame — bar period units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of a feed's bar period. Combined with a compression factor
/// (e.g. `Minutes` × 5) it gives the bar span.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TimeFrame {
    Ticks,
    Seconds,
    Minutes,
    #[default]
    Days,
    Weeks,
    Months,
    Years,
}

impl TimeFrame {
    /// Timeframes bucketed by elapsed time rather than by calendar key.
    pub fn is_intraday(self) -> bool {
        matches!(self, TimeFrame::Seconds | TimeFrame::Minutes)
    }

    /// Length of one unit in seconds, for time-bucketed frames.
    pub fn unit_seconds(self) -> Option<i64> {
        match self {
            TimeFrame::Seconds => Some(1),
            TimeFrame::Minutes => Some(60),
            _ => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TimeFrame::Ticks => "t",
            TimeFrame::Seconds => "s",
            TimeFrame::Minutes => "m",
            TimeFrame::Days => "d",
            TimeFrame::Weeks => "w",
            TimeFrame::Months => "mo",
            TimeFrame::Years => "y",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeFrame::Ticks => "ticks",
            TimeFrame::Seconds => "seconds",
            TimeFrame::Minutes => "minutes",
            TimeFrame::Days => "days",
            TimeFrame::Weeks => "weeks",
            TimeFrame::Months => "months",
            TimeFrame::Years => "years",
        };
        f.write_str(name)
    }
}
