//! Data feeds and the clock synchronizer.
//!
//! A [`DataFeed`] is any time-ordered bar source. Historical feeds answer
//! immediately; live feeds may answer [`FeedPoll::Pending`]. The
//! [`Synchronizer`] owns every feed, aligns them on a master clock and
//! derives resampled or replayed feeds from finer sources.

mod aggregate;
mod bucket;
pub mod live;
pub mod sync;

pub use live::ChannelFeed;
pub use sync::{FeedInfo, FeedKind, FeedUpdate, StepSnapshot, SyncError, SyncOutcome, Synchronizer};

use crate::domain::{Bar, LineId, TimeFrame};
use std::sync::Arc;

/// Bars shared read-only between runs.
pub type SharedBars = Arc<[Bar]>;

/// Result of asking a feed for its next bar.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPoll {
    Bar(Bar),
    /// Nothing yet; ask again later.
    Pending,
    /// The feed will never produce another bar.
    Exhausted,
}

pub trait DataFeed: Send {
    fn name(&self) -> &str;

    fn timeframe(&self) -> TimeFrame;

    fn compression(&self) -> u32 {
        1
    }

    fn has_next(&self) -> bool;

    fn next_bar(&mut self) -> Option<Bar>;

    fn poll(&mut self) -> FeedPoll {
        if !self.has_next() {
            return FeedPoll::Exhausted;
        }
        match self.next_bar() {
            Some(bar) => FeedPoll::Bar(bar),
            None => FeedPoll::Exhausted,
        }
    }

    /// Live feeds are never polled ahead of time to look for bucket ends.
    fn is_live(&self) -> bool {
        false
    }
}

/// Historical feed over an in-memory bar slice.
#[derive(Debug, Clone)]
pub struct VecFeed {
    name: String,
    timeframe: TimeFrame,
    compression: u32,
    bars: SharedBars,
    cursor: usize,
}

impl VecFeed {
    pub fn new(name: impl Into<String>, timeframe: TimeFrame, bars: impl Into<SharedBars>) -> Self {
        Self {
            name: name.into(),
            timeframe,
            compression: 1,
            bars: bars.into(),
            cursor: 0,
        }
    }

    pub fn with_compression(mut self, compression: u32) -> Self {
        self.compression = compression;
        self
    }

    pub fn bars(&self) -> &SharedBars {
        &self.bars
    }
}

impl DataFeed for VecFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    fn compression(&self) -> u32 {
        self.compression
    }

    fn has_next(&self) -> bool {
        self.cursor < self.bars.len()
    }

    fn next_bar(&mut self) -> Option<Bar> {
        let bar = self.bars.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(bar)
    }
}

/// The seven raw lines every feed exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedLines {
    /// Bar close time as Unix seconds.
    pub datetime: LineId,
    pub open: LineId,
    pub high: LineId,
    pub low: LineId,
    pub close: LineId,
    pub volume: LineId,
    pub open_interest: LineId,
}

impl FeedLines {
    pub const NAMES: [&'static str; 7] = [
        "datetime",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "open_interest",
    ];

    pub fn all(&self) -> [LineId; 7] {
        [
            self.datetime,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.open_interest,
        ]
    }

    /// Line values for one bar, in [`FeedLines::all`] order.
    pub fn values(bar: &Bar) -> [f64; 7] {
        [
            bar.timestamp.timestamp() as f64,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.open_interest,
        ]
    }

    /// `[high, low, close, volume]`, the VWAP input shape.
    pub fn hlcv(&self) -> [LineId; 4] {
        [self.high, self.low, self.close, self.volume]
    }
}
