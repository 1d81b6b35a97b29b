//! Folding finer sub-bars into coarser bars.

use super::bucket::Bucketing;
use crate::domain::{Bar, TimeFrame};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Expose only closed bars.
    Resample,
    /// Expose the in-progress bar on every sub-bar.
    Replay,
}

/// What the synchronizer knows about the source's next bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NextHint {
    Peeked(DateTime<Utc>),
    Exhausted,
    /// Live source: not polled ahead.
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AggEvent {
    /// Resample: a finished bar.
    Closed(Bar),
    /// Replay: a new slot opened with this in-progress bar.
    Opened { bar: Bar, closed: bool },
    /// Replay: the open slot was revised.
    Revised { bar: Bar, closed: bool },
    /// Replay: the open slot closed without new data for it.
    CloseOpen,
}

#[derive(Debug, Clone)]
struct OpenBucket {
    key: i64,
    bar: Bar,
    count: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Aggregator {
    mode: Mode,
    bucketing: Bucketing,
    /// Source and target share timeframe and compression.
    passthrough: bool,
    open: Option<OpenBucket>,
    next_tick_key: i64,
}

impl Aggregator {
    pub fn new(mode: Mode, bucketing: Bucketing, source: (TimeFrame, u32)) -> Self {
        Self {
            mode,
            passthrough: source == (bucketing.timeframe, bucketing.compression),
            bucketing,
            open: None,
            next_tick_key: 0,
        }
    }

    fn is_ticks(&self) -> bool {
        self.bucketing.timeframe == TimeFrame::Ticks
    }

    fn key_for(&mut self, ts: DateTime<Utc>) -> i64 {
        if self.is_ticks() {
            match &self.open {
                Some(open) => open.key,
                None => {
                    self.next_tick_key += 1;
                    self.next_tick_key
                }
            }
        } else {
            self.bucketing.key(ts)
        }
    }

    /// Fold one delivered sub-bar. Returns at most two events: the close of
    /// a stale bucket (live sources only) and this sub-bar's effect.
    pub fn push(&mut self, sub: &Bar, next: NextHint) -> Vec<AggEvent> {
        let mut events = Vec::with_capacity(2);
        let key = self.key_for(sub.timestamp);

        if self.open.as_ref().is_some_and(|open| open.key != key) {
            events.extend(self.flush());
        }

        let opened = match &mut self.open {
            Some(open) => {
                open.bar.absorb(sub);
                open.count += 1;
                open.bar.timestamp = self.bucketing.stamp(key, sub.timestamp);
                false
            }
            None => {
                let mut bar = *sub;
                bar.timestamp = self.bucketing.stamp(key, sub.timestamp);
                self.open = Some(OpenBucket { key, bar, count: 1 });
                true
            }
        };

        let closes = self.closes_after(sub, key, next);
        let Some(current) = self.open.as_ref().map(|open| open.bar) else {
            return events;
        };
        if closes {
            self.open = None;
        }
        match self.mode {
            Mode::Resample if closes => events.push(AggEvent::Closed(current)),
            Mode::Resample => {}
            Mode::Replay if opened => events.push(AggEvent::Opened {
                bar: current,
                closed: closes,
            }),
            Mode::Replay => events.push(AggEvent::Revised {
                bar: current,
                closed: closes,
            }),
        }
        events
    }

    fn closes_after(&self, sub: &Bar, key: i64, next: NextHint) -> bool {
        if self.passthrough {
            return true;
        }
        if self.is_ticks() {
            let full = self
                .open
                .as_ref()
                .is_some_and(|open| open.count >= self.bucketing.compression);
            return full || next == NextHint::Exhausted;
        }
        if self.bucketing.timeframe.is_intraday() && self.bucketing.on_boundary(sub.timestamp) {
            return true;
        }
        match next {
            NextHint::Exhausted => true,
            NextHint::Peeked(ts) => self.bucketing.key(ts) != key,
            NextHint::Unknown => false,
        }
    }

    /// A replayed bucket is open and a sub-bar stamped `ts` would start a
    /// new one. Only live sources get here: historical ones close the
    /// bucket when they peek past it.
    pub fn is_stale(&self, ts: DateTime<Utc>) -> bool {
        self.mode == Mode::Replay
            && !self.is_ticks()
            && self
                .open
                .as_ref()
                .is_some_and(|open| open.key != self.bucketing.key(ts))
    }

    /// Close whatever bucket is open (source ended or moved on).
    pub fn flush(&mut self) -> Option<AggEvent> {
        let open = self.open.take()?;
        Some(match self.mode {
            Mode::Resample => AggEvent::Closed(open.bar),
            Mode::Replay => AggEvent::CloseOpen,
        })
    }
}
