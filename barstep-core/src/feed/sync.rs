//! Clock synchronizer — aligns base feeds on one master clock.
//!
//! Each base source has a one-bar peek slot owned here and never exposed to
//! lines. A step:
//!
//! 1. refills empty peek slots;
//! 2. picks the earliest peeked timestamp as the step time;
//! 3. delivers that bar from every source peeking at it (others carry);
//! 4. folds delivered bars into resampled/replayed feeds;
//! 5. releases at most one queued resampled bar per feed.
//!
//! Historical sources are re-polled right after delivery so the aggregators
//! know whether the next bar leaves the current bucket. Live sources are not,
//! so their buckets close on the boundary or when the next bucket starts.
//! A replayed bucket closed that way gets a step of its own, stamped with the
//! previous step time, in which the slot is carried and marked closed. The
//! bar that started the next bucket is delivered on the following step.

use super::aggregate::{AggEvent, Aggregator, Mode, NextHint};
use super::bucket::Bucketing;
use super::{DataFeed, FeedPoll};
use crate::domain::{Bar, FeedId, TimeFrame};
use crate::line::SlotChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("feed '{feed}' went back in time: {next} after {previous}")]
    NonMonotonic {
        feed: String,
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("unknown feed {0}")]
    UnknownFeed(FeedId),

    #[error("invalid compression: {0}")]
    InvalidCompression(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedKind {
    Base,
    Resampled,
    Replayed,
}

/// Static description of a registered feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedInfo {
    pub id: FeedId,
    pub name: String,
    pub timeframe: TimeFrame,
    pub compression: u32,
    pub kind: FeedKind,
    /// Base feed this one is derived from (itself for base feeds).
    pub source: FeedId,
}

/// What happened to one feed on one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedUpdate {
    pub feed: FeedId,
    pub change: SlotChange,
    /// Bar now in the feed's current slot.
    pub bar: Option<Bar>,
    /// Bar orders on this feed match against this step: the new bar, or the
    /// delivered sub-bar for replayed feeds.
    pub match_bar: Option<Bar>,
    /// The current slot is closed and will not change again.
    pub closed: bool,
}

impl FeedUpdate {
    fn carried(feed: FeedId, bar: Option<Bar>, closed: bool) -> Self {
        Self {
            feed,
            change: SlotChange::Carried,
            bar,
            match_bar: None,
            closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    /// One entry per feed, indexed by `FeedId`.
    pub updates: Vec<FeedUpdate>,
}

impl StepSnapshot {
    pub fn update(&self, feed: FeedId) -> Option<&FeedUpdate> {
        self.updates.get(feed.0)
    }

    /// Per-clock slot changes, indexed by `FeedId`.
    pub fn changes(&self) -> Vec<SlotChange> {
        self.updates.iter().map(|u| u.change).collect()
    }

    pub fn advanced(&self, feed: FeedId) -> bool {
        self.update(feed)
            .is_some_and(|u| u.change != SlotChange::Carried)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Step(StepSnapshot),
    /// Live sources are pending and nothing else can move.
    NoData,
    /// Every source is exhausted and nothing is queued.
    Exhausted,
}

struct Source {
    feed: Box<dyn DataFeed>,
    feed_id: FeedId,
    peek: Option<Bar>,
    last_delivered: Option<DateTime<Utc>>,
    exhausted: bool,
    derived: Vec<FeedId>,
}

enum Refill {
    Peeked(DateTime<Utc>),
    Pending,
    Exhausted,
}

struct FeedSlot {
    info: FeedInfo,
    source: usize,
    aggregator: Option<Aggregator>,
    current: Option<Bar>,
    closed: bool,
    /// Replay slot closed without new data; reported on the next step.
    pending_close: bool,
    queued: VecDeque<Bar>,
}

#[derive(Default)]
pub struct Synchronizer {
    sources: Vec<Source>,
    feeds: Vec<FeedSlot>,
    step: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base feed.
    pub fn add_feed(&mut self, feed: Box<dyn DataFeed>) -> FeedId {
        let id = FeedId(self.feeds.len());
        let info = FeedInfo {
            id,
            name: feed.name().to_string(),
            timeframe: feed.timeframe(),
            compression: feed.compression().max(1),
            kind: FeedKind::Base,
            source: id,
        };
        debug!(feed = %info.name, timeframe = %info.timeframe, "feed registered");
        self.feeds.push(FeedSlot {
            info,
            source: self.sources.len(),
            aggregator: None,
            current: None,
            closed: false,
            pending_close: false,
            queued: VecDeque::new(),
        });
        self.sources.push(Source {
            feed,
            feed_id: id,
            peek: None,
            last_delivered: None,
            exhausted: false,
            derived: Vec::new(),
        });
        id
    }

    /// Derive a feed that exposes only closed `timeframe × compression` bars.
    pub fn add_resampled(
        &mut self,
        source: FeedId,
        timeframe: TimeFrame,
        compression: u32,
        name: Option<String>,
    ) -> Result<FeedId, SyncError> {
        self.add_derived(source, timeframe, compression, name, Mode::Resample)
    }

    /// Derive a feed that exposes the in-progress coarser bar on every
    /// source step.
    pub fn add_replayed(
        &mut self,
        source: FeedId,
        timeframe: TimeFrame,
        compression: u32,
        name: Option<String>,
    ) -> Result<FeedId, SyncError> {
        self.add_derived(source, timeframe, compression, name, Mode::Replay)
    }

    fn add_derived(
        &mut self,
        source: FeedId,
        timeframe: TimeFrame,
        compression: u32,
        name: Option<String>,
        mode: Mode,
    ) -> Result<FeedId, SyncError> {
        let base = self.feeds.get(source.0).ok_or(SyncError::UnknownFeed(source))?;
        if base.info.kind != FeedKind::Base {
            return Err(SyncError::InvalidCompression(format!(
                "'{}' is derived; derive from its base feed instead",
                base.info.name
            )));
        }
        let bucketing = Bucketing::new(timeframe, compression)?;
        let finer = (base.info.timeframe, base.info.compression);
        let counted = timeframe == TimeFrame::Ticks;
        if !counted && timeframe < finer.0 {
            return Err(SyncError::InvalidCompression(format!(
                "cannot derive {timeframe} from coarser feed '{}' ({})",
                base.info.name, finer.0
            )));
        }
        if !counted && timeframe == finer.0 && compression % finer.1 != 0 {
            return Err(SyncError::InvalidCompression(format!(
                "compression {compression} is not a multiple of {}",
                finer.1
            )));
        }

        let id = FeedId(self.feeds.len());
        let source_index = base.source;
        let name = name.unwrap_or_else(|| {
            format!("{}/{}{}", base.info.name, compression, timeframe.suffix())
        });
        let kind = match mode {
            Mode::Resample => FeedKind::Resampled,
            Mode::Replay => FeedKind::Replayed,
        };
        self.feeds.push(FeedSlot {
            info: FeedInfo {
                id,
                name,
                timeframe,
                compression,
                kind,
                source,
            },
            source: source_index,
            aggregator: Some(Aggregator::new(mode, bucketing, finer)),
            current: None,
            closed: false,
            pending_close: false,
            queued: VecDeque::new(),
        });
        self.sources[source_index].derived.push(id);
        Ok(id)
    }

    pub fn feeds(&self) -> impl Iterator<Item = &FeedInfo> {
        self.feeds.iter().map(|f| &f.info)
    }

    pub fn feed(&self, id: FeedId) -> Result<&FeedInfo, SyncError> {
        self.feeds
            .get(id.0)
            .map(|f| &f.info)
            .ok_or(SyncError::UnknownFeed(id))
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    pub fn find(&self, name: &str) -> Option<FeedId> {
        self.feeds
            .iter()
            .find(|f| f.info.name == name)
            .map(|f| f.info.id)
    }

    pub fn current_bar(&self, id: FeedId) -> Option<&Bar> {
        self.feeds.get(id.0)?.current.as_ref()
    }

    pub fn is_closed(&self, id: FeedId) -> bool {
        self.feeds.get(id.0).is_some_and(|f| f.closed)
    }

    /// Steps produced so far.
    pub fn steps(&self) -> usize {
        self.step
    }

    fn refill(&mut self, index: usize) -> Result<Refill, SyncError> {
        let source = &mut self.sources[index];
        match source.feed.poll() {
            FeedPoll::Bar(bar) => {
                if let Some(previous) = source.last_delivered {
                    if bar.timestamp <= previous {
                        return Err(SyncError::NonMonotonic {
                            feed: source.feed.name().to_string(),
                            previous,
                            next: bar.timestamp,
                        });
                    }
                }
                source.peek = Some(bar);
                Ok(Refill::Peeked(bar.timestamp))
            }
            FeedPoll::Pending => Ok(Refill::Pending),
            FeedPoll::Exhausted => {
                source.exhausted = true;
                Ok(Refill::Exhausted)
            }
        }
    }

    /// A source ended while its derived buckets were still open.
    fn flush_derived(&mut self, index: usize) {
        let derived = self.sources[index].derived.clone();
        for id in derived {
            let slot = &mut self.feeds[id.0];
            let Some(agg) = slot.aggregator.as_mut() else {
                continue;
            };
            match agg.flush() {
                Some(AggEvent::Closed(bar)) => slot.queued.push_back(bar),
                Some(AggEvent::CloseOpen) => slot.pending_close = true,
                _ => {}
            }
        }
    }

    /// Close live replay buckets that the bar about to be delivered at `ts`
    /// leaves behind.
    fn close_stale_replays(&mut self, ts: DateTime<Utc>) {
        for index in 0..self.sources.len() {
            let source = &self.sources[index];
            if !source.feed.is_live() || source.peek.map(|b| b.timestamp) != Some(ts) {
                continue;
            }
            for id in source.derived.clone() {
                let slot = &mut self.feeds[id.0];
                let Some(agg) = slot.aggregator.as_mut() else {
                    continue;
                };
                if agg.is_stale(ts) && agg.flush() == Some(AggEvent::CloseOpen) {
                    slot.pending_close = true;
                }
            }
        }
    }

    /// Produce the next step.
    pub fn advance(&mut self) -> Result<SyncOutcome, SyncError> {
        for index in 0..self.sources.len() {
            let source = &self.sources[index];
            if source.peek.is_none() && !source.exhausted {
                if let Refill::Exhausted = self.refill(index)? {
                    self.flush_derived(index);
                }
            }
        }

        let next = self
            .sources
            .iter()
            .filter_map(|s| s.peek.map(|b| b.timestamp))
            .min();
        if let Some(ts) = next {
            self.close_stale_replays(ts);
        }
        let closing = self.feeds.iter().any(|f| f.pending_close);
        let queued = self.feeds.iter().any(|f| !f.queued.is_empty());

        let timestamp = match (next, self.last_timestamp) {
            (Some(ts), _) if !closing => ts,
            (_, Some(last)) if closing || queued => last,
            (_, None) if closing || queued => self
                .feeds
                .iter()
                .filter_map(|f| f.queued.front().map(|b| b.timestamp))
                .chain(next)
                .min()
                .unwrap_or_default(),
            _ => {
                return Ok(if self.sources.iter().all(|s| s.exhausted) {
                    SyncOutcome::Exhausted
                } else {
                    SyncOutcome::NoData
                });
            }
        };

        let mut updates: Vec<FeedUpdate> = self
            .feeds
            .iter()
            .map(|f| FeedUpdate::carried(f.info.id, f.current, f.closed))
            .collect();

        if next.is_some() && !closing {
            for index in 0..self.sources.len() {
                if self.sources[index].peek.map(|b| b.timestamp) != Some(timestamp) {
                    continue;
                }
                self.deliver(index, &mut updates)?;
            }
        }

        for slot in &mut self.feeds {
            if updates[slot.info.id.0].change != SlotChange::Carried {
                continue;
            }
            if slot.pending_close {
                slot.pending_close = false;
                slot.closed = true;
                updates[slot.info.id.0].closed = true;
                continue;
            }
            if let Some(bar) = slot.queued.pop_front() {
                slot.current = Some(bar);
                slot.closed = true;
                updates[slot.info.id.0] = FeedUpdate {
                    feed: slot.info.id,
                    change: SlotChange::Appended,
                    bar: Some(bar),
                    match_bar: Some(bar),
                    closed: true,
                };
            }
        }

        let snapshot = StepSnapshot {
            step: self.step,
            timestamp,
            updates,
        };
        trace!(step = self.step, %timestamp, "synchronized step");
        self.step += 1;
        self.last_timestamp = Some(timestamp);
        Ok(SyncOutcome::Step(snapshot))
    }

    fn deliver(&mut self, index: usize, updates: &mut [FeedUpdate]) -> Result<(), SyncError> {
        let Some(bar) = self.sources[index].peek.take() else {
            return Ok(());
        };
        self.sources[index].last_delivered = Some(bar.timestamp);

        let hint = if self.sources[index].feed.is_live() {
            NextHint::Unknown
        } else {
            match self.refill(index)? {
                Refill::Peeked(ts) => NextHint::Peeked(ts),
                Refill::Exhausted => NextHint::Exhausted,
                Refill::Pending => NextHint::Unknown,
            }
        };

        let base = self.sources[index].feed_id;
        let slot = &mut self.feeds[base.0];
        slot.current = Some(bar);
        slot.closed = true;
        updates[base.0] = FeedUpdate {
            feed: base,
            change: SlotChange::Appended,
            bar: Some(bar),
            match_bar: Some(bar),
            closed: true,
        };

        let derived = self.sources[index].derived.clone();
        for id in derived {
            let slot = &mut self.feeds[id.0];
            let Some(agg) = slot.aggregator.as_mut() else {
                continue;
            };
            for event in agg.push(&bar, hint) {
                match event {
                    AggEvent::Closed(closed) => slot.queued.push_back(closed),
                    AggEvent::CloseOpen => slot.closed = true,
                    AggEvent::Opened { bar: open, closed } => {
                        slot.current = Some(open);
                        slot.closed = closed;
                        updates[id.0] = FeedUpdate {
                            feed: id,
                            change: SlotChange::Appended,
                            bar: Some(open),
                            match_bar: Some(bar),
                            closed,
                        };
                    }
                    AggEvent::Revised { bar: open, closed } => {
                        slot.current = Some(open);
                        slot.closed = closed;
                        updates[id.0] = FeedUpdate {
                            feed: id,
                            change: SlotChange::Updated,
                            bar: Some(open),
                            match_bar: Some(bar),
                            closed,
                        };
                    }
                }
            }
        }
        Ok(())
    }
}
