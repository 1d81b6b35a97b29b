//! Step context — what a strategy sees and may do during a callback.

use crate::broker::{Bracket, Broker, BrokerError};
use crate::domain::{Bar, FeedId, LineId, Order, OrderId, OrderRequest, OrderSide, Position};
use crate::feed::{FeedLines, Synchronizer};
use crate::line::{LineError, LineStore, LineView, Series};
use chrono::{DateTime, Utc};

/// Where in the step a callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before matching (cheat-on-open).
    Open,
    /// After matching.
    Step,
}

/// Step metadata handed to [`StepContext::new`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepInfo {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    /// First step on which orders submitted now may match.
    pub eligible_step: usize,
}

pub struct StepContext<'a> {
    info: StepInfo,
    store: &'a LineStore,
    sync: &'a Synchronizer,
    feeds: &'a [FeedLines],
    broker: &'a mut Broker,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        info: StepInfo,
        store: &'a LineStore,
        sync: &'a Synchronizer,
        feeds: &'a [FeedLines],
        broker: &'a mut Broker,
    ) -> Self {
        Self {
            info,
            store,
            sync,
            feeds,
            broker,
        }
    }

    pub fn step(&self) -> usize {
        self.info.step
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.info.timestamp
    }

    pub fn phase(&self) -> Phase {
        self.info.phase
    }

    // ── Lines ──

    /// Read-only view of a line. Reads fail with `NotReady` until the line
    /// has reached its minimum period.
    pub fn line(&self, id: LineId) -> Result<LineView<'_>, LineError> {
        self.store.view(id)
    }

    /// Value of line `id`, `ago` slots back (0 = current).
    pub fn get(&self, id: LineId, ago: isize) -> Result<f64, LineError> {
        self.store.view(id)?.get(ago)
    }

    pub fn is_ready(&self, id: LineId) -> bool {
        self.store.get(id).is_ok_and(|l| l.is_ready())
    }

    pub fn feed_lines(&self, feed: FeedId) -> Option<&FeedLines> {
        self.feeds.get(feed.0)
    }

    pub fn find_feed(&self, name: &str) -> Option<FeedId> {
        self.sync.find(name)
    }

    /// Instrument name orders use to target `feed`.
    pub fn feed_name(&self, feed: FeedId) -> Option<&str> {
        self.sync.feed(feed).ok().map(|info| info.name.as_str())
    }

    /// Bar currently exposed by `feed` (the in-progress bar for replayed feeds).
    pub fn bar(&self, feed: FeedId) -> Option<&Bar> {
        self.sync.current_bar(feed)
    }

    // ── Broker ──

    pub fn submit(&mut self, request: OrderRequest) -> Result<OrderId, BrokerError> {
        let StepInfo {
            step,
            timestamp,
            eligible_step,
            ..
        } = self.info;
        self.broker.submit(&request, step, timestamp, eligible_step)
    }

    pub fn buy(&mut self, instrument: &str, size: f64) -> Result<OrderId, BrokerError> {
        self.submit(OrderRequest::market(instrument, OrderSide::Buy, size))
    }

    pub fn sell(&mut self, instrument: &str, size: f64) -> Result<OrderId, BrokerError> {
        self.submit(OrderRequest::market(instrument, OrderSide::Sell, size))
    }

    pub fn submit_oco(&mut self, requests: &[OrderRequest]) -> Result<Vec<OrderId>, BrokerError> {
        let info = self.info;
        self.broker
            .submit_oco(requests, info.step, info.timestamp, info.eligible_step)
    }

    pub fn submit_bracket(
        &mut self,
        entry: OrderRequest,
        stop: OrderRequest,
        target: Option<OrderRequest>,
    ) -> Result<Bracket, BrokerError> {
        let info = self.info;
        self.broker.submit_bracket(
            &entry,
            &stop,
            target.as_ref(),
            info.step,
            info.timestamp,
            info.eligible_step,
        )
    }

    pub fn cancel(&mut self, id: OrderId) -> Result<(), BrokerError> {
        self.broker.cancel(id, self.info.step)
    }

    pub fn position(&self, instrument: &str) -> Position {
        self.broker.position(instrument)
    }

    pub fn cash(&self) -> f64 {
        self.broker.cash()
    }

    pub fn value(&self) -> f64 {
        self.broker.value()
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.broker.order(id)
    }
}
