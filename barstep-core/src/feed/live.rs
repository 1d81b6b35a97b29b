//! Live feed over a crossbeam channel.
//!
//! A producer thread pushes bars into the sender half; the engine polls the
//! receiver with a timeout. A timeout is `Pending`, not an error; a dropped
//! sender ends the feed.

use super::{DataFeed, FeedPoll};
use crate::domain::{Bar, TimeFrame};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

pub struct ChannelFeed {
    name: String,
    timeframe: TimeFrame,
    compression: u32,
    receiver: Receiver<Bar>,
    timeout: Duration,
    disconnected: bool,
}

impl ChannelFeed {
    pub fn new(
        name: impl Into<String>,
        timeframe: TimeFrame,
        receiver: Receiver<Bar>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            timeframe,
            compression: 1,
            receiver,
            timeout,
            disconnected: false,
        }
    }

    /// Unbounded channel plus a feed reading from it.
    pub fn channel(
        name: impl Into<String>,
        timeframe: TimeFrame,
        timeout: Duration,
    ) -> (Sender<Bar>, Self) {
        let (tx, rx) = channel::unbounded();
        (tx, Self::new(name, timeframe, rx, timeout))
    }

    pub fn with_compression(mut self, compression: u32) -> Self {
        self.compression = compression;
        self
    }
}

impl DataFeed for ChannelFeed {
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
        !self.disconnected
    }

    fn next_bar(&mut self) -> Option<Bar> {
        match self.receiver.try_recv() {
            Ok(bar) => Some(bar),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.disconnected = true;
                None
            }
        }
    }

    fn poll(&mut self) -> FeedPoll {
        if self.disconnected {
            return FeedPoll::Exhausted;
        }
        match self.receiver.recv_timeout(self.timeout) {
            Ok(bar) => FeedPoll::Bar(bar),
            Err(RecvTimeoutError::Timeout) => FeedPoll::Pending,
            Err(RecvTimeoutError::Disconnected) => {
                self.disconnected = true;
                FeedPoll::Exhausted
            }
        }
    }

    fn is_live(&self) -> bool {
        true
    }
}
