//! Engine — the synchronized bar-stepping loop.
//!
//! Per step:
//! 1. the synchronizer produces the next step (retrying while live feeds
//!    are pending);
//! 2. feed lines append or rewrite their current slot;
//! 3. the graph recomputes every node in topological order;
//! 4. with cheat-on-open, the strategy's `on_open` runs before matching
//!    (it already sees step 3's values, which include the bar's close);
//! 5. the broker matches working orders against this step's bars;
//! 6. the strategy's `on_step` (or `on_prenext`) runs;
//! 7. with cheat-on-close, orders from step 6 match against the close;
//! 8. analyzers observe the finished step.

pub mod config;
pub mod context;
pub mod error;
pub mod state;
pub mod strategy;

pub use config::EngineConfig;
pub use context::{Phase, StepContext};
pub use error::{BuildError, EngineError, FatalError};
pub use state::{CancelToken, RunResult, RunState, StepStatus};
pub use strategy::{Strategy, StrategyError};

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::broker::Broker;
use crate::domain::{Bar, FeedId, TimeFrame};
use crate::feed::{
    DataFeed, FeedLines, FeedUpdate, StepSnapshot, SyncError, SyncOutcome, Synchronizer,
};
use crate::graph::{Graph, GraphBuilder};
use crate::line::{LineStore, SlotChange};
use context::StepInfo;
use tracing::{debug, error, info};

/// Registers feeds, indicators and analyzers, then freezes them into an
/// [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    sync: Synchronizer,
    graph: GraphBuilder,
    feeds: Vec<FeedLines>,
    analyzers: Vec<Box<dyn Analyzer>>,
    cancel: CancelToken,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sync: Synchronizer::new(),
            graph: GraphBuilder::new(),
            feeds: Vec::new(),
            analyzers: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Register a base feed and its seven raw lines.
    pub fn add_feed(&mut self, feed: impl DataFeed + 'static) -> FeedId {
        let name = feed.name().to_string();
        let id = self.sync.add_feed(Box::new(feed));
        self.register_lines(id, &name);
        id
    }

    /// Derive a feed exposing closed `timeframe × compression` bars of `source`.
    pub fn resample(
        &mut self,
        source: FeedId,
        timeframe: TimeFrame,
        compression: u32,
    ) -> Result<FeedId, SyncError> {
        let id = self.sync.add_resampled(source, timeframe, compression, None)?;
        let name = self.sync.feed(id)?.name.clone();
        self.register_lines(id, &name);
        Ok(id)
    }

    /// Derive a feed exposing the in-progress coarser bar on every step of
    /// `source`.
    pub fn replay(
        &mut self,
        source: FeedId,
        timeframe: TimeFrame,
        compression: u32,
    ) -> Result<FeedId, SyncError> {
        let id = self.sync.add_replayed(source, timeframe, compression, None)?;
        let name = self.sync.feed(id)?.name.clone();
        self.register_lines(id, &name);
        Ok(id)
    }

    pub fn lines(&self, feed: FeedId) -> Option<&FeedLines> {
        self.feeds.get(feed.0)
    }

    /// Graph under construction; declare indicator nodes here.
    pub fn graph(&mut self) -> &mut GraphBuilder {
        &mut self.graph
    }

    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) {
        self.analyzers.push(analyzer);
    }

    /// Stop on an externally owned token, e.g. one shared by a whole sweep.
    pub fn cancel_with(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    pub fn build<S: Strategy>(self, strategy: S) -> Result<Engine<S>, BuildError> {
        self.config.broker.validate()?;
        let (graph, store) = self.graph.build()?;
        Ok(Engine {
            broker: Broker::new(self.config.broker.clone()),
            config: self.config,
            sync: self.sync,
            graph,
            store,
            feeds: self.feeds,
            strategy,
            analyzers: self.analyzers,
            state: RunState::NotStarted,
            cancel: self.cancel,
            steps: 0,
            cancelled: false,
        })
    }

    fn register_lines(&mut self, feed: FeedId, name: &str) {
        let store = self.graph.store_mut();
        let [datetime, open, high, low, close, volume, open_interest] =
            FeedLines::NAMES.map(|line| store.add(format!("{name}.{line}"), feed, 1));
        self.feeds.push(FeedLines {
            datetime,
            open,
            high,
            low,
            close,
            volume,
            open_interest,
        });
    }
}

pub struct Engine<S: Strategy> {
    config: EngineConfig,
    sync: Synchronizer,
    graph: Graph,
    store: LineStore,
    /// Raw lines per feed, indexed by `FeedId`.
    feeds: Vec<FeedLines>,
    broker: Broker,
    strategy: S,
    analyzers: Vec<Box<dyn Analyzer>>,
    state: RunState,
    cancel: CancelToken,
    steps: usize,
    cancelled: bool,
}

impl<S: Strategy> Engine<S> {
    /// Run to completion, cancellation, or the first fatal error.
    pub fn run(&mut self) -> Result<RunResult, EngineError> {
        if self.state != RunState::NotStarted {
            return Err(EngineError::AlreadyRun);
        }
        self.start()?;
        loop {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                self.finish()?;
                break;
            }
            match self.step()? {
                StepStatus::Advanced(_) => {}
                StepStatus::Interrupted => {
                    self.cancelled = true;
                    self.finish()?;
                    break;
                }
                StepStatus::Exhausted => break,
            }
        }
        Ok(self.result())
    }

    /// Execute exactly one step. Starts the run on first use and finishes
    /// it once every feed is exhausted.
    pub fn step(&mut self) -> Result<StepStatus, EngineError> {
        match self.state {
            RunState::NotStarted => self.start()?,
            RunState::Running => {}
            RunState::Finished => return Ok(StepStatus::Exhausted),
            RunState::Aborted => return Err(EngineError::AlreadyRun),
        }
        let step = self.sync.steps();
        match self.try_step() {
            Ok(StepStatus::Exhausted) => {
                self.finish()?;
                Ok(StepStatus::Exhausted)
            }
            Ok(status) => Ok(status),
            Err(err) => Err(self.abort(step, err)),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn store(&self) -> &LineStore {
        &self.store
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn lines(&self, feed: FeedId) -> Option<&FeedLines> {
        self.feeds.get(feed.0)
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Current state of the run as a result. Complete once the run finished.
    pub fn result(&self) -> RunResult {
        RunResult {
            steps: self.steps,
            final_cash: self.broker.cash(),
            final_value: self.broker.value(),
            positions: self.broker.positions().cloned().collect(),
            orders: self.broker.orders().cloned().collect(),
            fills: self.broker.fills().to_vec(),
            trades: self.broker.closed_trades().to_vec(),
            open_trades: self.broker.open_trades().cloned().collect(),
            run_log: self.broker.run_log().to_vec(),
            analyses: self
                .analyzers
                .iter()
                .map(|a| (a.name().to_string(), a.report()))
                .collect(),
            cancelled: self.cancelled,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    fn start(&mut self) -> Result<(), EngineError> {
        info!(
            feeds = self.sync.feed_count(),
            nodes = self.graph.len(),
            cash = self.broker.cash(),
            "run started"
        );
        self.state = RunState::Running;
        self.strategy
            .on_start()
            .map_err(|err| self.abort(0, err.into()))
    }

    fn finish(&mut self) -> Result<(), EngineError> {
        if self.state == RunState::Finished {
            return Ok(());
        }
        let step = self.steps;
        self.strategy
            .on_finish()
            .map_err(|err| self.abort(step, err.into()))?;
        self.state = RunState::Finished;
        info!(
            steps = self.steps,
            value = self.broker.value(),
            cancelled = self.cancelled,
            "run finished"
        );
        Ok(())
    }

    fn abort(&mut self, step: usize, source: FatalError) -> EngineError {
        error!(step, error = %source, "run aborted");
        self.state = RunState::Aborted;
        EngineError::Aborted { step, source }
    }

    // ── Step ───────────────────────────────────────────────────────────

    fn try_step(&mut self) -> Result<StepStatus, FatalError> {
        let snapshot = match self.next_snapshot()? {
            SyncOutcome::Step(snapshot) => snapshot,
            SyncOutcome::Exhausted => return Ok(StepStatus::Exhausted),
            SyncOutcome::NoData => return Ok(StepStatus::Interrupted),
        };
        let (step, at) = (snapshot.step, snapshot.timestamp);
        let cheat_on_open = self.config.broker.cheat_on_open;
        let cheat_on_close = self.config.broker.cheat_on_close;

        self.write_feed_lines(&snapshot)?;
        self.graph.recompute(&mut self.store, &snapshot.changes())?;

        if cheat_on_open {
            let info = StepInfo {
                step,
                timestamp: at,
                phase: Phase::Open,
                eligible_step: step,
            };
            self.call_strategy(info, |s, ctx| s.on_open(ctx))?;
            self.dispatch()?;
        }

        let match_bars = self.bars(&snapshot, |u| u.match_bar);
        self.broker.process(step, at, &match_bars)?;
        let exposed = self.bars(&snapshot, |u| u.bar);
        self.broker.update_marks(&exposed);
        self.dispatch()?;

        let info = StepInfo {
            step,
            timestamp: at,
            phase: Phase::Step,
            eligible_step: if cheat_on_close { step } else { step + 1 },
        };
        if self.watched_ready() {
            self.call_strategy(info, |s, ctx| s.on_step(ctx))?;
        } else {
            self.call_strategy(info, |s, ctx| s.on_prenext(ctx))?;
        }
        self.dispatch()?;

        if cheat_on_close {
            self.broker.process_close(step, at, &match_bars)?;
            self.dispatch()?;
        }

        let ctx = AnalyzerContext::new(step, at, &self.broker, &exposed);
        for analyzer in &mut self.analyzers {
            analyzer.on_step(&ctx);
        }

        self.steps = step + 1;
        debug!(step, %at, "step complete");
        Ok(StepStatus::Advanced(step))
    }

    /// Advance the synchronizer, polling again while live feeds are pending.
    /// `NoData` is only returned when cancellation interrupts the wait.
    fn next_snapshot(&mut self) -> Result<SyncOutcome, FatalError> {
        let mut retries = 0;
        loop {
            match self.sync.advance()? {
                SyncOutcome::NoData => {
                    if self.cancel.is_cancelled() {
                        return Ok(SyncOutcome::NoData);
                    }
                    if retries >= self.config.max_data_retries {
                        return Err(FatalError::DataUnavailable { retries });
                    }
                    retries += 1;
                    debug!(retries, "no data, waiting");
                    std::thread::sleep(self.config.poll_interval());
                }
                outcome => return Ok(outcome),
            }
        }
    }

    fn write_feed_lines(&mut self, snapshot: &StepSnapshot) -> Result<(), FatalError> {
        for update in &snapshot.updates {
            if update.change == SlotChange::Carried {
                continue;
            }
            let (Some(lines), Some(bar)) = (self.feeds.get(update.feed.0), update.bar) else {
                continue;
            };
            for (id, value) in lines.all().into_iter().zip(FeedLines::values(&bar)) {
                let line = self.store.get_mut(id)?;
                if update.change == SlotChange::Updated {
                    line.overwrite(value)?;
                } else {
                    line.append(value);
                }
            }
        }
        Ok(())
    }

    /// `(instrument, bar)` pairs picked from the snapshot, keyed by feed name.
    fn bars(&self, snapshot: &StepSnapshot, pick: impl Fn(&FeedUpdate) -> Option<Bar>) -> Vec<(String, Bar)> {
        snapshot
            .updates
            .iter()
            .filter_map(|update| {
                let bar = pick(update)?;
                let info = self.sync.feed(update.feed).ok()?;
                Some((info.name.clone(), bar))
            })
            .collect()
    }

    fn watched_ready(&self) -> bool {
        self.strategy
            .watched_lines()
            .iter()
            .all(|&id| self.store.get(id).is_ok_and(|line| line.is_ready()))
    }

    fn call_strategy<F>(&mut self, info: StepInfo, callback: F) -> Result<(), FatalError>
    where
        F: FnOnce(&mut S, &mut StepContext<'_>) -> Result<(), StrategyError>,
    {
        let mut ctx = StepContext::new(info, &self.store, &self.sync, &self.feeds, &mut self.broker);
        callback(&mut self.strategy, &mut ctx)?;
        Ok(())
    }

    /// Deliver queued order and trade notifications.
    fn dispatch(&mut self) -> Result<(), FatalError> {
        for order in self.broker.take_notifications() {
            for analyzer in &mut self.analyzers {
                analyzer.on_order(&order);
            }
            self.strategy.on_order(&order)?;
        }
        for trade in self.broker.take_trade_events() {
            for analyzer in &mut self.analyzers {
                analyzer.on_trade(&trade);
            }
            self.strategy.on_trade(&trade)?;
        }
        Ok(())
    }
}
