//! End-to-end scenarios through the engine loop.
//!
//! Each test wires feeds, indicator nodes and a small strategy into an
//! `Engine` and checks what the run produced: order states, fill prices and
//! steps, line readiness, and how fatal conditions stop the run.

use barstep_core::analyzer::{EquityRecorder, OrderCounter, TradeList, TradeMetrics};
use barstep_core::broker::{BrokerConfig, BrokerError, LiquidityPolicy, RemainderPolicy};
use barstep_core::domain::{
    Bar, LineId, Order, OrderId, OrderRequest, OrderSide, OrderStatus, TimeFrame,
};
use barstep_core::engine::{
    BuildError, CancelToken, EngineBuilder, EngineConfig, EngineError, FatalError, RunState,
    StepContext, Strategy, StrategyError,
};
use barstep_core::feed::VecFeed;
use barstep_core::graph::{GraphError, Operation};
use barstep_core::indicators;
use barstep_core::line::LineError;
use chrono::{DateTime, Duration, TimeZone, Utc};

// ── Helpers ──────────────────────────────────────────────────────────

fn day(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + Duration::days(i)
}

fn ohlc(rows: &[[f64; 4]]) -> Vec<Bar> {
    ohlcv(&rows.iter().map(|r| (*r, 1_000.0)).collect::<Vec<_>>())
}

fn ohlcv(rows: &[([f64; 4], f64)]) -> Vec<Bar> {
    rows.iter()
        .enumerate()
        .map(|(i, ([o, h, l, c], v))| Bar::new(day(i as i64), *o, *h, *l, *c, *v))
        .collect()
}

fn closes(values: &[f64]) -> Vec<Bar> {
    values
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new(day(i as i64), c, c + 1.0, c - 1.0, c, 1_000.0))
        .collect()
}

fn config(broker: BrokerConfig) -> EngineConfig {
    EngineConfig::with_broker(broker)
}

/// Submits a fixed list of requests on chosen steps and records every
/// order notification.
#[derive(Default)]
struct Scripted {
    plan: Vec<(usize, OrderRequest)>,
    submitted: Vec<OrderId>,
    notifications: Vec<Order>,
}

impl Scripted {
    fn new(plan: Vec<(usize, OrderRequest)>) -> Self {
        Self {
            plan,
            ..Self::default()
        }
    }
}

impl Strategy for Scripted {
    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        let step = ctx.step();
        for (_, request) in self.plan.iter().filter(|(s, _)| *s == step) {
            self.submitted.push(ctx.submit(request.clone())?);
        }
        Ok(())
    }

    fn on_order(&mut self, order: &Order) -> Result<(), StrategyError> {
        self.notifications.push(order.clone());
        Ok(())
    }
}

// ── Order timing ─────────────────────────────────────────────────────

#[test]
fn limit_buy_fills_on_next_bar_at_limit() {
    let mut builder = EngineBuilder::new(EngineConfig::default());
    builder.add_feed(VecFeed::new(
        "X",
        TimeFrame::Days,
        ohlc(&[[10.0, 12.0, 9.0, 11.0], [11.0, 11.0, 8.0, 9.0], [9.0, 10.0, 8.0, 9.5]]),
    ));
    let plan = vec![(0, OrderRequest::limit("X", OrderSide::Buy, 1.0, 9.5))];
    let mut engine = builder.build(Scripted::new(plan)).unwrap();
    let result = engine.run().unwrap();

    let order = &result.orders[0];
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.avg_fill_price, 9.5);
    assert_eq!(result.fills.len(), 1);
    assert_eq!(result.fills[0].step, 1);
}

#[test]
fn market_sell_fills_next_open_by_default() {
    let bars = ohlc(&[[10.0, 11.0, 9.0, 10.5], [12.0, 13.0, 11.0, 12.5]]);
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        leverage: 2.0,
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, bars));
    let plan = vec![(0, OrderRequest::market("X", OrderSide::Sell, 5.0))];
    let result = builder.build(Scripted::new(plan)).unwrap().run().unwrap();

    assert_eq!(result.fills[0].step, 1);
    assert_eq!(result.fills[0].price, 12.0);
}

#[test]
fn market_sell_fills_same_close_with_cheat_on_close() {
    let bars = ohlc(&[[10.0, 11.0, 9.0, 10.5], [12.0, 13.0, 11.0, 12.5]]);
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        leverage: 2.0,
        cheat_on_close: true,
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, bars));
    let plan = vec![(0, OrderRequest::market("X", OrderSide::Sell, 5.0))];
    let result = builder.build(Scripted::new(plan)).unwrap().run().unwrap();

    assert_eq!(result.fills[0].step, 0);
    assert_eq!(result.fills[0].price, 10.5);
}

struct OpenBuyer;

impl Strategy for OpenBuyer {
    fn on_open(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        if ctx.step() == 1 {
            ctx.buy("X", 1.0)?;
        }
        Ok(())
    }

    fn on_step(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

#[test]
fn cheat_on_open_fills_on_same_bar_open() {
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        cheat_on_open: true,
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new(
        "X",
        TimeFrame::Days,
        ohlc(&[[10.0, 11.0, 9.0, 10.0], [20.0, 21.0, 19.0, 20.0], [30.0, 31.0, 29.0, 30.0]]),
    ));
    let result = builder.build(OpenBuyer).unwrap().run().unwrap();
    assert_eq!(result.fills[0].step, 1);
    assert_eq!(result.fills[0].price, 20.0);
}

struct OpenReader {
    seen: Vec<(f64, f64)>,
}

impl Strategy for OpenReader {
    fn on_open(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        let Some(feed) = ctx.find_feed("X") else {
            return Ok(());
        };
        let Some(lines) = ctx.feed_lines(feed).copied() else {
            return Ok(());
        };
        let close = ctx.get(lines.close, 0)?;
        let open = ctx.get(lines.open, 0)?;
        self.seen.push((open, close));
        Ok(())
    }

    fn on_step(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

#[test]
fn on_open_already_sees_the_current_close() {
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        cheat_on_open: true,
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new(
        "X",
        TimeFrame::Days,
        ohlc(&[[10.0, 11.0, 9.0, 10.5], [20.0, 21.0, 19.0, 20.5]]),
    ));
    let mut engine = builder.build(OpenReader { seen: Vec::new() }).unwrap();
    engine.run().unwrap();
    assert_eq!(engine.strategy().seen, vec![(10.0, 10.5), (20.0, 20.5)]);
}

// ── Partial fills ────────────────────────────────────────────────────

#[test]
fn partial_fill_carries_remainder_to_next_bar() {
    let bars = ohlcv(&[
        ([10.0, 10.0, 10.0, 10.0], 1_000.0),
        ([10.0, 10.0, 10.0, 10.0], 100.0),
        ([10.0, 10.0, 10.0, 10.0], 1_000.0),
    ]);
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        liquidity: Some(LiquidityPolicy::new(0.4, RemainderPolicy::Carry)),
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, bars));
    let plan = vec![(0, OrderRequest::market("X", OrderSide::Buy, 100.0))];
    let mut engine = builder.build(Scripted::new(plan)).unwrap();
    let result = engine.run().unwrap();

    let partial = engine
        .strategy()
        .notifications
        .iter()
        .find(|o| o.status == OrderStatus::Partial)
        .expect("partial notification");
    assert_eq!(partial.filled, 40.0);
    assert_eq!(partial.remaining(), 60.0);

    let sizes: Vec<(usize, f64)> = result.fills.iter().map(|f| (f.step, f.size)).collect();
    assert_eq!(sizes, vec![(1, 40.0), (2, 60.0)]);
    assert_eq!(result.orders[0].status, OrderStatus::Completed);
}

#[test]
fn close_pass_shares_the_bar_volume_cap() {
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        liquidity: Some(LiquidityPolicy::new(0.1, RemainderPolicy::Carry)),
        cheat_on_close: true,
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, closes(&[10.0, 10.0, 10.0])));
    let plan = vec![
        (0, OrderRequest::market("X", OrderSide::Buy, 150.0)),
        (1, OrderRequest::market("X", OrderSide::Buy, 80.0)),
    ];
    let result = builder.build(Scripted::new(plan)).unwrap().run().unwrap();

    // Step 1: the carried 50 fills in the regular pass, leaving only 50 of
    // the 100-unit cap for the order matched at the close.
    let sizes: Vec<(usize, f64)> = result.fills.iter().map(|f| (f.step, f.size)).collect();
    assert_eq!(sizes, vec![(0, 100.0), (1, 50.0), (1, 50.0), (2, 30.0)]);
    for step in 0..3 {
        let taken: f64 = result.fills.iter().filter(|f| f.step == step).map(|f| f.size).sum();
        assert!(taken <= 100.0, "step {step} took {taken}");
    }
}

// ── Groups ───────────────────────────────────────────────────────────

struct OcoPair {
    ids: Vec<OrderId>,
}

impl Strategy for OcoPair {
    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        if ctx.step() == 0 {
            self.ids = ctx.submit_oco(&[
                OrderRequest::limit("X", OrderSide::Buy, 1.0, 95.0),
                OrderRequest::stop("X", OrderSide::Buy, 1.0, 105.0),
            ])?;
        }
        Ok(())
    }
}

#[test]
fn oco_fill_cancels_sibling() {
    let mut builder = EngineBuilder::new(EngineConfig::default());
    builder.add_feed(VecFeed::new(
        "X",
        TimeFrame::Days,
        ohlc(&[
            [100.0, 101.0, 99.0, 100.0],
            [100.0, 101.0, 94.0, 96.0],
            [96.0, 110.0, 95.5, 108.0],
        ]),
    ));
    let mut engine = builder.build(OcoPair { ids: Vec::new() }).unwrap();
    engine.run().unwrap();

    let ids = &engine.strategy().ids;
    let broker = engine.broker();
    assert_eq!(broker.order(ids[0]).unwrap().status, OrderStatus::Completed);
    assert_eq!(broker.order(ids[1]).unwrap().status, OrderStatus::Canceled);
    assert_eq!(broker.fills().len(), 1);
}

struct BracketBuyer;

impl Strategy for BracketBuyer {
    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        if ctx.step() == 0 {
            ctx.submit_bracket(
                OrderRequest::market("X", OrderSide::Buy, 10.0),
                OrderRequest::stop("X", OrderSide::Sell, 10.0, 95.0),
                Some(OrderRequest::limit("X", OrderSide::Sell, 10.0, 110.0)),
            )?;
        }
        Ok(())
    }
}

#[test]
fn bracket_stop_closes_trade_and_cancels_target() {
    let mut builder = EngineBuilder::new(EngineConfig::default());
    builder.add_feed(VecFeed::new(
        "X",
        TimeFrame::Days,
        ohlc(&[
            [100.0, 101.0, 99.0, 100.0],
            [100.0, 102.0, 98.0, 101.0],
            [101.0, 102.0, 93.0, 94.0],
        ]),
    ));
    builder.add_analyzer(Box::new(TradeList::new()));
    builder.add_analyzer(Box::new(OrderCounter::new()));
    let result = builder.build(BracketBuyer).unwrap().run().unwrap();

    let statuses: Vec<OrderStatus> = result.orders.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![OrderStatus::Completed, OrderStatus::Completed, OrderStatus::Canceled]
    );
    assert_eq!(result.fills[1].price, 95.0);
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].gross_pnl, -50.0);
    assert_eq!(result.analyses["trades"]["count"], 1);
    assert_eq!(result.analyses["orders"]["Canceled"], 1);
}

// ── Lines ────────────────────────────────────────────────────────────

#[derive(Default)]
struct SmaProbe {
    sma: Option<LineId>,
    seen: Vec<Result<f64, LineError>>,
}

impl Strategy for SmaProbe {
    fn on_prenext(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        self.on_step(ctx)
    }

    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        if let Some(id) = self.sma {
            self.seen.push(ctx.get(id, 0));
        }
        Ok(())
    }
}

#[test]
fn two_period_sma_readiness_and_values() {
    let mut builder = EngineBuilder::new(EngineConfig::default());
    let feed = builder.add_feed(VecFeed::new("X", TimeFrame::Days, closes(&[11.0, 9.0, 9.5])));
    let close = builder.lines(feed).unwrap().close;
    let sma = indicators::sma(builder.graph(), close, 2).unwrap();
    let mut engine = builder
        .build(SmaProbe {
            sma: Some(sma),
            ..SmaProbe::default()
        })
        .unwrap();
    engine.run().unwrap();

    let seen = &engine.strategy().seen;
    assert!(matches!(seen[0], Err(LineError::NotReady { .. })));
    assert_eq!(seen[1], Ok(10.0));
    assert_eq!(seen[2], Ok(9.25));
}

struct Peeker {
    close: LineId,
}

impl Strategy for Peeker {
    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        ctx.get(self.close, 1)?;
        Ok(())
    }
}

#[test]
fn look_ahead_read_aborts_with_out_of_range() {
    let mut builder = EngineBuilder::new(EngineConfig::default());
    let feed = builder.add_feed(VecFeed::new("X", TimeFrame::Days, closes(&[1.0, 2.0, 3.0])));
    let close = builder.lines(feed).unwrap().close;
    let mut engine = builder.build(Peeker { close }).unwrap();

    let err = engine.run().unwrap_err();
    assert_eq!(err.step(), Some(0));
    assert!(matches!(
        err,
        EngineError::Aborted {
            source: FatalError::OutOfRange(LineError::OutOfRange { ago: 1, .. }),
            ..
        }
    ));
    assert_eq!(engine.state(), RunState::Aborted);
    assert!(matches!(engine.step(), Err(EngineError::AlreadyRun)));
}

// ── Fatal conditions ─────────────────────────────────────────────────

#[test]
fn division_by_zero_aborts_at_offending_step() {
    let bars = ohlcv(&[
        ([10.0, 10.0, 10.0, 10.0], 100.0),
        ([10.0, 10.0, 10.0, 10.0], 50.0),
        ([10.0, 10.0, 10.0, 10.0], 0.0),
        ([10.0, 10.0, 10.0, 10.0], 10.0),
    ]);
    let mut builder = EngineBuilder::new(EngineConfig::default());
    let feed = builder.add_feed(VecFeed::new("X", TimeFrame::Days, bars));
    let lines = *builder.lines(feed).unwrap();
    builder
        .graph()
        .add(Operation::Div, &[lines.close, lines.volume])
        .unwrap();
    let mut engine = builder.build(Scripted::default()).unwrap();

    let err = engine.run().unwrap_err();
    assert_eq!(err.step(), Some(2));
    assert!(matches!(
        err,
        EngineError::Aborted {
            source: FatalError::Computation(GraphError::Computation { .. }),
            ..
        }
    ));
    // The last completed step is the final consistent state.
    assert_eq!(engine.result().steps, 2);
}

#[test]
fn covering_short_into_rally_without_leverage_aborts() {
    let bars = ohlc(&[
        [100.0, 101.0, 99.0, 100.0],
        [100.0, 101.0, 99.0, 100.0],
        [300.0, 301.0, 299.0, 300.0],
        [300.0, 301.0, 299.0, 300.0],
    ]);
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        starting_cash: 1_000.0,
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, bars));
    let plan = vec![
        (0, OrderRequest::market("X", OrderSide::Sell, 10.0)),
        (2, OrderRequest::market("X", OrderSide::Buy, 10.0)),
    ];
    let mut engine = builder.build(Scripted::new(plan)).unwrap();

    let err = engine.run().unwrap_err();
    assert_eq!(err.step(), Some(3));
    assert!(matches!(
        err,
        EngineError::Aborted {
            source: FatalError::Broker(BrokerError::NegativeCash { cash }),
            ..
        } if (cash + 1_000.0).abs() < 1e-9
    ));
    assert_eq!(engine.state(), RunState::Aborted);
    // Both fills are recorded; the cover at 300 is what drove cash negative.
    let result = engine.result();
    assert_eq!(result.steps, 3);
    assert_eq!(result.fills.len(), 2);
    assert_eq!(result.fills[0].price, 100.0);
    assert_eq!(result.fills[1].price, 300.0);
}

#[test]
fn unusable_broker_config_fails_to_build() {
    let mut builder = EngineBuilder::new(config(BrokerConfig {
        leverage: 0.0,
        ..BrokerConfig::default()
    }));
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, closes(&[1.0])));
    assert!(matches!(
        builder.build(Scripted::default()),
        Err(BuildError::Broker(BrokerError::InvalidConfig(_)))
    ));
}

// ── Cancellation and analyzers ───────────────────────────────────────

struct CancelAfter {
    at: usize,
    token: CancelToken,
}

impl Strategy for CancelAfter {
    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        if ctx.step() == self.at {
            self.token.cancel();
        }
        Ok(())
    }
}

#[test]
fn trade_metrics_reports_excursion_while_held() {
    let bars = ohlc(&[
        [100.0, 101.0, 99.0, 100.0],
        [100.0, 108.0, 97.0, 105.0],
        [105.0, 106.0, 96.0, 100.0],
        [101.0, 130.0, 80.0, 101.0],
    ]);
    let mut builder = EngineBuilder::new(EngineConfig::default());
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, bars));
    builder.add_analyzer(Box::new(TradeMetrics::new()));
    let plan = vec![
        (0, OrderRequest::market("X", OrderSide::Buy, 10.0)),
        (2, OrderRequest::market("X", OrderSide::Sell, 10.0)),
    ];
    let result = builder.build(Scripted::new(plan)).unwrap().run().unwrap();

    let report = &result.analyses["trade_metrics"];
    assert_eq!(report["count"], 1);
    let trade = &report["trades"][0];
    assert_eq!(trade["entry_price"], 100.0);
    assert_eq!(trade["exit_price"], 101.0);
    // The exit bar's range is not part of the trade.
    assert_eq!(trade["max_up_price"], 108.0);
    assert_eq!(trade["max_down_price"], 96.0);
    assert_eq!(trade["mfe"], 80.0);
    assert_eq!(trade["mae"], 40.0);
}

#[test]
fn cancellation_stops_between_steps() {
    let token = CancelToken::new();
    let mut builder = EngineBuilder::new(EngineConfig::default());
    builder.add_feed(VecFeed::new("X", TimeFrame::Days, closes(&[1.0, 2.0, 3.0, 4.0, 5.0])));
    builder.add_analyzer(Box::new(EquityRecorder::new()));
    builder.cancel_with(token.clone());
    let mut engine = builder
        .build(CancelAfter { at: 1, token })
        .unwrap();
    let result = engine.run().unwrap();

    assert!(result.cancelled);
    assert_eq!(result.steps, 2);
    assert_eq!(engine.state(), RunState::Finished);
    assert_eq!(result.analyses["equity"].as_array().map(Vec::len), Some(2));
}
