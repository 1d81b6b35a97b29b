//! Analyzers — passive observers of a run.
//!
//! Analyzers see every step, order transition and trade but hold no mutable
//! access to engine state. Each produces a JSON report at the end of the run.

use crate::broker::Broker;
use crate::domain::{Bar, Order, OrderStatus, Position, Trade, TradeId, TradeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Read-only view of the run after a step completes.
pub struct AnalyzerContext<'a> {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    broker: &'a Broker,
    bars: &'a [(String, Bar)],
}

impl<'a> AnalyzerContext<'a> {
    pub(crate) fn new(
        step: usize,
        timestamp: DateTime<Utc>,
        broker: &'a Broker,
        bars: &'a [(String, Bar)],
    ) -> Self {
        Self {
            step,
            timestamp,
            broker,
            bars,
        }
    }

    pub fn cash(&self) -> f64 {
        self.broker.cash()
    }

    pub fn value(&self) -> f64 {
        self.broker.value()
    }

    pub fn positions(&self) -> impl Iterator<Item = &'a Position> {
        self.broker.positions()
    }

    /// The bar this step exposed for `instrument`, if its feed has one.
    pub fn bar(&self, instrument: &str) -> Option<&'a Bar> {
        self.bars
            .iter()
            .find(|(name, _)| name == instrument)
            .map(|(_, bar)| bar)
    }
}

pub trait Analyzer: Send {
    fn name(&self) -> &str;

    fn on_step(&mut self, _ctx: &AnalyzerContext<'_>) {}

    fn on_order(&mut self, _order: &Order) {}

    fn on_trade(&mut self, _trade: &Trade) {}

    fn report(&self) -> Value;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub value: f64,
}

/// Cash and portfolio value after every step.
#[derive(Debug, Default)]
pub struct EquityRecorder {
    points: Vec<EquityPoint>,
}

impl EquityRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }
}

impl Analyzer for EquityRecorder {
    fn name(&self) -> &str {
        "equity"
    }

    fn on_step(&mut self, ctx: &AnalyzerContext<'_>) {
        self.points.push(EquityPoint {
            step: ctx.step,
            timestamp: ctx.timestamp,
            cash: ctx.cash(),
            value: ctx.value(),
        });
    }

    fn report(&self) -> Value {
        serde_json::to_value(&self.points).unwrap_or(Value::Null)
    }
}

/// Every closed trade, in closing order.
#[derive(Debug, Default)]
pub struct TradeList {
    trades: Vec<Trade>,
}

impl TradeList {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Analyzer for TradeList {
    fn name(&self) -> &str {
        "trades"
    }

    fn on_trade(&mut self, trade: &Trade) {
        if trade.status == TradeStatus::Closed {
            self.trades.push(trade.clone());
        }
    }

    fn report(&self) -> Value {
        let wins = self.trades.iter().filter(|t| t.is_winner()).count();
        let net: f64 = self.trades.iter().map(|t| t.net_pnl).sum();
        json!({
            "count": self.trades.len(),
            "winners": wins,
            "net_pnl": net,
            "trades": self.trades,
        })
    }
}

/// Price excursion of one round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeExcursion {
    pub trade: TradeId,
    pub instrument: String,
    /// Signed by direction, at the trade's largest size.
    pub size: f64,
    pub entry_at: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub max_up_price: f64,
    pub max_up_at: DateTime<Utc>,
    pub max_down_price: f64,
    pub max_down_at: DateTime<Utc>,
}

impl TradeExcursion {
    fn start(trade: &Trade) -> Self {
        Self {
            trade: trade.id,
            instrument: trade.instrument.clone(),
            size: trade.direction * trade.max_size,
            entry_at: trade.entry_at,
            entry_price: trade.entry_price,
            exit_at: None,
            exit_price: None,
            max_up_price: trade.entry_price,
            max_up_at: trade.entry_at,
            max_down_price: trade.entry_price,
            max_down_at: trade.entry_at,
        }
    }

    fn observe(&mut self, bar: &Bar) {
        if bar.high > self.max_up_price {
            self.max_up_price = bar.high;
            self.max_up_at = bar.timestamp;
        }
        if bar.low < self.max_down_price {
            self.max_down_price = bar.low;
            self.max_down_at = bar.timestamp;
        }
    }

    /// Largest unrealized profit seen while the trade was open, never negative.
    pub fn max_favorable(&self) -> f64 {
        let gain = if self.size >= 0.0 {
            self.max_up_price - self.entry_price
        } else {
            self.entry_price - self.max_down_price
        };
        (gain * self.size.abs()).max(0.0)
    }

    /// Largest unrealized loss seen while the trade was open, never negative.
    pub fn max_adverse(&self) -> f64 {
        let loss = if self.size >= 0.0 {
            self.entry_price - self.max_down_price
        } else {
            self.max_up_price - self.entry_price
        };
        (loss * self.size.abs()).max(0.0)
    }
}

/// Max favorable and adverse excursion per closed trade.
///
/// Extremes come from the instrument's bar high and low on every step the
/// trade is open, from the entry bar up to the bar before the exit.
#[derive(Debug, Default)]
pub struct TradeMetrics {
    open: BTreeMap<TradeId, TradeExcursion>,
    closed: Vec<TradeExcursion>,
}

impl TradeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closed(&self) -> &[TradeExcursion] {
        &self.closed
    }
}

impl Analyzer for TradeMetrics {
    fn name(&self) -> &str {
        "trade_metrics"
    }

    fn on_trade(&mut self, trade: &Trade) {
        if trade.is_open() {
            self.open
                .entry(trade.id)
                .and_modify(|ex| ex.size = trade.direction * trade.max_size)
                .or_insert_with(|| TradeExcursion::start(trade));
            return;
        }
        let mut ex = self
            .open
            .remove(&trade.id)
            .unwrap_or_else(|| TradeExcursion::start(trade));
        ex.size = trade.direction * trade.max_size;
        ex.exit_at = trade.exit_at;
        ex.exit_price = trade.exit_price;
        self.closed.push(ex);
    }

    fn on_step(&mut self, ctx: &AnalyzerContext<'_>) {
        for ex in self.open.values_mut() {
            if let Some(bar) = ctx.bar(&ex.instrument) {
                ex.observe(bar);
            }
        }
    }

    fn report(&self) -> Value {
        let trades: Vec<Value> = self
            .closed
            .iter()
            .map(|ex| {
                let mut row = serde_json::to_value(ex).unwrap_or(Value::Null);
                if let Value::Object(map) = &mut row {
                    map.insert("mfe".into(), json!(ex.max_favorable()));
                    map.insert("mae".into(), json!(ex.max_adverse()));
                }
                row
            })
            .collect();
        json!({
            "count": self.closed.len(),
            "open": self.open.len(),
            "trades": trades,
        })
    }
}

/// Number of orders reaching each status.
#[derive(Debug, Default)]
pub struct OrderCounter {
    counts: BTreeMap<String, usize>,
}

impl OrderCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, status: OrderStatus) -> usize {
        self.counts.get(&status.to_string()).copied().unwrap_or(0)
    }
}

impl Analyzer for OrderCounter {
    fn name(&self) -> &str {
        "orders"
    }

    fn on_order(&mut self, order: &Order) {
        *self.counts.entry(order.status.to_string()).or_default() += 1;
    }

    fn report(&self) -> Value {
        serde_json::to_value(&self.counts).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderRequest, OrderSide, TradeId};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn order_counter_tallies_statuses() {
        let mut counter = OrderCounter::new();
        let mut order = Order::from_request(
            OrderId(1),
            &OrderRequest::market("X", OrderSide::Buy, 1.0),
            0,
            at(),
            1,
        );
        order.status = OrderStatus::Submitted;
        counter.on_order(&order);
        order.status = OrderStatus::Completed;
        counter.on_order(&order);
        assert_eq!(counter.count(OrderStatus::Completed), 1);
        assert_eq!(counter.report()["Submitted"], 1);
    }

    #[test]
    fn trade_list_keeps_closed_trades_only() {
        let mut list = TradeList::new();
        let mut trade = Trade::open(TradeId(1), "X", 1.0, 0, at(), 10.0, 1.0);
        list.on_trade(&trade);
        trade.record(5.0, 0.0, 0.0);
        trade.close(3, at(), 15.0);
        list.on_trade(&trade);
        let report = list.report();
        assert_eq!(report["count"], 1);
        assert_eq!(report["winners"], 1);
    }

    #[test]
    fn equity_recorder_reads_broker() {
        let broker = Broker::new(crate::broker::BrokerConfig::default());
        let mut rec = EquityRecorder::new();
        rec.on_step(&AnalyzerContext::new(0, at(), &broker, &[]));
        assert_eq!(rec.points().len(), 1);
        assert_eq!(rec.points()[0].value, 100_000.0);
    }

    #[test]
    fn trade_metrics_tracks_excursion_of_a_long() {
        let broker = Broker::new(crate::broker::BrokerConfig::default());
        let mut metrics = TradeMetrics::new();
        let mut trade = Trade::open(TradeId(1), "X", 1.0, 0, at(), 100.0, 10.0);
        metrics.on_trade(&trade);

        let bars = [
            Bar::new(at(), 100.0, 104.0, 98.0, 103.0, 1_000.0),
            Bar::new(at() + chrono::Duration::days(1), 103.0, 112.0, 101.0, 110.0, 1_000.0),
            Bar::new(at() + chrono::Duration::days(2), 110.0, 111.0, 95.0, 96.0, 1_000.0),
        ];
        for (step, bar) in bars.iter().enumerate() {
            let exposed = [("X".to_string(), *bar), ("Y".to_string(), *bar)];
            metrics.on_step(&AnalyzerContext::new(step, bar.timestamp, &broker, &exposed));
        }
        trade.close(3, at() + chrono::Duration::days(3), 97.0);
        metrics.on_trade(&trade);

        let ex = &metrics.closed()[0];
        assert_eq!(ex.max_up_price, 112.0);
        assert_eq!(ex.max_up_at, bars[1].timestamp);
        assert_eq!(ex.max_down_price, 95.0);
        assert_eq!(ex.max_down_at, bars[2].timestamp);
        assert_eq!(ex.max_favorable(), 120.0);
        assert_eq!(ex.max_adverse(), 50.0);

        let report = metrics.report();
        assert_eq!(report["count"], 1);
        assert_eq!(report["open"], 0);
        assert_eq!(report["trades"][0]["mfe"], 120.0);
        assert_eq!(report["trades"][0]["exit_price"], 97.0);
    }

    #[test]
    fn trade_metrics_mirrors_excursion_for_a_short() {
        let broker = Broker::new(crate::broker::BrokerConfig::default());
        let mut metrics = TradeMetrics::new();
        let mut trade = Trade::open(TradeId(7), "X", -1.0, 0, at(), 50.0, 4.0);
        metrics.on_trade(&trade);
        let bar = Bar::new(at(), 50.0, 53.0, 44.0, 45.0, 1_000.0);
        let exposed = [("X".to_string(), bar)];
        metrics.on_step(&AnalyzerContext::new(0, at(), &broker, &exposed));
        trade.close(1, at(), 45.0);
        metrics.on_trade(&trade);

        let ex = &metrics.closed()[0];
        assert_eq!(ex.size, -4.0);
        assert_eq!(ex.max_favorable(), 24.0);
        assert_eq!(ex.max_adverse(), 12.0);
    }
}
