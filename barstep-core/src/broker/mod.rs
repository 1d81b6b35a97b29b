//! Broker — order lifecycle, matching, and the account ledger.
//!
//! The broker owns cash, positions and the order book. Each step the engine
//! hands it the bars exposed for matching; it accepts pending orders,
//! expires stale ones, matches the rest in the configured fill ordering,
//! and settles every fill atomically (slippage, commission, margin rule,
//! position, cash, trade tracking, run log).

pub mod config;
pub mod cost;
pub mod liquidity;
pub mod matching;
pub mod order_book;
pub mod ordering;

pub use config::{BrokerConfig, MarketPrice};
pub use cost::{Commission, CostModel, Slippage};
pub use liquidity::{LiquidityPolicy, RemainderPolicy};
pub use matching::MatchResult;
pub use order_book::OrderBook;
pub use ordering::FillOrdering;

use crate::domain::{
    Account, Bar, Fill, IdGen, Order, OrderId, OrderRequest, OrderStatus, OrderType,
    Position, PositionChange, RunLogEntry, RunLogEvent, Trade, Validity, SIZE_EPSILON,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Cash below this is treated as negative.
const CASH_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("order {id} is not active (status: {status})")]
    OrderNotActive { id: OrderId, status: OrderStatus },

    #[error("cash went negative without leverage: {cash:.6}")]
    NegativeCash { cash: f64 },

    #[error("invalid broker config: {0}")]
    InvalidConfig(String),
}

/// Ids of an entry order and its protective children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    pub entry: OrderId,
    pub stop: OrderId,
    pub target: Option<OrderId>,
}

/// Which orders a matching pass considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// The regular per-step pass.
    Step,
    /// Cheat-on-close: only orders created this step, at the close.
    Close,
}

#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    cost: CostModel,
    book: OrderBook,
    ids: IdGen,
    account: Account,
    positions: BTreeMap<String, Position>,
    open_trades: BTreeMap<String, Trade>,
    closed_trades: Vec<Trade>,
    trade_events: Vec<Trade>,
    /// Last close per instrument, used for valuation and trailing stops.
    marks: BTreeMap<String, f64>,
    /// Volume filled per instrument on the current step's bar, across the
    /// step pass and the close pass.
    volume_used: BTreeMap<String, f64>,
    volume_step: Option<usize>,
    fills: Vec<Fill>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            cost: config.cost_model(),
            account: Account::new(config.starting_cash),
            config,
            book: OrderBook::new(),
            ids: IdGen::new(),
            positions: BTreeMap::new(),
            open_trades: BTreeMap::new(),
            closed_trades: Vec::new(),
            trade_events: Vec::new(),
            marks: BTreeMap::new(),
            volume_used: BTreeMap::new(),
            volume_step: None,
            fills: Vec::new(),
        }
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn cash(&self) -> f64 {
        self.account.cash
    }

    /// Cash plus positions marked at the last close.
    pub fn value(&self) -> f64 {
        self.account.cash
            + self
                .positions
                .values()
                .map(|p| p.market_value(self.mark(&p.instrument, p.avg_price)))
                .sum::<f64>()
    }

    pub fn position(&self, instrument: &str) -> Position {
        self.positions
            .get(instrument)
            .cloned()
            .unwrap_or_else(|| Position::new(instrument))
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.book.get(id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.book.orders()
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &Trade> {
        self.open_trades.values()
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    pub fn run_log(&self) -> &[RunLogEntry] {
        self.book.run_log()
    }

    pub fn take_run_log(&mut self) -> Vec<RunLogEntry> {
        self.book.take_run_log()
    }

    /// Order snapshots for every transition since the last call.
    pub fn take_notifications(&mut self) -> Vec<Order> {
        self.book.take_notifications()
    }

    /// Trades opened or closed since the last call.
    pub fn take_trade_events(&mut self) -> Vec<Trade> {
        std::mem::take(&mut self.trade_events)
    }

    fn mark(&self, instrument: &str, fallback: f64) -> f64 {
        self.marks.get(instrument).copied().unwrap_or(fallback)
    }

    // ── Order entry ────────────────────────────────────────────────────

    /// Register and validate an order. Invalid requests are stored as
    /// `Rejected` and still get an id.
    pub fn submit(
        &mut self,
        request: &OrderRequest,
        step: usize,
        at: DateTime<Utc>,
        eligible_step: usize,
    ) -> Result<OrderId, BrokerError> {
        let id = self.create(request, step, at, eligible_step);
        match request.invalid_reason() {
            Some(reason) => self.reject(id, step, &reason)?,
            None => self.book.transition(id, OrderStatus::Submitted, step, "submitted")?,
        }
        Ok(id)
    }

    /// Submit orders linked one-cancels-other.
    pub fn submit_oco(
        &mut self,
        requests: &[OrderRequest],
        step: usize,
        at: DateTime<Utc>,
        eligible_step: usize,
    ) -> Result<Vec<OrderId>, BrokerError> {
        let ids = requests
            .iter()
            .map(|r| self.submit(r, step, at, eligible_step))
            .collect::<Result<Vec<_>, _>>()?;
        let group = self.ids.group();
        self.book.link_oco(group, &ids)?;
        for &id in &ids {
            if self.book.get(id).is_some_and(|o| o.status.is_terminal()) {
                self.book.settle(id, step)?;
            }
        }
        Ok(ids)
    }

    /// Submit an entry with a protective stop and optional target. The
    /// children stay dormant until the entry ends with a fill, then work
    /// as an OCO pair sized to the filled amount.
    pub fn submit_bracket(
        &mut self,
        entry: &OrderRequest,
        stop: &OrderRequest,
        target: Option<&OrderRequest>,
        step: usize,
        at: DateTime<Utc>,
        eligible_step: usize,
    ) -> Result<Bracket, BrokerError> {
        let children: Vec<&OrderRequest> = std::iter::once(stop).chain(target).collect();
        let invalid = entry.invalid_reason().or_else(|| {
            children.iter().find_map(|child| {
                if child.instrument != entry.instrument || child.side != entry.side.opposite() {
                    Some("bracket child must close the entry".to_string())
                } else {
                    child.invalid_reason()
                }
            })
        });

        let entry_id = self.create(entry, step, at, eligible_step);
        let child_ids: Vec<OrderId> = children
            .iter()
            .map(|child| self.create(child, step, at, eligible_step))
            .collect();

        if let Some(reason) = invalid {
            for id in std::iter::once(entry_id).chain(child_ids.iter().copied()) {
                self.reject(id, step, &reason)?;
            }
        } else {
            self.book.hold_children(entry_id, &child_ids)?;
            if child_ids.len() > 1 {
                let group = self.ids.group();
                for &id in &child_ids {
                    self.book.get_mut(id)?.oco_group = Some(group);
                }
            }
            self.book.transition(entry_id, OrderStatus::Submitted, step, "submitted")?;
        }

        Ok(Bracket {
            entry: entry_id,
            stop: child_ids[0],
            target: child_ids.get(1).copied(),
        })
    }

    /// Cancel an order that has not reached a terminal state.
    pub fn cancel(&mut self, id: OrderId, step: usize) -> Result<(), BrokerError> {
        let status = self.book.get(id).ok_or(BrokerError::UnknownOrder(id))?.status;
        if status.is_terminal() {
            return Err(BrokerError::OrderNotActive { id, status });
        }
        self.book.transition(id, OrderStatus::Canceled, step, "canceled by strategy")?;
        self.book.settle(id, step)
    }

    fn create(
        &mut self,
        request: &OrderRequest,
        step: usize,
        at: DateTime<Utc>,
        eligible_step: usize,
    ) -> OrderId {
        let id = self.ids.order();
        self.book
            .insert(Order::from_request(id, request, step, at, eligible_step));
        id
    }

    fn reject(&mut self, id: OrderId, step: usize, reason: &str) -> Result<(), BrokerError> {
        warn!(order = %id, reason, "order rejected");
        self.book.transition(id, OrderStatus::Rejected, step, reason)
    }

    // ── Matching ───────────────────────────────────────────────────────

    /// Run the regular matching pass for `step` against `bars`, keyed by
    /// instrument. Instruments without a bar this step are not matched.
    pub fn process(
        &mut self,
        step: usize,
        at: DateTime<Utc>,
        bars: &[(String, Bar)],
    ) -> Result<(), BrokerError> {
        self.run_pass(Pass::Step, step, at, bars)
    }

    /// Match orders created during `step` against that step's close.
    pub fn process_close(
        &mut self,
        step: usize,
        at: DateTime<Utc>,
        bars: &[(String, Bar)],
    ) -> Result<(), BrokerError> {
        let closes: Vec<(String, Bar)> = bars
            .iter()
            .map(|(name, bar)| (name.clone(), Bar::flat(bar.timestamp, bar.close, bar.volume)))
            .collect();
        self.run_pass(Pass::Close, step, at, &closes)
    }

    /// Record the latest closes for valuation and margin accounting.
    pub fn update_marks(&mut self, bars: &[(String, Bar)]) {
        for (name, bar) in bars {
            if !bar.close.is_nan() {
                self.marks.insert(name.clone(), bar.close);
            }
        }
        let gross: f64 = self
            .positions
            .values()
            .map(|p| p.market_value(self.mark(&p.instrument, p.avg_price)).abs())
            .sum();
        self.account.margin_used = gross / self.config.leverage.max(1.0);
    }

    fn run_pass(
        &mut self,
        pass: Pass,
        step: usize,
        at: DateTime<Utc>,
        bars: &[(String, Bar)],
    ) -> Result<(), BrokerError> {
        self.accept_submitted(step)?;
        if pass == Pass::Step {
            self.expire(step, at)?;
        }
        if self.volume_step != Some(step) {
            self.volume_used.clear();
            self.volume_step = Some(step);
        }

        for (instrument, bar) in bars {
            let position = self.position(instrument).size;
            let candidates: Vec<&Order> = self
                .book
                .working_for(instrument)
                .into_iter()
                .filter(|o| o.eligible_step <= step)
                .filter(|o| pass == Pass::Step || o.created_step == step)
                .collect();
            let sequence = self.config.fill_ordering.sequence(&candidates, position, bar);

            // Volume already taken on this bar, shared by the instrument's orders.
            let mut used = self.volume_used.get(instrument).copied().unwrap_or(0.0);
            for id in sequence {
                used += self.match_order(id, step, at, bar, used)?;
            }
            self.volume_used.insert(instrument.clone(), used);

            if pass == Pass::Step {
                for id in self.book.working() {
                    let order = self.book.get_mut(id)?;
                    if order.instrument == *instrument && order.eligible_step <= step {
                        matching::ratchet_trail(order, bar);
                    }
                }
            }
        }

        if self.config.cash_only() && self.account.cash < -CASH_TOLERANCE {
            return Err(BrokerError::NegativeCash {
                cash: self.account.cash,
            });
        }
        Ok(())
    }

    fn accept_submitted(&mut self, step: usize) -> Result<(), BrokerError> {
        for id in self.book.submitted() {
            self.book.transition(id, OrderStatus::Accepted, step, "accepted")?;
            let order = self.book.get(id).ok_or(BrokerError::UnknownOrder(id))?;
            if order.order_type.is_trailing() {
                if let Some(&mark) = self.marks.get(&order.instrument) {
                    matching::init_trail(self.book.get_mut(id)?, mark);
                }
            }
        }
        Ok(())
    }

    fn expire(&mut self, step: usize, at: DateTime<Utc>) -> Result<(), BrokerError> {
        let today = at.date_naive();
        for id in self.book.working() {
            let order = self.book.get_mut(id)?;
            if order.eligible_step > step {
                continue;
            }
            let expired = match order.validity {
                Validity::GoodTillCancel => false,
                Validity::Day => {
                    let first = *order.first_pass_day.get_or_insert(today);
                    today > first
                }
                Validity::Until(until) => at > until,
            };
            if expired {
                self.book.transition(id, OrderStatus::Expired, step, "validity elapsed")?;
                self.book.settle(id, step)?;
            }
        }
        Ok(())
    }

    /// Try to fill one order. Returns the size filled.
    fn match_order(
        &mut self,
        id: OrderId,
        step: usize,
        at: DateTime<Utc>,
        bar: &Bar,
        already_used: f64,
    ) -> Result<f64, BrokerError> {
        let market_price = self.config.market_price;
        let order = self.book.get_mut(id)?;
        if !order.is_working() {
            return Ok(0.0);
        }
        if order.order_type.is_trailing() && order.trigger.stop.is_none() {
            matching::init_trail(order, bar.open);
        }

        let raw = match matching::check_match(order, bar, market_price) {
            MatchResult::NoMatch => return Ok(0.0),
            MatchResult::Triggered => {
                order.trigger.triggered = true;
                debug!(order = %id, "stop triggered, limit not reached");
                return Ok(0.0);
            }
            MatchResult::Fill { price } => price,
        };
        if order.order_type.is_stop() {
            order.trigger.triggered = true;
        }

        let desired = order.remaining();
        let (size, leftover) = match self.config.liquidity {
            Some(policy) => policy.constrain(desired, bar.volume, already_used),
            None => (desired, 0.0),
        };
        let cancel_leftover = leftover > SIZE_EPSILON
            && self
                .config
                .liquidity
                .is_some_and(|p| p.remainder == RemainderPolicy::Cancel);

        if size <= SIZE_EPSILON {
            if cancel_leftover {
                self.book.transition(id, OrderStatus::Canceled, step, "no volume available")?;
                self.book.settle(id, step)?;
            }
            return Ok(0.0);
        }

        let filled = self.execute(id, step, at, bar, raw, size)?;
        if filled && cancel_leftover {
            self.book.transition(id, OrderStatus::Canceled, step, "unfilled remainder canceled")?;
            self.book.settle(id, step)?;
        }
        Ok(if filled { size } else { 0.0 })
    }

    /// Settle one execution of `size` at raw price `raw`. Returns false when
    /// the margin rule refused it.
    fn execute(
        &mut self,
        id: OrderId,
        step: usize,
        at: DateTime<Utc>,
        bar: &Bar,
        raw: f64,
        size: f64,
    ) -> Result<bool, BrokerError> {
        let order = self.book.get(id).ok_or(BrokerError::UnknownOrder(id))?;
        let (side, instrument) = (order.side, order.instrument.clone());
        let limit = match order.order_type {
            OrderType::Limit { price } => Some(price),
            OrderType::StopLimit { .. } | OrderType::StopTrailLimit { .. } => order.trigger.limit,
            _ => None,
        };
        let (price, slippage) = self.cost.apply_slippage(raw, side, bar, limit);
        let commission = self.cost.commission(price, size);
        let delta = side.sign() * size;

        if !self.margin_allows(&instrument, delta, price, commission) {
            warn!(order = %id, %instrument, size, price, "fill refused by margin rule");
            self.book.transition(id, OrderStatus::Margin, step, "insufficient margin")?;
            self.book.settle(id, step)?;
            return Ok(false);
        }

        let fill = Fill {
            order_id: id,
            step,
            timestamp: at,
            instrument: instrument.clone(),
            side,
            price,
            size,
            commission,
            slippage,
        };
        self.account.cash += fill.cash_delta();
        self.account.total_commission += commission;

        let position = self
            .positions
            .entry(instrument.clone())
            .or_insert_with(|| Position::new(instrument.as_str()));
        let change = position.apply(delta, price);
        let size_after = position.size;
        self.account.realized_pnl += change.realized;
        self.track_trade(&instrument, change, commission, size_after, step, at, price);

        let order = self.book.get_mut(id)?;
        order.record_execution(size, price, commission);
        let done = order.remaining() <= SIZE_EPSILON;
        debug!(order = %id, %instrument, size, price, commission, "fill");

        self.fills.push(fill.clone());
        self.book.log_event(step, id, RunLogEvent::Fill(fill));
        let (to, reason) = if done {
            (OrderStatus::Completed, "filled")
        } else {
            (OrderStatus::Partial, "partially filled")
        };
        self.book.transition(id, to, step, reason)?;
        self.book.settle(id, step)?;
        Ok(true)
    }

    /// Fills that increase exposure need `equity >= gross / leverage` after
    /// the fill. Reducing fills always pass.
    fn margin_allows(&self, instrument: &str, delta: f64, price: f64, commission: f64) -> bool {
        let current = self.positions.get(instrument).map_or(0.0, |p| p.size);
        let after = current + delta;
        if after.abs() <= current.abs() + SIZE_EPSILON {
            return true;
        }
        let cash_after = self.account.cash - delta * price - commission;
        let mut equity = cash_after + after * price;
        let mut gross = (after * price).abs();
        for p in self.positions.values().filter(|p| p.instrument != instrument) {
            let value = p.market_value(self.mark(&p.instrument, p.avg_price));
            equity += value;
            gross += value.abs();
        }
        equity + CASH_TOLERANCE >= gross / self.config.leverage
    }

    #[allow(clippy::too_many_arguments)]
    fn track_trade(
        &mut self,
        instrument: &str,
        change: PositionChange,
        commission: f64,
        size_after: f64,
        step: usize,
        at: DateTime<Utc>,
        price: f64,
    ) {
        let traded = change.closed + change.opened;
        let share = |part: f64| if traded > 0.0 { commission * part / traded } else { 0.0 };

        if change.closed > 0.0 {
            if let Some(trade) = self.open_trades.get_mut(instrument) {
                let still_open = size_after.abs() > SIZE_EPSILON && change.opened == 0.0;
                trade.record(change.realized, share(change.closed), if still_open { size_after } else { 0.0 });
                if !still_open {
                    trade.close(step, at, price);
                    if let Some(trade) = self.open_trades.remove(instrument) {
                        self.closed_trades.push(trade.clone());
                        self.trade_events.push(trade);
                    }
                }
            }
        }

        if change.opened > 0.0 {
            match self.open_trades.get_mut(instrument) {
                Some(trade) => trade.record(0.0, share(change.opened), size_after),
                None => {
                    let mut trade = Trade::open(
                        self.ids.trade(),
                        instrument,
                        size_after.signum(),
                        step,
                        at,
                        price,
                        size_after,
                    );
                    trade.record(0.0, share(change.opened), size_after);
                    self.trade_events.push(trade.clone());
                    self.open_trades.insert(instrument.to_string(), trade);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use chrono::{Duration, TimeZone};

    fn day(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap() + Duration::days(i)
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> (String, Bar) {
        ("X".to_string(), Bar::new(day(i), open, high, low, close, volume))
    }

    fn broker() -> Broker {
        Broker::new(BrokerConfig {
            starting_cash: 10_000.0,
            ..BrokerConfig::default()
        })
    }

    #[test]
    fn invalid_request_is_rejected_with_notification() {
        let mut b = broker();
        let id = b
            .submit(&OrderRequest::market("X", OrderSide::Buy, 0.0), 0, day(0), 1)
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Rejected);
        let notes = b.take_notifications();
        assert_eq!(notes.last().unwrap().status, OrderStatus::Rejected);
    }

    #[test]
    fn market_buy_fills_next_open_and_updates_ledger() {
        let mut b = Broker::new(BrokerConfig {
            starting_cash: 10_000.0,
            commission: Commission::Fixed { amount: 1.0 },
            ..BrokerConfig::default()
        });
        let id = b
            .submit(&OrderRequest::market("X", OrderSide::Buy, 10.0), 0, day(0), 1)
            .unwrap();
        b.process(1, day(1), &[bar(1, 100.0, 101.0, 99.0, 100.5, 1_000.0)])
            .unwrap();

        let order = b.order(id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.avg_fill_price, 100.0);
        assert_eq!(b.cash(), 10_000.0 - 1_000.0 - 1.0);
        assert_eq!(b.position("X").size, 10.0);
        assert_eq!(b.open_trades().count(), 1);
    }

    #[test]
    fn order_not_matched_before_eligible_step() {
        let mut b = broker();
        let id = b
            .submit(&OrderRequest::market("X", OrderSide::Buy, 1.0), 0, day(0), 2)
            .unwrap();
        b.process(1, day(1), &[bar(1, 10.0, 10.0, 10.0, 10.0, 100.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Accepted);
    }

    #[test]
    fn margin_rule_refuses_oversized_buy() {
        let mut b = broker();
        let id = b
            .submit(&OrderRequest::market("X", OrderSide::Buy, 200.0), 0, day(0), 1)
            .unwrap();
        b.process(1, day(1), &[bar(1, 100.0, 101.0, 99.0, 100.0, 1_000.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Margin);
        assert_eq!(b.cash(), 10_000.0);
        assert!(b.fills().is_empty());
    }

    #[test]
    fn leverage_allows_larger_exposure() {
        let mut b = Broker::new(BrokerConfig {
            starting_cash: 10_000.0,
            leverage: 4.0,
            ..BrokerConfig::default()
        });
        let id = b
            .submit(&OrderRequest::market("X", OrderSide::Buy, 300.0), 0, day(0), 1)
            .unwrap();
        b.process(1, day(1), &[bar(1, 100.0, 101.0, 99.0, 100.0, 1_000.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Completed);
        assert!(b.cash() < 0.0);
    }

    #[test]
    fn round_trip_closes_trade_with_net_pnl() {
        let mut b = Broker::new(BrokerConfig {
            commission: Commission::Fixed { amount: 2.0 },
            ..BrokerConfig::default()
        });
        b.submit(&OrderRequest::market("X", OrderSide::Buy, 10.0), 0, day(0), 1)
            .unwrap();
        b.process(1, day(1), &[bar(1, 100.0, 100.0, 100.0, 100.0, 1_000.0)])
            .unwrap();
        b.submit(&OrderRequest::market("X", OrderSide::Sell, 10.0), 1, day(1), 2)
            .unwrap();
        b.process(2, day(2), &[bar(2, 105.0, 105.0, 105.0, 105.0, 1_000.0)])
            .unwrap();

        let trades = b.closed_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].gross_pnl, 50.0);
        assert_eq!(trades[0].net_pnl, 46.0);
        assert!(b.position("X").is_flat());
        let events = b.take_trade_events();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_open());
        assert!(!events[1].is_open());
    }

    #[test]
    fn reversal_closes_and_reopens() {
        let mut b = broker();
        b.submit(&OrderRequest::market("X", OrderSide::Buy, 5.0), 0, day(0), 1)
            .unwrap();
        b.process(1, day(1), &[bar(1, 10.0, 10.0, 10.0, 10.0, 1_000.0)])
            .unwrap();
        b.submit(&OrderRequest::market("X", OrderSide::Sell, 8.0), 1, day(1), 2)
            .unwrap();
        b.process(2, day(2), &[bar(2, 12.0, 12.0, 12.0, 12.0, 1_000.0)])
            .unwrap();

        assert_eq!(b.closed_trades().len(), 1);
        assert_eq!(b.closed_trades()[0].gross_pnl, 10.0);
        let open: Vec<&Trade> = b.open_trades().collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].direction, -1.0);
        assert_eq!(b.position("X").size, -3.0);
    }

    #[test]
    fn day_order_expires_on_next_calendar_day() {
        let mut b = broker();
        let id = b
            .submit(
                &OrderRequest::limit("X", OrderSide::Buy, 1.0, 5.0).with_validity(Validity::Day),
                0,
                day(0),
                1,
            )
            .unwrap();
        b.process(1, day(1), &[bar(1, 10.0, 11.0, 9.0, 10.0, 100.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Accepted);
        b.process(2, day(2), &[bar(2, 10.0, 11.0, 9.0, 10.0, 100.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Expired);
    }

    #[test]
    fn until_order_expires_after_instant() {
        let mut b = broker();
        let id = b
            .submit(
                &OrderRequest::limit("X", OrderSide::Buy, 1.0, 5.0)
                    .with_validity(Validity::Until(day(1))),
                0,
                day(0),
                1,
            )
            .unwrap();
        b.process(1, day(1), &[bar(1, 10.0, 11.0, 9.0, 10.0, 100.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Accepted);
        b.process(2, day(2), &[bar(2, 10.0, 11.0, 9.0, 10.0, 100.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().status, OrderStatus::Expired);
    }

    #[test]
    fn bracket_children_activate_after_entry() {
        let mut b = broker();
        let ids = b
            .submit_bracket(
                &OrderRequest::market("X", OrderSide::Buy, 10.0),
                &OrderRequest::stop("X", OrderSide::Sell, 10.0, 90.0),
                Some(&OrderRequest::limit("X", OrderSide::Sell, 10.0, 110.0)),
                0,
                day(0),
                1,
            )
            .unwrap();
        assert_eq!(b.order(ids.stop).unwrap().status, OrderStatus::Created);

        // Bar touches the stop but the children are not live yet.
        b.process(1, day(1), &[bar(1, 100.0, 101.0, 85.0, 100.0, 1_000.0)])
            .unwrap();
        assert_eq!(b.order(ids.entry).unwrap().status, OrderStatus::Completed);
        assert_eq!(b.order(ids.stop).unwrap().status, OrderStatus::Submitted);

        b.process(2, day(2), &[bar(2, 105.0, 112.0, 104.0, 111.0, 1_000.0)])
            .unwrap();
        assert_eq!(b.order(ids.target.unwrap()).unwrap().status, OrderStatus::Completed);
        assert_eq!(b.order(ids.stop).unwrap().status, OrderStatus::Canceled);
        assert!(b.position("X").is_flat());
    }

    #[test]
    fn bracket_child_on_wrong_side_rejects_group() {
        let mut b = broker();
        let ids = b
            .submit_bracket(
                &OrderRequest::market("X", OrderSide::Buy, 10.0),
                &OrderRequest::stop("X", OrderSide::Buy, 10.0, 90.0),
                None,
                0,
                day(0),
                1,
            )
            .unwrap();
        assert_eq!(b.order(ids.entry).unwrap().status, OrderStatus::Rejected);
        assert_eq!(b.order(ids.stop).unwrap().status, OrderStatus::Rejected);
    }

    #[test]
    fn cancel_terminal_order_is_an_error() {
        let mut b = broker();
        let id = b
            .submit(&OrderRequest::market("X", OrderSide::Buy, 0.0), 0, day(0), 1)
            .unwrap();
        assert!(matches!(
            b.cancel(id, 0),
            Err(BrokerError::OrderNotActive { .. })
        ));
        assert!(matches!(
            b.cancel(OrderId(99), 0),
            Err(BrokerError::UnknownOrder(_))
        ));
    }

    #[test]
    fn liquidity_cancel_policy_drops_remainder() {
        let mut b = Broker::new(BrokerConfig {
            liquidity: Some(LiquidityPolicy::new(0.1, RemainderPolicy::Cancel)),
            ..BrokerConfig::default()
        });
        let id = b
            .submit(&OrderRequest::market("X", OrderSide::Buy, 50.0), 0, day(0), 1)
            .unwrap();
        b.process(1, day(1), &[bar(1, 10.0, 10.0, 10.0, 10.0, 200.0)])
            .unwrap();
        let order = b.order(id).unwrap();
        assert_eq!(order.filled, 20.0);
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[test]
    fn trailing_stop_initialised_from_last_close() {
        let mut b = broker();
        b.submit(&OrderRequest::market("X", OrderSide::Buy, 10.0), 0, day(0), 1)
            .unwrap();
        let first = bar(1, 100.0, 100.0, 100.0, 100.0, 1_000.0);
        b.process(1, day(1), std::slice::from_ref(&first)).unwrap();
        b.update_marks(&[first]);

        let id = b
            .submit(
                &OrderRequest::trailing("X", OrderSide::Sell, 10.0, crate::domain::Trail::Amount(5.0)),
                1,
                day(1),
                2,
            )
            .unwrap();
        b.process(2, day(2), &[bar(2, 101.0, 110.0, 100.0, 109.0, 1_000.0)])
            .unwrap();
        assert_eq!(b.order(id).unwrap().trigger.stop, Some(105.0));
        b.process(3, day(3), &[bar(3, 106.0, 106.0, 103.0, 104.0, 1_000.0)])
            .unwrap();
        let order = b.order(id).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.avg_fill_price, 105.0);
    }
}
