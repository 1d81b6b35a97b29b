//! Order types, order lifecycle states, order requests, and the run log.

use super::fill::Fill;
use super::ids::{OcoGroupId, OrderId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Trailing distance for trailing stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Trail {
    /// Fixed price distance from the reference extreme.
    Amount(f64),
    /// Fraction of the reference extreme (0.05 = 5%).
    Percent(f64),
}

impl Trail {
    /// Stop price trailing `reference` on the protective side of `side`.
    /// A sell stop trails below the reference, a buy stop above it.
    pub fn stop_from(self, side: OrderSide, reference: f64) -> f64 {
        let distance = match self {
            Trail::Amount(amount) => amount,
            Trail::Percent(pct) => reference * pct,
        };
        match side {
            OrderSide::Sell => reference - distance,
            OrderSide::Buy => reference + distance,
        }
    }

    fn is_valid(self) -> bool {
        match self {
            Trail::Amount(a) => a.is_finite() && a > 0.0,
            Trail::Percent(p) => p.is_finite() && p > 0.0 && p < 1.0,
        }
    }
}

/// What kind of order and its price parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    /// Fills at the open of the next eligible bar (or the configured
    /// reference price).
    Market,
    /// Fills at the close of the next eligible bar.
    Close,
    /// Fills at `price` or better.
    Limit { price: f64 },
    /// Triggers when the bar reaches `price`, then fills as market.
    Stop { price: f64 },
    /// Triggers at `stop`, then rests as a limit at `limit`.
    StopLimit { stop: f64, limit: f64 },
    /// Stop whose trigger follows the favourable bar extreme.
    StopTrail { trail: Trail },
    /// Trailing stop whose limit keeps `limit_offset` from the trigger.
    StopTrailLimit { trail: Trail, limit_offset: f64 },
}

impl OrderType {
    pub fn name(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Close => "close",
            OrderType::Limit { .. } => "limit",
            OrderType::Stop { .. } => "stop",
            OrderType::StopLimit { .. } => "stop_limit",
            OrderType::StopTrail { .. } => "stop_trail",
            OrderType::StopTrailLimit { .. } => "stop_trail_limit",
        }
    }

    /// Stop-triggered variants, trailing included.
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            OrderType::Stop { .. }
                | OrderType::StopLimit { .. }
                | OrderType::StopTrail { .. }
                | OrderType::StopTrailLimit { .. }
        )
    }

    pub fn is_trailing(&self) -> bool {
        matches!(
            self,
            OrderType::StopTrail { .. } | OrderType::StopTrailLimit { .. }
        )
    }

    /// Reason the price parameters are unusable, if any.
    pub fn invalid_reason(&self) -> Option<String> {
        let finite_positive = |p: f64| p.is_finite() && p > 0.0;
        match *self {
            OrderType::Market | OrderType::Close => None,
            OrderType::Limit { price } | OrderType::Stop { price } => {
                (!finite_positive(price)).then(|| format!("invalid price {price}"))
            }
            OrderType::StopLimit { stop, limit } => {
                if !finite_positive(stop) || !finite_positive(limit) {
                    Some(format!("invalid stop/limit {stop}/{limit}"))
                } else {
                    None
                }
            }
            OrderType::StopTrail { trail } => {
                (!trail.is_valid()).then(|| format!("invalid trail {trail:?}"))
            }
            OrderType::StopTrailLimit {
                trail,
                limit_offset,
            } => {
                if !trail.is_valid() {
                    Some(format!("invalid trail {trail:?}"))
                } else if !limit_offset.is_finite() || limit_offset < 0.0 {
                    Some(format!("invalid limit offset {limit_offset}"))
                } else {
                    None
                }
            }
        }
    }
}

/// How long an order stays live.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "until", rename_all = "snake_case")]
pub enum Validity {
    #[default]
    GoodTillCancel,
    /// Expires at the first matching pass on a later calendar day than the
    /// one it first became eligible on.
    Day,
    /// Expires once the step time passes the given instant.
    Until(DateTime<Utc>),
}

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Registered but not yet live (dormant bracket children).
    Created,
    /// Validated, waiting for the next matching pass.
    Submitted,
    /// Live in the book.
    Accepted,
    /// Some but not all of the size has filled.
    Partial,
    Completed,
    Canceled,
    Expired,
    Rejected,
    /// Refused because the fill would breach the margin rule.
    Margin,
}

impl OrderStatus {
    /// Statuses from which no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Rejected
                | OrderStatus::Margin
        )
    }

    /// Statuses that can still be matched.
    pub fn is_working(self) -> bool {
        matches!(self, OrderStatus::Accepted | OrderStatus::Partial)
    }

    /// Whether the lifecycle allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Created => matches!(to, Submitted | Canceled | Rejected),
            Submitted => matches!(to, Accepted | Rejected | Canceled | Margin),
            Accepted | Partial => {
                matches!(to, Partial | Completed | Canceled | Expired | Margin)
            }
            Completed | Canceled | Expired | Rejected | Margin => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Trigger bookkeeping for stop-type orders.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerState {
    /// Current stop price. For trailing stops this moves with the market.
    pub stop: Option<f64>,
    /// Current limit price for stop-limit variants.
    pub limit: Option<f64>,
    /// Set once the stop has been hit; from then on the order behaves as
    /// a market (or limit) order.
    pub triggered: bool,
}

/// What a strategy asks the broker for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: OrderSide,
    pub size: f64,
    pub order_type: OrderType,
    #[serde(default)]
    pub validity: Validity,
}

impl OrderRequest {
    pub fn new(instrument: impl Into<String>, side: OrderSide, size: f64, order_type: OrderType) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            size,
            order_type,
            validity: Validity::GoodTillCancel,
        }
    }

    pub fn market(instrument: impl Into<String>, side: OrderSide, size: f64) -> Self {
        Self::new(instrument, side, size, OrderType::Market)
    }

    pub fn close(instrument: impl Into<String>, side: OrderSide, size: f64) -> Self {
        Self::new(instrument, side, size, OrderType::Close)
    }

    pub fn limit(instrument: impl Into<String>, side: OrderSide, size: f64, price: f64) -> Self {
        Self::new(instrument, side, size, OrderType::Limit { price })
    }

    pub fn stop(instrument: impl Into<String>, side: OrderSide, size: f64, price: f64) -> Self {
        Self::new(instrument, side, size, OrderType::Stop { price })
    }

    pub fn stop_limit(
        instrument: impl Into<String>,
        side: OrderSide,
        size: f64,
        stop: f64,
        limit: f64,
    ) -> Self {
        Self::new(instrument, side, size, OrderType::StopLimit { stop, limit })
    }

    pub fn trailing(instrument: impl Into<String>, side: OrderSide, size: f64, trail: Trail) -> Self {
        Self::new(instrument, side, size, OrderType::StopTrail { trail })
    }

    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    /// Reason the request must be rejected, if any.
    pub fn invalid_reason(&self) -> Option<String> {
        if !self.size.is_finite() || self.size <= 0.0 {
            return Some(format!("invalid size {}", self.size));
        }
        self.order_type.invalid_reason()
    }
}

/// A single order in the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: f64,
    pub filled: f64,
    pub status: OrderStatus,
    pub validity: Validity,
    pub created_step: usize,
    pub created_at: DateTime<Utc>,
    /// First step whose matching pass may fill this order.
    pub eligible_step: usize,
    /// Calendar day of the first matching pass that saw this order.
    pub first_pass_day: Option<NaiveDate>,
    pub trigger: TriggerState,
    pub oco_group: Option<OcoGroupId>,
    /// Entry order of the bracket this order protects.
    pub parent: Option<OrderId>,
    pub avg_fill_price: f64,
    pub commission: f64,
}

impl Order {
    pub fn from_request(
        id: OrderId,
        request: &OrderRequest,
        step: usize,
        at: DateTime<Utc>,
        eligible_step: usize,
    ) -> Self {
        let trigger = match request.order_type {
            OrderType::Stop { price } => TriggerState {
                stop: Some(price),
                ..TriggerState::default()
            },
            OrderType::StopLimit { stop, limit } => TriggerState {
                stop: Some(stop),
                limit: Some(limit),
                triggered: false,
            },
            _ => TriggerState::default(),
        };
        Self {
            id,
            instrument: request.instrument.clone(),
            side: request.side,
            order_type: request.order_type,
            size: request.size,
            filled: 0.0,
            status: OrderStatus::Created,
            validity: request.validity,
            created_step: step,
            created_at: at,
            eligible_step,
            first_pass_day: None,
            trigger,
            oco_group: None,
            parent: None,
            avg_fill_price: 0.0,
            commission: 0.0,
        }
    }

    pub fn remaining(&self) -> f64 {
        (self.size - self.filled).max(0.0)
    }

    pub fn is_working(&self) -> bool {
        self.status.is_working()
    }

    /// Record an execution against this order (quantities and averages only;
    /// status is driven by the order book).
    pub fn record_execution(&mut self, size: f64, price: f64, commission: f64) {
        let total = self.filled + size;
        if total > 0.0 {
            self.avg_fill_price = (self.avg_fill_price * self.filled + price * size) / total;
        }
        self.filled = total;
        self.commission += commission;
    }
}

/// What happened in one run-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunLogEvent {
    Transition {
        from: OrderStatus,
        to: OrderStatus,
        reason: String,
    },
    Fill(Fill),
}

/// One row of the run log: every order transition and every fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub step: usize,
    pub order_id: OrderId,
    #[serde(flatten)]
    pub event: RunLogEvent,
}
