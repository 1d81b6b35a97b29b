//! Order matching — does a bar fill a given order, and at what raw price?
//!
//! Raw prices exclude slippage and commission. Stops that gap through fill
//! at the open; limits fill at the limit or at a better open.

use super::config::MarketPrice;
use crate::domain::{Bar, Order, OrderSide, OrderType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult {
    NoMatch,
    Fill { price: f64 },
    /// A stop-limit's stop was hit but its limit is not reachable yet.
    Triggered,
}

/// Match `order` against `bar`.
///
/// Trailing orders must have their stop initialised before this is called.
pub fn check_match(order: &Order, bar: &Bar, market: MarketPrice) -> MatchResult {
    if bar.is_void() {
        return MatchResult::NoMatch;
    }
    let triggered = order.trigger.triggered;
    match order.order_type {
        OrderType::Market => MatchResult::Fill {
            price: market.pick(bar),
        },
        OrderType::Close => MatchResult::Fill { price: bar.close },
        OrderType::Limit { price } => check_limit(order.side, price, bar),
        OrderType::Stop { .. } | OrderType::StopTrail { .. } => {
            if triggered {
                return MatchResult::Fill { price: bar.open };
            }
            match order.trigger.stop {
                Some(stop) => check_stop(order.side, stop, bar),
                None => MatchResult::NoMatch,
            }
        }
        OrderType::StopLimit { .. } | OrderType::StopTrailLimit { .. } => {
            let (Some(stop), Some(limit)) = (order.trigger.stop, order.trigger.limit) else {
                return MatchResult::NoMatch;
            };
            if triggered {
                return check_limit(order.side, limit, bar);
            }
            check_stop_limit(order.side, stop, limit, bar)
        }
    }
}

/// Buy limit fills if the low reaches the limit, at the open when the bar
/// opens at or below it. Sell limit mirrors this on the high.
fn check_limit(side: OrderSide, limit: f64, bar: &Bar) -> MatchResult {
    match side {
        OrderSide::Buy if bar.low <= limit => MatchResult::Fill {
            price: if bar.open <= limit { bar.open } else { limit },
        },
        OrderSide::Sell if bar.high >= limit => MatchResult::Fill {
            price: if bar.open >= limit { bar.open } else { limit },
        },
        _ => MatchResult::NoMatch,
    }
}

/// Sell stop triggers on `low <= stop`, buy stop on `high >= stop`.
/// Gapping through the stop fills at the open.
fn check_stop(side: OrderSide, stop: f64, bar: &Bar) -> MatchResult {
    match side {
        OrderSide::Sell if bar.low <= stop => MatchResult::Fill {
            price: bar.open.min(stop),
        },
        OrderSide::Buy if bar.high >= stop => MatchResult::Fill {
            price: bar.open.max(stop),
        },
        _ => MatchResult::NoMatch,
    }
}

/// Stop-limit: after the stop triggers, the order fills where the price
/// path first meets the limit. On a gap the path starts at the open;
/// otherwise it starts at the stop price.
fn check_stop_limit(side: OrderSide, stop: f64, limit: f64, bar: &Bar) -> MatchResult {
    match side {
        OrderSide::Buy => {
            if bar.open >= stop {
                if bar.open <= limit {
                    MatchResult::Fill { price: bar.open }
                } else if bar.low <= limit {
                    MatchResult::Fill { price: limit }
                } else {
                    MatchResult::Triggered
                }
            } else if bar.high >= stop {
                if stop <= limit {
                    MatchResult::Fill { price: stop }
                } else {
                    MatchResult::Triggered
                }
            } else {
                MatchResult::NoMatch
            }
        }
        OrderSide::Sell => {
            if bar.open <= stop {
                if bar.open >= limit {
                    MatchResult::Fill { price: bar.open }
                } else if bar.high >= limit {
                    MatchResult::Fill { price: limit }
                } else {
                    MatchResult::Triggered
                }
            } else if bar.low <= stop {
                if stop >= limit {
                    MatchResult::Fill { price: stop }
                } else {
                    MatchResult::Triggered
                }
            } else {
                MatchResult::NoMatch
            }
        }
    }
}

/// Set a trailing order's first stop from `reference`.
pub fn init_trail(order: &mut Order, reference: f64) {
    let (trail, offset) = match order.order_type {
        OrderType::StopTrail { trail } => (trail, None),
        OrderType::StopTrailLimit {
            trail,
            limit_offset,
        } => (trail, Some(limit_offset)),
        _ => return,
    };
    let stop = trail.stop_from(order.side, reference);
    order.trigger.stop = Some(stop);
    order.trigger.limit = offset.map(|off| limit_from(order.side, stop, off));
}

/// Move a trailing stop toward the bar's favourable extreme. Never loosens.
pub fn ratchet_trail(order: &mut Order, bar: &Bar) {
    if order.trigger.triggered {
        return;
    }
    let (trail, offset) = match order.order_type {
        OrderType::StopTrail { trail } => (trail, None),
        OrderType::StopTrailLimit {
            trail,
            limit_offset,
        } => (trail, Some(limit_offset)),
        _ => return,
    };
    let Some(current) = order.trigger.stop else {
        return;
    };
    let (candidate, tighter) = match order.side {
        OrderSide::Sell => {
            let c = trail.stop_from(OrderSide::Sell, bar.high);
            (c, c > current)
        }
        OrderSide::Buy => {
            let c = trail.stop_from(OrderSide::Buy, bar.low);
            (c, c < current)
        }
    };
    if tighter {
        order.trigger.stop = Some(candidate);
        if let Some(off) = offset {
            order.trigger.limit = Some(limit_from(order.side, candidate, off));
        }
    }
}

fn limit_from(side: OrderSide, stop: f64, offset: f64) -> f64 {
    match side {
        OrderSide::Sell => stop - offset,
        OrderSide::Buy => stop + offset,
    }
}
