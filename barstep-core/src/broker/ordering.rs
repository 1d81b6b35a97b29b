//! Fill ordering — which working order on an instrument is evaluated first
//! when several could match the same bar.
//!
//! Matters when a bar's range spans both a stop-loss and a take-profit, or
//! when orders compete for a shared cash pool or a volume cap.

use crate::domain::{Bar, Order, OrderId, OrderSide, OrderType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillOrdering {
    /// Oldest order first.
    #[default]
    Submission,
    /// Loss-producing stops before favourable orders.
    WorstCase,
    /// Favourable orders before loss-producing stops.
    BestCase,
    /// Infer the intrabar path from OHLC and evaluate orders in the order
    /// the path reaches their prices.
    PricePath,
}

impl FillOrdering {
    /// Evaluation sequence for `orders`. `position` is the signed size held
    /// on the instrument before this pass. Ties keep submission order.
    pub fn sequence(self, orders: &[&Order], position: f64, bar: &Bar) -> Vec<OrderId> {
        let mut sorted: Vec<&Order> = orders.to_vec();
        sorted.sort_by_key(|o| o.id);
        if sorted.len() <= 1 {
            return sorted.iter().map(|o| o.id).collect();
        }
        match self {
            FillOrdering::Submission => {}
            FillOrdering::WorstCase => {
                sorted.sort_by_key(|o| !is_adverse(o, position));
            }
            FillOrdering::BestCase => {
                sorted.sort_by_key(|o| is_adverse(o, position));
            }
            FillOrdering::PricePath => {
                let high_first = (bar.open - bar.high).abs() <= (bar.open - bar.low).abs();
                sorted.sort_by(|a, b| {
                    path_cmp(
                        reference_price(a).unwrap_or(bar.open),
                        reference_price(b).unwrap_or(bar.open),
                        bar.open,
                        high_first,
                    )
                });
            }
        }
        sorted.iter().map(|o| o.id).collect()
    }
}

/// Order two prices by when an O→H→L→C (or O→L→H→C) path reaches them.
fn path_cmp(a: f64, b: f64, open: f64, high_first: bool) -> Ordering {
    let first_leg = |p: f64| if high_first { p >= open } else { p <= open };
    match (first_leg(a), first_leg(b)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        // Both on the leg away from the open: nearer the open first.
        (true, true) => {
            if high_first {
                a.total_cmp(&b)
            } else {
                b.total_cmp(&a)
            }
        }
        (false, false) => {
            if high_first {
                b.total_cmp(&a)
            } else {
                a.total_cmp(&b)
            }
        }
    }
}

/// Stops that close the current position at a loss, or stop entries when flat.
fn is_adverse(order: &Order, position: f64) -> bool {
    if !order.order_type.is_stop() {
        return false;
    }
    if position > 0.0 {
        order.side == OrderSide::Sell
    } else if position < 0.0 {
        order.side == OrderSide::Buy
    } else {
        true
    }
}

fn reference_price(order: &Order) -> Option<f64> {
    match order.order_type {
        OrderType::Limit { price } => Some(price),
        OrderType::Market | OrderType::Close => None,
        _ => order.trigger.stop,
    }
}
