//! Cost model — slippage and commission.
//!
//! Slippage is always adverse: buyers pay more, sellers receive less. The
//! slipped price never leaves the bar's range and never crosses a limit
//! price. Commission is charged per fill.

use crate::domain::{Bar, OrderSide};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Commission {
    #[default]
    None,
    /// Flat amount per fill.
    Fixed { amount: f64 },
    /// Percent of traded value (0.1 = 0.1%).
    Percentage { percent: f64 },
    /// Amount per unit traded.
    PerUnit { amount: f64 },
}

impl Commission {
    pub fn compute(&self, price: f64, size: f64) -> f64 {
        match *self {
            Commission::None => 0.0,
            Commission::Fixed { amount } => amount,
            Commission::Percentage { percent } => price * size * percent / 100.0,
            Commission::PerUnit { amount } => amount * size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Slippage {
    #[default]
    None,
    /// Fixed price units per fill.
    Fixed { amount: f64 },
    /// Percent of the raw price (0.1 = 0.1%).
    Percentage { percent: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostModel {
    pub commission: Commission,
    pub slippage: Slippage,
}

impl CostModel {
    pub fn new(commission: Commission, slippage: Slippage) -> Self {
        Self {
            commission,
            slippage,
        }
    }

    pub fn frictionless() -> Self {
        Self::default()
    }

    /// Apply slippage to a raw fill price.
    ///
    /// Returns `(price, per_unit_slippage)`. The result is clamped to the
    /// bar's range and, when `limit` is given, to the limit price.
    pub fn apply_slippage(
        &self,
        raw: f64,
        side: OrderSide,
        bar: &Bar,
        limit: Option<f64>,
    ) -> (f64, f64) {
        let offset = match self.slippage {
            Slippage::None => return (raw, 0.0),
            Slippage::Fixed { amount } => amount,
            Slippage::Percentage { percent } => raw * percent / 100.0,
        };
        let mut price = match side {
            OrderSide::Buy => (raw + offset).min(bar.high.max(raw)),
            OrderSide::Sell => (raw - offset).max(bar.low.min(raw)),
        };
        if let Some(limit) = limit {
            price = match side {
                OrderSide::Buy => price.min(limit.max(raw)),
                OrderSide::Sell => price.max(limit.min(raw)),
            };
        }
        (price, (price - raw).abs())
    }

    pub fn commission(&self, price: f64, size: f64) -> f64 {
        self.commission.compute(price, size)
    }
}
