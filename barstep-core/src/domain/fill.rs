use crate::domain::ids::OrderId;
use crate::domain::order::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One execution against an order.
///
/// `price` already includes slippage; `slippage` records the per-unit
/// adverse adjustment for attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub commission: f64,
    pub slippage: f64,
}

impl Fill {
    /// Unsigned traded value `price * size`.
    pub fn gross_value(&self) -> f64 {
        self.price * self.size
    }

    /// Change in cash caused by this fill, commission included.
    pub fn cash_delta(&self) -> f64 {
        match self.side {
            OrderSide::Buy => -(self.gross_value() + self.commission),
            OrderSide::Sell => self.gross_value() - self.commission,
        }
    }

    /// Signed size: positive for buys.
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }
}
