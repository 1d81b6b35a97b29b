//! Position and account state.

use serde::{Deserialize, Serialize};

/// Sizes below this are treated as flat.
pub const SIZE_EPSILON: f64 = 1e-10;

/// Per-instrument position: signed size, average entry and realized PnL.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    /// Positive = long, negative = short.
    pub size: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
}

/// What applying a fill did to a position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionChange {
    pub realized: f64,
    /// Size closed against the previous position.
    pub closed: f64,
    /// Size opened in the fill's direction.
    pub opened: f64,
}

impl Position {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            ..Self::default()
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size.abs() < SIZE_EPSILON
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.size * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if self.is_flat() {
            0.0
        } else {
            (price - self.avg_price) * self.size
        }
    }

    /// Apply a signed execution (`delta > 0` buys) at `price`.
    ///
    /// Adding in the same direction averages the entry price; trading
    /// against the position realizes PnL on the closed part; crossing
    /// through zero reopens the remainder at `price`.
    pub fn apply(&mut self, delta: f64, price: f64) -> PositionChange {
        let mut change = PositionChange::default();
        if self.is_flat() || self.size.signum() == delta.signum() {
            let total = self.size.abs() + delta.abs();
            self.avg_price = if self.is_flat() {
                price
            } else {
                (self.avg_price * self.size.abs() + price * delta.abs()) / total
            };
            self.size += delta;
            change.opened = delta.abs();
            return change;
        }

        let closed = self.size.abs().min(delta.abs());
        let realized = (price - self.avg_price) * closed * self.size.signum();
        self.realized_pnl += realized;
        change.realized = realized;
        change.closed = closed;

        self.size += delta;
        if self.is_flat() {
            self.size = 0.0;
            self.avg_price = 0.0;
        } else if self.size.signum() == delta.signum() {
            self.avg_price = price;
            change.opened = self.size.abs();
        }
        change
    }
}

/// Account ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub cash: f64,
    pub realized_pnl: f64,
    pub total_commission: f64,
    /// Gross exposure divided by leverage at the last mark.
    pub margin_used: f64,
}

impl Account {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            realized_pnl: 0.0,
            total_commission: 0.0,
            margin_used: 0.0,
        }
    }
}
