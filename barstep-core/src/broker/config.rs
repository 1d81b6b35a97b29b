//! Broker configuration.

use super::cost::{Commission, CostModel, Slippage};
use super::BrokerError;
use super::liquidity::LiquidityPolicy;
use super::ordering::FillOrdering;
use crate::domain::Bar;
use serde::{Deserialize, Serialize};

/// Reference price for market orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarketPrice {
    #[default]
    Open,
    Close,
}

impl MarketPrice {
    pub fn pick(self, bar: &Bar) -> f64 {
        match self {
            MarketPrice::Open => bar.open,
            MarketPrice::Close => bar.close,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub starting_cash: f64,
    pub commission: Commission,
    pub slippage: Slippage,
    /// Gross exposure allowed per unit of equity. 1.0 means no margin.
    pub leverage: f64,
    /// Volume participation cap. `None` fills any size.
    pub liquidity: Option<LiquidityPolicy>,
    pub market_price: MarketPrice,
    /// Orders created in `on_open` may fill on the same step's bar.
    pub cheat_on_open: bool,
    /// Orders created in `on_step` are matched against the same step's close.
    pub cheat_on_close: bool,
    pub fill_ordering: FillOrdering,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            starting_cash: 100_000.0,
            commission: Commission::None,
            slippage: Slippage::None,
            leverage: 1.0,
            liquidity: None,
            market_price: MarketPrice::Open,
            cheat_on_open: false,
            cheat_on_close: false,
            fill_ordering: FillOrdering::Submission,
        }
    }
}

impl BrokerConfig {
    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.commission, self.slippage)
    }

    /// Whether negative cash is an invariant violation.
    pub fn cash_only(&self) -> bool {
        self.leverage <= 1.0
    }

    /// Reject settings the margin rule and liquidity cap cannot work with.
    /// Deserialized configs skip the constructors, so the engine builder
    /// checks again.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if !self.starting_cash.is_finite() || self.starting_cash < 0.0 {
            return Err(BrokerError::InvalidConfig(format!(
                "starting cash {} must be finite and non-negative",
                self.starting_cash
            )));
        }
        if !self.leverage.is_finite() || self.leverage <= 0.0 {
            return Err(BrokerError::InvalidConfig(format!(
                "leverage {} must be finite and positive",
                self.leverage
            )));
        }
        if let Some(policy) = self.liquidity {
            if !(0.0..=1.0).contains(&policy.max_participation) {
                return Err(BrokerError::InvalidConfig(format!(
                    "max participation {} must be within 0.0 to 1.0",
                    policy.max_participation
                )));
            }
        }
        Ok(())
    }
}
