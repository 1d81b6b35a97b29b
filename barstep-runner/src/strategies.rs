//! Sample strategies driven by [`StrategyConfig`].
//!
//! Signals are read from one feed's lines (possibly a resampled or replayed
//! feed); orders always go to the base instrument.

use barstep_core::domain::{FeedId, LineId, Order, OrderId};
use barstep_core::engine::{EngineBuilder, StepContext, Strategy, StrategyError};
use barstep_core::graph::GraphError;
use barstep_core::indicators;

use crate::config::StrategyConfig;

/// Long on a fast-over-slow SMA cross, flat on the cross back down.
#[derive(Debug)]
pub struct MaCrossStrategy {
    instrument: String,
    cross: LineId,
    size: f64,
    pending: Option<OrderId>,
    signals: usize,
}

impl MaCrossStrategy {
    pub fn signals(&self) -> usize {
        self.signals
    }
}

impl Strategy for MaCrossStrategy {
    fn watched_lines(&self) -> Vec<LineId> {
        vec![self.cross]
    }

    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        if self.pending.is_some() {
            return Ok(());
        }
        let signal = ctx.get(self.cross, 0)?;
        let held = ctx.position(&self.instrument).size;
        if signal > 0.0 && held <= 0.0 {
            self.signals += 1;
            self.pending = Some(ctx.buy(&self.instrument, self.size - held)?);
        } else if signal < 0.0 && held > 0.0 {
            self.signals += 1;
            self.pending = Some(ctx.sell(&self.instrument, held)?);
        }
        Ok(())
    }

    fn on_order(&mut self, order: &Order) -> Result<(), StrategyError> {
        if self.pending == Some(order.id) && order.status.is_terminal() {
            self.pending = None;
        }
        Ok(())
    }
}

/// Buys once, on the first step, and holds to the end.
#[derive(Debug)]
pub struct BuyAndHold {
    instrument: String,
    size: f64,
    bought: bool,
}

impl Strategy for BuyAndHold {
    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        if !self.bought {
            ctx.buy(&self.instrument, self.size)?;
            self.bought = true;
        }
        Ok(())
    }
}

/// Any strategy the runner can build from configuration.
#[derive(Debug)]
pub enum ConfiguredStrategy {
    MaCross(MaCrossStrategy),
    BuyAndHold(BuyAndHold),
}

impl ConfiguredStrategy {
    /// Register the strategy's indicators on `signal` and return it, trading
    /// `instrument`.
    pub fn build(
        config: &StrategyConfig,
        builder: &mut EngineBuilder,
        signal: FeedId,
        instrument: &str,
    ) -> Result<Self, GraphError> {
        match *config {
            StrategyConfig::MaCross { fast, slow, size } => {
                let close = builder
                    .lines(signal)
                    .map(|lines| lines.close)
                    .ok_or_else(|| GraphError::InvalidParameter {
                        op: "ma_cross".into(),
                        reason: format!("feed {signal} has no lines"),
                    })?;
                let lines = indicators::ma_cross(builder.graph(), close, fast, slow)?;
                Ok(ConfiguredStrategy::MaCross(MaCrossStrategy {
                    instrument: instrument.to_string(),
                    cross: lines.cross,
                    size,
                    pending: None,
                    signals: 0,
                }))
            }
            StrategyConfig::BuyAndHold { size } => Ok(ConfiguredStrategy::BuyAndHold(BuyAndHold {
                instrument: instrument.to_string(),
                size,
                bought: false,
            })),
        }
    }

    fn inner(&mut self) -> &mut dyn Strategy {
        match self {
            ConfiguredStrategy::MaCross(s) => s,
            ConfiguredStrategy::BuyAndHold(s) => s,
        }
    }
}

impl Strategy for ConfiguredStrategy {
    fn watched_lines(&self) -> Vec<LineId> {
        match self {
            ConfiguredStrategy::MaCross(s) => s.watched_lines(),
            ConfiguredStrategy::BuyAndHold(s) => s.watched_lines(),
        }
    }

    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        self.inner().on_step(ctx)
    }

    fn on_order(&mut self, order: &Order) -> Result<(), StrategyError> {
        self.inner().on_order(order)
    }
}
