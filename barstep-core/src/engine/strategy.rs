//! Strategy callbacks driven by the engine.

use super::context::StepContext;
use crate::broker::BrokerError;
use crate::domain::{LineId, Order, Trade};
use crate::line::LineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Line(#[from] LineError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Other(String),
}

/// User trading logic.
///
/// Per step the engine calls `on_prenext` until every line in
/// [`Strategy::watched_lines`] is ready, then `on_step`. Orders submitted
/// from either become eligible on the next step unless cheat-on-close is
/// configured. `on_open` runs before matching, only with cheat-on-open.
pub trait Strategy {
    /// Lines that must be ready before `on_step` is called.
    fn watched_lines(&self) -> Vec<LineId> {
        Vec::new()
    }

    fn on_start(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_prenext(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Called before matching when cheat-on-open is set. Feed lines and
    /// indicators are already recomputed for the whole current bar, so a
    /// close-derived value read here includes this bar's close. Use
    /// `ago = -1` or the open line to avoid acting on it.
    fn on_open(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError>;

    /// Every order transition, as a snapshot taken right after it.
    fn on_order(&mut self, _order: &Order) -> Result<(), StrategyError> {
        Ok(())
    }

    /// A trade opened or closed.
    fn on_trade(&mut self, _trade: &Trade) -> Result<(), StrategyError> {
        Ok(())
    }

    fn on_finish(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }
}
