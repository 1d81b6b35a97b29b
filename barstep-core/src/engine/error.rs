//! Fatal conditions and the errors a run surfaces.

use super::strategy::StrategyError;
use crate::broker::BrokerError;
use crate::feed::SyncError;
use crate::graph::GraphError;
use crate::line::LineError;
use thiserror::Error;

/// A condition that stops the run.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("line access failed: {0}")]
    OutOfRange(#[from] LineError),

    #[error("computation failed: {0}")]
    Computation(#[from] GraphError),

    #[error("feeds cannot be aligned: {0}")]
    Synchronization(#[from] SyncError),

    #[error("broker invariant violated: {0}")]
    Broker(#[from] BrokerError),

    #[error("no data after {retries} retries")]
    DataUnavailable { retries: u32 },

    #[error("strategy failed: {0}")]
    Strategy(StrategyError),
}

/// Line and broker failures raised inside a callback keep their own kind.
impl From<StrategyError> for FatalError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::Line(err) => FatalError::OutOfRange(err),
            StrategyError::Broker(err) => FatalError::Broker(err),
            other => FatalError::Strategy(other),
        }
    }
}

/// Why an engine could not be assembled.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("indicator graph: {0}")]
    Graph(#[from] GraphError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run aborted at step {step}: {source}")]
    Aborted {
        step: usize,
        #[source]
        source: FatalError,
    },

    #[error("engine has already run")]
    AlreadyRun,
}

impl EngineError {
    /// The step at which the run stopped, if it aborted.
    pub fn step(&self) -> Option<usize> {
        match self {
            EngineError::Aborted { step, .. } => Some(*step),
            EngineError::AlreadyRun => None,
        }
    }
}
