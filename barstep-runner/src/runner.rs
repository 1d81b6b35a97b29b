//! Runner — wires loaded bars, a configured strategy and the engine.
//!
//! Two entry points:
//! - `run_config()`: loads the bars named by the config, then runs. Used by the CLI.
//! - `run_with_data()`: takes pre-loaded shared bars. Used by sweeps, where
//!   many runs read the same bars concurrently.

use barstep_core::analyzer::{EquityPoint, EquityRecorder, OrderCounter, TradeList, TradeMetrics};
use barstep_core::engine::{BuildError, CancelToken, EngineBuilder, EngineError, RunResult};
use barstep_core::feed::{SyncError, VecFeed};
use barstep_core::graph::GraphError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, RunConfig, RunId, SignalMode};
use crate::data_loader::{load_bars, LoadError, LoadedData};
use crate::strategies::ConfiguredStrategy;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("feed setup error: {0}")]
    Feed(#[from] SyncError),
    #[error("indicator graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("engine setup error: {0}")]
    Build(#[from] BuildError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// A finished run with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub name: String,
    pub config: RunConfig,
    pub instrument: String,
    pub dataset_hash: String,
    pub synthetic: bool,
    pub bar_count: usize,
    pub total_return: f64,
    pub result: RunResult,
}

impl RunReport {
    /// Equity points recorded by the equity analyzer.
    pub fn equity(&self) -> Vec<EquityPoint> {
        self.result
            .analyses
            .get("equity")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> String {
        format!(
            "{name}: {steps} steps, {fills} fills, {trades} closed trades, final value {value:.2} ({ret:+.2}%){cancelled}",
            name = self.name,
            steps = self.result.steps,
            fills = self.result.fills.len(),
            trades = self.result.trades.len(),
            value = self.result.final_value,
            ret = self.total_return * 100.0,
            cancelled = if self.result.cancelled { " [cancelled]" } else { "" },
        )
    }
}

/// Load the configured bars and run.
pub fn run_config(config: &RunConfig, cancel: Option<CancelToken>) -> Result<RunReport, RunError> {
    config.validate()?;
    let data = load_bars(&config.data)?;
    run_with_data(config, &data, cancel)
}

/// Run against pre-loaded bars. No I/O.
pub fn run_with_data(
    config: &RunConfig,
    data: &LoadedData,
    cancel: Option<CancelToken>,
) -> Result<RunReport, RunError> {
    let run_id = config.run_id()?;
    let mut builder = EngineBuilder::new(config.engine.clone());
    if let Some(token) = cancel {
        builder.cancel_with(token);
    }

    let feed = VecFeed::new(&data.instrument, config.data.timeframe(), data.bars.clone())
        .with_compression(config.data.compression());
    let base = builder.add_feed(feed);
    let signal = match config.signal {
        None => base,
        Some(signal) => match signal.mode {
            SignalMode::Resample => {
                builder.resample(base, signal.timeframe, signal.compression)?
            }
            SignalMode::Replay => builder.replay(base, signal.timeframe, signal.compression)?,
        },
    };

    let strategy = ConfiguredStrategy::build(&config.strategy, &mut builder, signal, &data.instrument)?;
    builder.add_analyzer(Box::new(EquityRecorder::new()));
    builder.add_analyzer(Box::new(TradeList::new()));
    builder.add_analyzer(Box::new(TradeMetrics::new()));
    builder.add_analyzer(Box::new(OrderCounter::new()));

    info!(run_id = %&run_id[..12], name = %config.name, bars = data.bars.len(), "run starting");
    let mut engine = builder.build(strategy)?;
    let result = engine.run()?;
    let total_return = result.total_return(config.engine.broker.starting_cash);
    info!(
        run_id = %&run_id[..12],
        steps = result.steps,
        total_return,
        cancelled = result.cancelled,
        "run finished"
    );

    Ok(RunReport {
        schema_version: SCHEMA_VERSION,
        run_id,
        name: config.name.clone(),
        config: config.clone(),
        instrument: data.instrument.clone(),
        dataset_hash: data.dataset_hash.clone(),
        synthetic: data.synthetic,
        bar_count: data.bars.len(),
        total_return,
        result,
    })
}
