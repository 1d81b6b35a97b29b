//! Parameter sweeps over the MA-cross strategy.
//!
//! Every configuration runs as an independent engine on its own rayon
//! worker. Bars are loaded once and shared read-only; one cancel token
//! stops every run between steps.

use anyhow::{Context, Result};
use barstep_core::engine::CancelToken;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{RunConfig, RunId, StrategyConfig};
use crate::data_loader::{load_bars, LoadedData};
use crate::runner::{run_with_data, RunReport};

/// Fast/slow period grid. Pairs with `fast >= slow` are skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub fast: Vec<usize>,
    pub slow: Vec<usize>,
}

impl ParamGrid {
    /// Fast 5/10/20, slow 30/50/100.
    pub fn ma_cross_default() -> Self {
        Self {
            fast: vec![5, 10, 20],
            slow: vec![30, 50, 100],
        }
    }

    /// Every valid configuration derived from `base`.
    pub fn generate_configs(&self, base: &RunConfig) -> Vec<RunConfig> {
        let size = match base.strategy {
            StrategyConfig::MaCross { size, .. } | StrategyConfig::BuyAndHold { size } => size,
        };
        let mut configs = Vec::new();
        for &fast in &self.fast {
            for &slow in &self.slow {
                if fast == 0 || fast >= slow {
                    continue;
                }
                let mut config = base.clone();
                config.name = format!("{}-{fast}x{slow}", base.name);
                config.strategy = StrategyConfig::MaCross { fast, slow, size };
                configs.push(config);
            }
        }
        configs
    }
}

/// One sweep entry: the parameters and either a report or the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    pub run_id: RunId,
    pub fast: usize,
    pub slow: usize,
    pub total_return: Option<f64>,
    pub steps: usize,
    pub trades: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepResults {
    pub entries: Vec<SweepEntry>,
    pub cancelled: bool,
}

impl SweepResults {
    /// Entry with the highest total return among successful runs.
    pub fn best(&self) -> Option<&SweepEntry> {
        self.entries
            .iter()
            .filter(|e| e.total_return.is_some())
            .max_by(|a, b| {
                a.total_return
                    .unwrap_or(f64::NEG_INFINITY)
                    .total_cmp(&b.total_return.unwrap_or(f64::NEG_INFINITY))
            })
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| e.error.is_some()).count()
    }
}

/// Sweep executor.
pub struct ParamSweep {
    parallel: bool,
    cancel: CancelToken,
}

impl Default for ParamSweep {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSweep {
    pub fn new() -> Self {
        Self {
            parallel: true,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Load `base`'s data once and sweep the grid over it.
    pub fn sweep(&self, grid: &ParamGrid, base: &RunConfig) -> Result<SweepResults> {
        let data = load_bars(&base.data).context("failed to load sweep data")?;
        self.sweep_with_data(grid, base, &data)
    }

    /// Sweep over already loaded bars. A failing run is recorded in its
    /// entry and does not stop the others.
    pub fn sweep_with_data(
        &self,
        grid: &ParamGrid,
        base: &RunConfig,
        data: &LoadedData,
    ) -> Result<SweepResults> {
        let configs = grid.generate_configs(base);
        info!(runs = configs.len(), parallel = self.parallel, "sweep starting");

        let run_one = |config: &RunConfig| -> Result<SweepEntry> {
            let (fast, slow) = match config.strategy {
                StrategyConfig::MaCross { fast, slow, .. } => (fast, slow),
                StrategyConfig::BuyAndHold { .. } => (0, 0),
            };
            let run_id = config.run_id()?;
            let entry = match run_with_data(config, data, Some(self.cancel.clone())) {
                Ok(report) => entry_from(&report, fast, slow),
                Err(e) => {
                    warn!(%run_id, error = %e, "sweep run failed");
                    SweepEntry {
                        run_id,
                        fast,
                        slow,
                        total_return: None,
                        steps: 0,
                        trades: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            Ok(entry)
        };

        let entries: Vec<SweepEntry> = if self.parallel {
            configs.par_iter().map(run_one).collect::<Result<Vec<_>>>()?
        } else {
            configs.iter().map(run_one).collect::<Result<Vec<_>>>()?
        };

        let results = SweepResults {
            entries,
            cancelled: self.cancel.is_cancelled(),
        };
        info!(
            runs = results.entries.len(),
            failures = results.failures(),
            cancelled = results.cancelled,
            "sweep finished"
        );
        Ok(results)
    }
}

fn entry_from(report: &RunReport, fast: usize, slow: usize) -> SweepEntry {
    SweepEntry {
        run_id: report.run_id.clone(),
        fast,
        slow,
        total_return: Some(report.total_return),
        steps: report.result.steps,
        trades: report.result.trades.len(),
        error: None,
    }
}
