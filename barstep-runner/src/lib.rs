//! barstep runner — configuration-driven runs on top of `barstep-core`.
//!
//! This crate provides:
//! - TOML run configuration with content-hashed run ids
//! - Bar loading from CSV, or seeded synthetic random walks
//! - Sample strategies (MA cross, buy-and-hold) built from configuration
//! - Parallel parameter sweeps over shared bars
//! - JSON reports and CSV run-log export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;
pub mod strategies;
pub mod sweep;
pub mod synthetic;

pub use config::{ConfigError, DataConfig, RunConfig, RunId, SignalFeedConfig, SignalMode, StrategyConfig};
pub use data_loader::{load_bars, LoadError, LoadedData};
pub use export::{export_json, export_run_log_csv, import_json, load_artifacts, save_artifacts};
pub use runner::{run_config, run_with_data, RunError, RunReport, SCHEMA_VERSION};
pub use strategies::ConfiguredStrategy;
pub use sweep::{ParamGrid, ParamSweep, SweepEntry, SweepResults};
pub use synthetic::SyntheticParams;

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn run_report_is_send_sync() {
        assert_send::<RunReport>();
        assert_sync::<RunReport>();
    }

    #[test]
    fn shared_inputs_are_send_sync() {
        assert_send::<RunConfig>();
        assert_sync::<RunConfig>();
        assert_send::<LoadedData>();
        assert_sync::<LoadedData>();
        assert_send::<ParamSweep>();
        assert_sync::<ParamSweep>();
    }
}
