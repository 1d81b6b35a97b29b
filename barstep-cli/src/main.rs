//! barstep CLI — run and sweep commands.
//!
//! Commands:
//! - `run` — execute one backtest from a TOML config file
//! - `sweep` — run an MA-cross parameter grid in parallel over the config's data
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use barstep_runner::export::export_sweep_csv;
use barstep_runner::{run_config, save_artifacts, ParamGrid, ParamSweep, RunConfig};

#[derive(Parser)]
#[command(name = "barstep", about = "barstep — synchronized bar-stepping backtest engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for the report and run log.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Print the full JSON report to stdout instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Sweep MA-cross periods over the data named by a config file.
    Sweep {
        /// Path to a TOML config file (its strategy size and engine settings are kept).
        #[arg(long)]
        config: PathBuf,

        /// Fast periods, comma separated.
        #[arg(long, value_delimiter = ',', default_values_t = vec![5, 10, 20])]
        fast: Vec<usize>,

        /// Slow periods, comma separated.
        #[arg(long, value_delimiter = ',', default_values_t = vec![30, 50, 100])]
        slow: Vec<usize>,

        /// Run configurations one after another.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Write the sweep table as CSV here.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output_dir,
            json,
        } => run_cmd(config, output_dir, json),
        Commands::Sweep {
            config,
            fast,
            slow,
            sequential,
            output,
        } => sweep_cmd(config, fast, slow, sequential, output),
    }
}

fn run_cmd(config_path: PathBuf, output_dir: PathBuf, json: bool) -> Result<()> {
    let config = RunConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let report = run_config(&config, None)?;
    let dir = save_artifacts(&report, &output_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        println!("artifacts: {}", dir.display());
    }
    Ok(())
}

fn sweep_cmd(
    config_path: PathBuf,
    fast: Vec<usize>,
    slow: Vec<usize>,
    sequential: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let base = RunConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let grid = ParamGrid { fast, slow };
    if grid.generate_configs(&base).is_empty() {
        bail!("grid has no valid fast < slow pairs");
    }

    let results = ParamSweep::new()
        .with_parallelism(!sequential)
        .sweep(&grid, &base)?;

    println!("{:>6} {:>6} {:>10} {:>7} {:>7}", "fast", "slow", "return", "trades", "steps");
    for e in &results.entries {
        match (e.total_return, &e.error) {
            (Some(r), _) => println!(
                "{:>6} {:>6} {:>9.2}% {:>7} {:>7}",
                e.fast,
                e.slow,
                r * 100.0,
                e.trades,
                e.steps
            ),
            (None, Some(err)) => println!("{:>6} {:>6} failed: {err}", e.fast, e.slow),
            (None, None) => {}
        }
    }
    if let Some(best) = results.best() {
        println!("best: fast={} slow={}", best.fast, best.slow);
    }

    if let Some(path) = output {
        std::fs::write(&path, export_sweep_csv(&results)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
