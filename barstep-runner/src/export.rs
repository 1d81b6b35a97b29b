//! Export — JSON reports and CSV run logs.
//!
//! Artifacts for one run:
//! - **JSON**: the full [`RunReport`], with schema versioning
//! - **CSV**: the run log (every order transition and fill) and the equity
//!   curve, for external analysis tools
//!
//! Unknown schema versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use barstep_core::analyzer::EquityPoint;
use barstep_core::domain::{RunLogEntry, RunLogEvent};

use crate::runner::{RunReport, SCHEMA_VERSION};
use crate::sweep::SweepResults;

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize RunReport to JSON")
}

pub fn import_json(json: &str) -> Result<RunReport> {
    let report: RunReport =
        serde_json::from_str(json).context("failed to deserialize RunReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// One row per run-log entry.
///
/// Columns: step, order_id, event, from, to, reason, timestamp, instrument,
/// side, price, size, commission, slippage. Transition rows leave the fill
/// columns empty and vice versa.
pub fn export_run_log_csv(entries: &[RunLogEntry]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "step",
        "order_id",
        "event",
        "from",
        "to",
        "reason",
        "timestamp",
        "instrument",
        "side",
        "price",
        "size",
        "commission",
        "slippage",
    ])?;

    for entry in entries {
        let step = entry.step.to_string();
        let order = entry.order_id.to_string();
        match &entry.event {
            RunLogEvent::Transition { from, to, reason } => {
                wtr.write_record([
                    step.as_str(),
                    &order,
                    "transition",
                    &from.to_string(),
                    &to.to_string(),
                    reason,
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                ])?;
            }
            RunLogEvent::Fill(fill) => {
                wtr.write_record([
                    step.as_str(),
                    &order,
                    "fill",
                    "",
                    "",
                    "",
                    &fill.timestamp.to_rfc3339(),
                    &fill.instrument,
                    &format!("{:?}", fill.side),
                    &format!("{:.6}", fill.price),
                    &format!("{:.6}", fill.size),
                    &format!("{:.4}", fill.commission),
                    &format!("{:.6}", fill.slippage),
                ])?;
            }
        }
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_equity_csv(points: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["step", "timestamp", "cash", "value"])?;
    for p in points {
        wtr.write_record([
            &p.step.to_string(),
            &p.timestamp.to_rfc3339(),
            &format!("{:.2}", p.cash),
            &format!("{:.2}", p.value),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_sweep_csv(results: &SweepResults) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["run_id", "fast", "slow", "total_return", "steps", "trades", "error"])?;
    for e in &results.entries {
        wtr.write_record([
            e.run_id.as_str(),
            &e.fast.to_string(),
            &e.slow.to_string(),
            &e.total_return.map(|r| format!("{r:.6}")).unwrap_or_default(),
            &e.steps.to_string(),
            &e.trades.to_string(),
            e.error.as_deref().unwrap_or(""),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `report.json`, `run_log.csv` and `equity.csv` into
/// `{output_dir}/{name}_{run_id prefix}/` and return that directory.
pub fn save_artifacts(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let prefix: String = report.run_id.chars().take(12).collect();
    let run_dir = output_dir.join(format!("{}_{prefix}", report.name));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("report.json"), export_json(report)?)?;
    std::fs::write(
        run_dir.join("run_log.csv"),
        export_run_log_csv(&report.result.run_log)?,
    )?;
    std::fs::write(run_dir.join("equity.csv"), export_equity_csv(&report.equity())?)?;

    Ok(run_dir)
}

pub fn load_artifacts(dir: &Path) -> Result<RunReport> {
    let path = dir.join("report.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}
