//! Bar loading for the runner.
//!
//! Resolves a [`DataConfig`] into shared bars:
//! - `csv`: reads `timestamp,open,high,low,close,volume[,open_interest]`
//!   rows, validating OHLC sanity and strictly increasing timestamps
//! - `synthetic`: generates a seeded random walk
//!
//! Every load carries a BLAKE3 hash over the bar data so results can be
//! traced back to the exact dataset.

use barstep_core::domain::Bar;
use barstep_core::feed::SharedBars;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::config::DataConfig;
use crate::synthetic::{self, SyntheticParams};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: unrecognised timestamp '{value}'")]
    Timestamp { row: usize, value: String },

    #[error("row {row}: inconsistent OHLC values")]
    InsaneBar { row: usize },

    #[error("row {row}: timestamp {next} does not follow {previous}")]
    NonMonotonic {
        row: usize,
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("no bars loaded")]
    Empty,
}

/// Bars ready to feed one or many runs.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub instrument: String,
    pub bars: SharedBars,
    pub dataset_hash: String,
    pub synthetic: bool,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    open_interest: f64,
}

pub fn load_bars(config: &DataConfig) -> Result<LoadedData, LoadError> {
    let (bars, synthetic) = match config {
        DataConfig::Csv { path, .. } => (load_csv(path)?, false),
        DataConfig::Synthetic {
            bars,
            seed,
            start_price,
            volatility,
            timeframe,
            ..
        } => {
            let params = SyntheticParams {
                bars: *bars,
                seed: *seed,
                start_price: *start_price,
                volatility: *volatility,
                timeframe: *timeframe,
            };
            (synthetic::generate(&params), true)
        }
    };
    if bars.is_empty() {
        return Err(LoadError::Empty);
    }
    let dataset_hash = hash_bars(&bars);
    debug!(
        instrument = config.instrument(),
        bars = bars.len(),
        synthetic,
        "bars loaded"
    );
    Ok(LoadedData {
        instrument: config.instrument().to_string(),
        bars: bars.into(),
        dataset_hash,
        synthetic,
    })
}

pub fn load_csv(path: &Path) -> Result<Vec<Bar>, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_csv(file)
}

/// Parse bars from any CSV reader with a header row.
pub fn read_csv(reader: impl Read) -> Result<Vec<Bar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars: Vec<Bar> = Vec::new();

    for (index, record) in rdr.deserialize::<CsvRow>().enumerate() {
        let row = index + 1;
        let record = record?;
        let timestamp = parse_timestamp(&record.timestamp).ok_or_else(|| LoadError::Timestamp {
            row,
            value: record.timestamp.clone(),
        })?;
        let mut bar = Bar::new(
            timestamp,
            record.open,
            record.high,
            record.low,
            record.close,
            record.volume,
        );
        bar.open_interest = record.open_interest;

        if !bar.is_sane() {
            return Err(LoadError::InsaneBar { row });
        }
        if let Some(previous) = bars.last() {
            if bar.timestamp <= previous.timestamp {
                return Err(LoadError::NonMonotonic {
                    row,
                    previous: previous.timestamp,
                    next: bar.timestamp,
                });
            }
        }
        bars.push(bar);
    }
    Ok(bars)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or a bare date (midnight UTC).
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// BLAKE3 over every bar's timestamp and fields, in order.
pub fn hash_bars(bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in bars {
        hasher.update(&bar.timestamp.timestamp_micros().to_le_bytes());
        for value in [bar.open, bar.high, bar.low, bar.close, bar.volume, bar.open_interest] {
            hasher.update(&value.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}
