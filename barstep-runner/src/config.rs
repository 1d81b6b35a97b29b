//! Serializable run configuration, loaded from TOML.
//!
//! ```toml
//! name = "es-cross"
//!
//! [data]
//! source = "csv"
//! path = "data/es_1m.csv"
//! instrument = "ES"
//! timeframe = "minutes"
//!
//! [signal]
//! mode = "resample"
//! timeframe = "minutes"
//! compression = 5
//!
//! [strategy]
//! type = "MA_CROSS"
//! fast = 10
//! slow = 30
//! size = 1.0
//!
//! [engine.broker]
//! starting_cash = 50000.0
//! commission = { type = "PER_UNIT", amount = 2.5 }
//! ```

use barstep_core::domain::TimeFrame;
use barstep_core::engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Content hash of a [`RunConfig`].
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything needed to reproduce one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub data: DataConfig,
    /// Derive the feed the strategy reads its signal from. Orders always
    /// go to the base instrument.
    #[serde(default)]
    pub signal: Option<SignalFeedConfig>,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_name() -> String {
    "run".to_string()
}

/// Where the bars come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DataConfig {
    Csv {
        path: PathBuf,
        instrument: String,
        #[serde(default)]
        timeframe: TimeFrame,
        #[serde(default = "one")]
        compression: u32,
    },
    /// Seeded random walk.
    Synthetic {
        instrument: String,
        bars: usize,
        #[serde(default)]
        seed: u64,
        #[serde(default = "default_start_price")]
        start_price: f64,
        /// Per-bar standard deviation of returns.
        #[serde(default = "default_volatility")]
        volatility: f64,
        #[serde(default)]
        timeframe: TimeFrame,
    },
}

fn one() -> u32 {
    1
}

fn default_start_price() -> f64 {
    100.0
}

fn default_volatility() -> f64 {
    0.01
}

impl DataConfig {
    pub fn instrument(&self) -> &str {
        match self {
            DataConfig::Csv { instrument, .. } | DataConfig::Synthetic { instrument, .. } => {
                instrument
            }
        }
    }

    pub fn timeframe(&self) -> TimeFrame {
        match self {
            DataConfig::Csv { timeframe, .. } | DataConfig::Synthetic { timeframe, .. } => {
                *timeframe
            }
        }
    }

    pub fn compression(&self) -> u32 {
        match self {
            DataConfig::Csv { compression, .. } => *compression,
            DataConfig::Synthetic { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Only closed coarser bars.
    Resample,
    /// The coarser bar in progress, revised on every base bar.
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalFeedConfig {
    pub mode: SignalMode,
    pub timeframe: TimeFrame,
    pub compression: u32,
}

/// Sample strategies shipped with the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyConfig {
    /// Long when the fast SMA crosses above the slow one, flat on the
    /// cross back down.
    MaCross {
        fast: usize,
        slow: usize,
        #[serde(default = "default_size")]
        size: f64,
    },
    /// Buy once on the first step and hold.
    BuyAndHold {
        #[serde(default = "default_size")]
        size: f64,
    },
}

fn default_size() -> f64 {
    1.0
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.instrument().is_empty() {
            return Err(ConfigError::Invalid("instrument must not be empty".into()));
        }
        if let DataConfig::Synthetic {
            bars, volatility, ..
        } = &self.data
        {
            if *bars == 0 {
                return Err(ConfigError::Invalid("synthetic data needs at least one bar".into()));
            }
            if volatility.is_nan() || *volatility < 0.0 {
                return Err(ConfigError::Invalid(format!("volatility {volatility} is negative")));
            }
        }
        if let Some(signal) = &self.signal {
            if signal.compression == 0 {
                return Err(ConfigError::Invalid("signal compression must be positive".into()));
            }
        }
        match self.strategy {
            StrategyConfig::MaCross { fast, slow, size } => {
                if fast == 0 || fast >= slow {
                    return Err(ConfigError::Invalid(format!(
                        "fast period {fast} must be positive and below slow period {slow}"
                    )));
                }
                check_size(size)?;
            }
            StrategyConfig::BuyAndHold { size } => check_size(size)?,
        }
        self.engine
            .broker
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(())
    }

    /// Deterministic id: two identical configs share a `RunId`.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }
}

fn check_size(size: f64) -> Result<(), ConfigError> {
    if size > 0.0 && size.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("order size {size} must be positive")))
    }
}
