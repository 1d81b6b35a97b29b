//! Engine configuration.

use crate::broker::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub broker: BrokerConfig,
    /// Consecutive `NoData` polls tolerated before the run aborts.
    pub max_data_retries: u32,
    /// Sleep between `NoData` polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            max_data_retries: 3,
            poll_interval_ms: 100,
        }
    }
}

impl EngineConfig {
    pub fn with_broker(broker: BrokerConfig) -> Self {
        Self {
            broker,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
