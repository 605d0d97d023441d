use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on a single external check invocation.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Capacity of the internal broadcast bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            event_capacity: default_event_capacity(),
            stream: StreamConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WorkflowError::ConfigNotFound(path.display().to_string()))?;

        toml::from_str(&content).map_err(|e| WorkflowError::Config(e.to_string()))
    }
}

/// Reconnect behavior of the advisory event stream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// First reconnect delay; doubles on each consecutive failure.
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Cap on the reconnect delay.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_step_timeout() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    256
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}
