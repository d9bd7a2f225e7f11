//! Agent settings
//!
//! The handful of knobs the control plane reads from its own settings
//! file. The historical key spellings (`samplingInterval`,
//! `flakyNodeThreshold`, `[Dispatcher]`) are accepted as aliases so
//! existing deployments keep working.

use crate::error::Result;
use cmagent_node_control::DispatcherConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings recognized by the failover core
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Window of consecutive probe results required to flip a peer's
    /// active/inactive classification, in seconds
    #[serde(
        default = "default_sampling_interval",
        alias = "samplingInterval"
    )]
    pub sampling_interval: usize,

    /// Reserved for flaky-peer detection; read but not acted on yet
    #[serde(
        default = "default_flaky_node_threshold",
        alias = "flakyNodeThreshold"
    )]
    pub flaky_node_threshold: f64,

    /// Process dispatcher selection
    #[serde(default, alias = "Dispatcher")]
    pub dispatcher: DispatcherConfig,
}

fn default_sampling_interval() -> usize {
    30
}

fn default_flaky_node_threshold() -> f64 {
    0.5
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            flaky_node_threshold: default_flaky_node_threshold(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl AgentSettings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
