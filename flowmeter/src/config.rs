//! Application configuration
//!
//! Every component is configured by a short spec string of the form
//! `name;key=value;key=value`. The specs can come from the command
//! line or from a JSON config file; command-line values win.

use meter_cache::ring::DEFAULT_RING_CAPACITY;
use meter_common::{MeterError, MeterResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Packet source spec.
    pub input: String,
    /// Flow cache options.
    pub storage: String,
    /// Analyzer specs, in registration order.
    pub process: Vec<String>,
    /// Output sink spec.
    pub output: String,
    /// Export ring capacity.
    pub queue: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input: "bench;count=100000".into(),
            storage: String::new(),
            process: Vec::new(),
            output: "text".into(),
            queue: DEFAULT_RING_CAPACITY,
        }
    }
}

impl AppConfig {
    pub fn load(path: &str) -> MeterResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| MeterError::Config(format!("config file '{path}': {e}")))
    }
}
