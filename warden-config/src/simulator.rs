//! Simulator configuration.
//!
//! The simulated watcher draws offending sources from `sources`, the
//! simulated store persists bans to `state_file` between runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Seed for deterministic simulation.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Pause between two simulated detections.
    #[validate(range(min = 1, max = 60_000))]
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Addresses the simulated watcher reports as offenders.
    #[validate(length(min = 1))]
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Backends the simulated registry pretends are missing.
    #[validate(custom(function = validation::validate_backend_names))]
    #[serde(default)]
    pub unavailable_backends: Vec<String>,

    /// Where the simulated ban store keeps its state.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_seed() -> u64 {
    42
}
fn default_interval_ms() -> u64 {
    250
}
fn default_sources() -> Vec<String> {
    ["192.0.2.10", "192.0.2.11", "198.51.100.7", "203.0.113.99"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_state_file() -> PathBuf {
    PathBuf::from("state/bans.yaml")
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            interval_ms: default_interval_ms(),
            sources: default_sources(),
            unavailable_backends: Vec::new(),
            state_file: default_state_file(),
        }
    }
}
