//! Runtime configuration. Loaded from a JSON file; every threshold defaults
//! to its documented numeric constant so tests and local demos can shrink
//! timers without touching core logic.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::AtscError;
use crate::types::{
    EMERGENCY_MIN_GREEN_SECONDS, MAX_GREEN_SECONDS, MIN_GREEN_SECONDS,
    STARVATION_THRESHOLD_SECONDS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Opaque path/address identifying the external simulator.
    pub simulator_config_path: String,
    /// Seconds between forced decision boundaries.
    pub decision_interval_seconds: u64,
    /// Duration of one control-loop tick in simulated seconds.
    pub tick_duration_seconds: f64,
    pub experience_store_path: String,
    pub event_log_path: String,
    pub starvation_threshold_seconds: u64,
    pub min_green_seconds: u32,
    pub max_green_seconds: u32,
    pub emergency_min_green_seconds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            simulator_config_path: "sumo/intersection.sumocfg".to_string(),
            decision_interval_seconds: 5,
            tick_duration_seconds: 1.0,
            experience_store_path: "experience_store.jsonl".to_string(),
            event_log_path: "event_log.jsonl".to_string(),
            starvation_threshold_seconds: STARVATION_THRESHOLD_SECONDS,
            min_green_seconds: MIN_GREEN_SECONDS,
            max_green_seconds: MAX_GREEN_SECONDS,
            emergency_min_green_seconds: EMERGENCY_MIN_GREEN_SECONDS,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, AtscError> {
        let raw = fs::read_to_string(path.as_ref())
            .map_err(|e| AtscError::PersistenceFailure(format!("reading config: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| AtscError::PersistenceFailure(format!("parsing config: {e}")))
    }
}
