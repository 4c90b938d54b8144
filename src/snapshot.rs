//! Snapshot schema: the read-only view published to observers once
//! per tick.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::controller::Decision;
use crate::metrics::RoadMetrics;
use crate::predictor::Prediction;
use crate::types::{Approach, Explanation, ManualCommand, Mode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub green_approach: Option<Approach>,
    pub remaining_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualSummary {
    pub active: bool,
    pub command: Option<ManualCommand>,
    pub remaining_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencySummary {
    pub active: bool,
    pub approach: Option<Approach>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: u64,
    pub signal: SignalSummary,
    pub mode: Mode,
    pub manual: ManualSummary,
    pub emergency: EmergencySummary,
    pub decision: Explanation,
    pub metrics: HashMap<Approach, RoadMetrics>,
    pub prediction: HashMap<Approach, Prediction>,
}

impl Snapshot {
    /// Published before the loop has taken its first tick; also the value a
    /// fresh `watch` channel starts with.
    pub fn initial() -> Self {
        Snapshot {
            time: 0,
            signal: SignalSummary { green_approach: None, remaining_seconds: 0 },
            mode: Mode::Auto,
            manual: ManualSummary { active: false, command: None, remaining_seconds: 0 },
            emergency: EmergencySummary { active: false, approach: None },
            decision: Explanation {
                method: crate::types::DecisionMethod::Hold,
                reason: "loop not yet started".to_string(),
            },
            metrics: HashMap::new(),
            prediction: HashMap::new(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_snapshot(
    time: u64,
    applied_green: Option<Approach>,
    remaining_seconds: u32,
    mode: Mode,
    manual: ManualSummary,
    emergency: EmergencySummary,
    decision: &Decision,
    metrics: HashMap<Approach, RoadMetrics>,
    prediction: HashMap<Approach, Prediction>,
) -> Snapshot {
    Snapshot {
        time,
        signal: SignalSummary { green_approach: applied_green, remaining_seconds },
        mode,
        manual,
        emergency,
        decision: decision.explanation.clone(),
        metrics,
        prediction,
    }
}
