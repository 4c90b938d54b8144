//! Decision Controller: selects the next signal phase under a
//! strict priority hierarchy and derives its dynamic green duration.

use std::collections::HashMap;

use crate::adapter::SimulatorAdapter;
use crate::config::Config;
use crate::memory::{build_state_vector, ExperienceMemory};
use crate::metrics::RoadMetrics;
use crate::predictor::Prediction;
use crate::types::{
    Approach, DecisionMethod, Explanation, ManualCommand, ManualState, Mode,
    GAP_OUT_CONSECUTIVE_ZERO_TICKS,
};

const MANUAL_SUB_PHASE_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecisionTarget {
    Approach(Approach),
    AllRed,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub target: DecisionTarget,
    pub duration_seconds: u32,
    pub explanation: Explanation,
    /// Set when this tick also caused a MANUAL-mode transition (expiry or
    /// the mode flip into/out of MANUAL) worth logging as a distinct event.
    pub mode_event: Option<String>,
}

pub struct DecisionController {
    mode: Mode,
    manual: Option<ManualState>,
    current_green: Option<Approach>,
    remaining_seconds: u32,
    gap_out_ticks: u32,
    last_explanation: Explanation,
    starvation_threshold_seconds: u64,
    min_green_seconds: u32,
    max_green_seconds: u32,
    emergency_min_green_seconds: u32,
}

impl Default for DecisionController {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl DecisionController {
    /// Reads the four timing thresholds off `config` once at construction;
    /// the controller never re-reads `Config` afterwards.
    pub fn new(config: &Config) -> Self {
        DecisionController {
            mode: Mode::Auto,
            manual: None,
            current_green: None,
            remaining_seconds: 0,
            gap_out_ticks: 0,
            last_explanation: Explanation {
                method: DecisionMethod::Hold,
                reason: "no decision yet".to_string(),
            },
            starvation_threshold_seconds: config.starvation_threshold_seconds,
            min_green_seconds: config.min_green_seconds,
            max_green_seconds: config.max_green_seconds,
            emergency_min_green_seconds: config.emergency_min_green_seconds,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn current_green(&self) -> Option<Approach> {
        self.current_green
    }

    pub fn last_explanation(&self) -> &Explanation {
        &self.last_explanation
    }

    pub fn manual_state(&self) -> Option<ManualState> {
        self.manual
    }

    /// Convenience for tests and the CLI: flips into MANUAL and applies a
    /// command in one call. The control interface exposes these as two
    /// separate steps: `set_mode` then `apply_manual`.
    pub fn start_manual(&mut self, command: ManualCommand, current_time: u64, duration_seconds: u64) {
        self.set_mode(Mode::Manual);
        self.apply_manual(command, current_time, duration_seconds);
    }

    /// `set_mode(AUTO)` also clears any active manual command.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Auto {
            self.manual = None;
        }
    }

    /// Only meaningful once `mode` is already MANUAL: `apply_manual` is
    /// rejected while AUTO — callers must `set_mode(MANUAL)` first.
    pub fn apply_manual(&mut self, command: ManualCommand, current_time: u64, duration_seconds: u64) {
        self.manual = Some(ManualState {
            command,
            started_at: current_time,
            expires_at: current_time + duration_seconds,
        });
    }

    /// Returns `true` if a manual window was actually cancelled.
    pub fn cancel_manual(&mut self) -> bool {
        if self.manual.take().is_some() {
            self.mode = Mode::Auto;
            true
        } else {
            false
        }
    }

    /// Runs one tick of the priority hierarchy. Must be called
    /// exactly once per simulated second.
    pub fn decide(
        &mut self,
        current_time: u64,
        adapter: &mut dyn SimulatorAdapter,
        metrics: &HashMap<Approach, RoadMetrics>,
        predictions: &HashMap<Approach, Prediction>,
        memory: &ExperienceMemory,
    ) -> Decision {
        if let Some(approach) = detect_emergency(adapter) {
            if self.current_green != Some(approach) {
                let mut mode_event = None;
                if self.mode == Mode::Manual {
                    self.mode = Mode::Auto;
                    self.manual = None;
                    mode_event = Some("manual override cleared by emergency preemption".to_string());
                }
                let m = metrics.get(&approach).copied().unwrap_or_default();
                let duration = dynamic_duration(
                    self.emergency_min_green_seconds,
                    self.max_green_seconds,
                    m.waiting_count,
                    m.avg_wait_time,
                );
                self.current_green = Some(approach);
                self.remaining_seconds = duration;
                self.gap_out_ticks = 0;
                let explanation = Explanation {
                    method: DecisionMethod::Emergency,
                    reason: format!("emergency vehicle detected on {approach}"),
                };
                self.last_explanation = explanation.clone();
                return Decision {
                    target: DecisionTarget::Approach(approach),
                    duration_seconds: duration,
                    explanation,
                    mode_event,
                };
            }
        }

        if self.mode == Mode::Manual {
            let manual = self.manual.expect("mode Manual implies manual state set");
            if current_time >= manual.expires_at {
                self.mode = Mode::Auto;
                self.manual = None;
                // Fall through to the automatic hierarchy below, but still
                // surface the expiry as an event of its own.
                let decision = self.decide_auto(current_time, metrics, predictions, memory);
                return Decision {
                    mode_event: Some("manual override expired".to_string()),
                    ..decision
                };
            }
            return self.decide_manual(manual, current_time);
        }

        self.decide_auto(current_time, metrics, predictions, memory)
    }

    fn decide_manual(&mut self, manual: ManualState, current_time: u64) -> Decision {
        match manual.command {
            ManualCommand::AllRed => {
                self.current_green = None;
                self.remaining_seconds = (manual.expires_at - current_time) as u32;
                let explanation = Explanation {
                    method: DecisionMethod::Manual,
                    reason: "manual override holding all-red".to_string(),
                };
                self.last_explanation = explanation.clone();
                Decision {
                    target: DecisionTarget::AllRed,
                    duration_seconds: self.remaining_seconds,
                    explanation,
                    mode_event: None,
                }
            }
            ManualCommand::NsGreen => {
                self.decide_manual_alternating(manual, current_time, Approach::North, Approach::South)
            }
            ManualCommand::EwGreen => {
                self.decide_manual_alternating(manual, current_time, Approach::East, Approach::West)
            }
        }
    }

    fn decide_manual_alternating(
        &mut self,
        manual: ManualState,
        current_time: u64,
        first: Approach,
        second: Approach,
    ) -> Decision {
        let elapsed = current_time.saturating_sub(manual.started_at);
        let sub_phase_index = elapsed / MANUAL_SUB_PHASE_SECONDS;
        let side = if sub_phase_index % 2 == 0 { first } else { second };
        let remaining_in_sub_phase = MANUAL_SUB_PHASE_SECONDS - (elapsed % MANUAL_SUB_PHASE_SECONDS);
        let remaining_until_expiry = manual.expires_at.saturating_sub(current_time);
        let duration = remaining_in_sub_phase.min(remaining_until_expiry).max(1) as u32;

        self.current_green = Some(side);
        self.remaining_seconds = duration;
        let explanation = Explanation {
            method: DecisionMethod::Manual,
            reason: format!("manual override alternating to {side}"),
        };
        self.last_explanation = explanation.clone();
        Decision {
            target: DecisionTarget::Approach(side),
            duration_seconds: duration,
            explanation,
            mode_event: None,
        }
    }

    fn decide_auto(
        &mut self,
        current_time: u64,
        metrics: &HashMap<Approach, RoadMetrics>,
        predictions: &HashMap<Approach, Prediction>,
        memory: &ExperienceMemory,
    ) -> Decision {
        if let Some(current) = self.current_green {
            let waiting = metrics.get(&current).map(|m| m.waiting_count).unwrap_or(0);
            if waiting == 0 {
                self.gap_out_ticks += 1;
            } else {
                self.gap_out_ticks = 0;
            }
            if self.remaining_seconds > 0 {
                self.remaining_seconds -= 1;
            }
        }

        let gap_out = self.gap_out_ticks >= GAP_OUT_CONSECUTIVE_ZERO_TICKS;
        let boundary = self.current_green.is_none() || self.remaining_seconds == 0 || gap_out;

        if !boundary {
            let current = self.current_green.expect("boundary false implies a current green");
            let explanation = Explanation {
                method: DecisionMethod::Hold,
                reason: format!("holding green on {current}, {}s remaining", self.remaining_seconds),
            };
            self.last_explanation = explanation.clone();
            return Decision {
                target: DecisionTarget::Approach(current),
                duration_seconds: self.remaining_seconds,
                explanation,
                mode_event: None,
            };
        }

        let mode_event = if gap_out {
            Some(format!(
                "gap-out on {}",
                self.current_green.map(|a| a.to_string()).unwrap_or_default()
            ))
        } else {
            None
        };

        let (approach, method, reason) = self
            .select_starvation(metrics)
            .or_else(|| self.select_memory(current_time, metrics, memory))
            .unwrap_or_else(|| self.select_fallback(metrics, predictions));

        let m = metrics.get(&approach).copied().unwrap_or_default();
        let duration = dynamic_duration(self.min_green_seconds, self.max_green_seconds, m.waiting_count, m.avg_wait_time);

        self.current_green = Some(approach);
        self.remaining_seconds = duration;
        self.gap_out_ticks = 0;

        let explanation = Explanation { method, reason };
        self.last_explanation = explanation.clone();
        Decision {
            target: DecisionTarget::Approach(approach),
            duration_seconds: duration,
            explanation,
            mode_event,
        }
    }

    fn select_starvation(
        &self,
        metrics: &HashMap<Approach, RoadMetrics>,
    ) -> Option<(Approach, DecisionMethod, String)> {
        Approach::ALL
            .into_iter()
            .filter(|a| {
                metrics
                    .get(a)
                    .map(|m| m.time_since_last_green > self.starvation_threshold_seconds)
                    .unwrap_or(false)
            })
            .max_by_key(|a| metrics[a].time_since_last_green)
            .map(|a| {
                let starved_for = metrics[&a].time_since_last_green;
                (
                    a,
                    DecisionMethod::Starvation,
                    format!("{a} starved for {starved_for}s, exceeds the fairness floor"),
                )
            })
    }

    fn select_memory(
        &self,
        current_time: u64,
        metrics: &HashMap<Approach, RoadMetrics>,
        memory: &ExperienceMemory,
    ) -> Option<(Approach, DecisionMethod, String)> {
        let state_vector = build_state_vector(metrics);
        let matches = memory.find_similar(&state_vector, current_time);
        if !ExperienceMemory::is_confident(&matches) {
            return None;
        }
        let rewards = memory.weighted_rewards_by_approach(&matches);
        let (approach, reward) = rewards
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        Some((
            approach,
            DecisionMethod::Memory,
            format!("memory recall favors {approach} with weighted reward {reward:.2}"),
        ))
    }

    fn select_fallback(
        &self,
        metrics: &HashMap<Approach, RoadMetrics>,
        predictions: &HashMap<Approach, Prediction>,
    ) -> (Approach, DecisionMethod, String) {
        let mut best: Option<(Approach, f64)> = None;
        for approach in Approach::ALL {
            let score = composite_score(approach, metrics, predictions, self.current_green);
            let waiting = metrics.get(&approach).map(|m| m.waiting_count).unwrap_or(0);
            let better = match best {
                None => true,
                Some((b, b_score)) => {
                    score > b_score
                        || (score == b_score && waiting > metrics.get(&b).map(|m| m.waiting_count).unwrap_or(0))
                        || (score == b_score
                            && waiting == metrics.get(&b).map(|m| m.waiting_count).unwrap_or(0)
                            && approach.to_string() < b.to_string())
                }
            };
            if better {
                best = Some((approach, score));
            }
        }
        let (approach, score) = best.expect("Approach::ALL is non-empty");
        (
            approach,
            DecisionMethod::Fallback,
            format!("composite score selects {approach} (score {score:.2})"),
        )
    }
}

fn dynamic_duration(min_seconds: u32, max_seconds: u32, waiting_count: u32, avg_wait_time: f64) -> u32 {
    let raw = min_seconds as f64 + 1.0 * waiting_count as f64 + 0.5 * avg_wait_time;
    raw.clamp(min_seconds as f64, max_seconds as f64).round() as u32
}

fn composite_score(
    approach: Approach,
    metrics: &HashMap<Approach, RoadMetrics>,
    predictions: &HashMap<Approach, Prediction>,
    current_green: Option<Approach>,
) -> f64 {
    let m = metrics.get(&approach).copied().unwrap_or_default();
    let heavy = predictions
        .get(&approach)
        .map(|p| p.heavy_traffic_probability)
        .unwrap_or(0.0);
    let switch_penalty = if current_green == Some(approach) { 1.0 } else { 0.0 };
    1.0 * m.waiting_count as f64
        + 0.8 * m.avg_wait_time
        + 0.6 * m.time_since_last_green as f64
        + 0.4 * m.congestion_percent
        + 0.3 * (heavy / 100.0)
        - 1.2 * switch_penalty
}

pub(crate) fn detect_emergency(adapter: &mut dyn SimulatorAdapter) -> Option<Approach> {
    for approach in Approach::ALL {
        let vehicles = adapter.list_vehicles_on_edge(approach);
        for vehicle in vehicles {
            if adapter.vehicle_type(vehicle).map(|t| t.is_emergency()).unwrap_or(false) {
                return Some(approach);
            }
        }
    }
    None
}
