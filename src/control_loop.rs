//! Control Loop: the single logical worker binding Adapter →
//! Metrics Engine → Predictor → Experience Memory → Decision Controller →
//! Adapter, plus the command/snapshot channels that let other tasks observe
//! and steer it without touching its state directly.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::adapter::{FaultTolerantAdapter, RawSimulatorLink, SimulatorAdapter};
use crate::config::Config;
use crate::controller::{detect_emergency, Decision, DecisionController, DecisionTarget};
use crate::error::ControlError;
use crate::memory::{build_state_vector, ExperienceMemory};
use crate::metrics::{MetricsEngine, RoadMetrics};
use crate::persistence::{append_event, EventRecord};
use crate::predictor::{Prediction, Predictor};
use crate::snapshot::{build_snapshot, EmergencySummary, ManualSummary, Snapshot};
use crate::types::{Approach, ManualCommand, Mode, SignalState};

const COMMAND_QUEUE_CAPACITY: usize = 64;

pub enum ControlCommand {
    Start,
    Stop,
    GetStatus(oneshot::Sender<Snapshot>),
    GetMode(oneshot::Sender<ModeStatus>),
    SetMode { mode: Mode, respond_to: oneshot::Sender<Result<(), ControlError>> },
    ApplyManual {
        command: ManualCommand,
        duration_seconds: u64,
        respond_to: oneshot::Sender<Result<(), ControlError>>,
    },
    CancelManual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeStatus {
    pub mode: Mode,
    pub manual_active: bool,
    pub manual_command: Option<ManualCommand>,
    pub remaining_seconds: u32,
}

/// Cheaply cloneable handle returned by [`ControlLoop::spawn`].
#[derive(Clone)]
pub struct ControlHandle {
    commands: mpsc::Sender<ControlCommand>,
    snapshots: watch::Receiver<Snapshot>,
}

impl ControlHandle {
    pub async fn start(&self) {
        let _ = self.commands.send(ControlCommand::Start).await;
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(ControlCommand::Stop).await;
    }

    /// Always returns the most recently published snapshot; never blocks on
    /// the loop; observers never stall the control loop.
    pub fn get_status(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn get_mode(&self) -> Option<ModeStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(ControlCommand::GetMode(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), ControlError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::SetMode { mode, respond_to: tx })
            .await
            .map_err(|_| ControlError::InvalidCommand("control loop is gone".to_string()))?;
        rx.await.map_err(|_| ControlError::InvalidCommand("control loop dropped the response".to_string()))?
    }

    pub async fn apply_manual(&self, command: ManualCommand, duration_seconds: u64) -> Result<(), ControlError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(ControlCommand::ApplyManual { command, duration_seconds, respond_to: tx })
            .await
            .map_err(|_| ControlError::InvalidCommand("control loop is gone".to_string()))?;
        rx.await.map_err(|_| ControlError::InvalidCommand("control loop dropped the response".to_string()))?
    }

    pub async fn cancel_manual(&self) {
        let _ = self.commands.send(ControlCommand::CancelManual).await;
    }
}

/// Bookkeeping for the reward observed once the current phase ends: the
/// reward recorded for a decision is computed at the decision after it.
struct PhaseAccumulator {
    approach: Approach,
    state_vector: Vec<f64>,
    departures: u32,
    wait_seconds: f64,
}

pub struct ControlLoop<L: RawSimulatorLink> {
    adapter: FaultTolerantAdapter<L>,
    metrics: MetricsEngine,
    predictor: Predictor,
    memory: ExperienceMemory,
    controller: DecisionController,
    config: Config,
    commands: mpsc::Receiver<ControlCommand>,
    snapshot_tx: watch::Sender<Snapshot>,
    running: bool,
    applied_green: Option<Approach>,
    phase_acc: Option<PhaseAccumulator>,
}

impl<L: RawSimulatorLink + Send + 'static> ControlLoop<L> {
    pub fn new(link: L, config: Config) -> (Self, ControlHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snap_tx, snap_rx) = watch::channel(Snapshot::initial());
        let loop_ = ControlLoop {
            adapter: FaultTolerantAdapter::new(link),
            metrics: MetricsEngine::new(),
            predictor: Predictor::new(),
            memory: ExperienceMemory::load_from(&config.experience_store_path).unwrap_or_default(),
            controller: DecisionController::new(&config),
            config,
            commands: cmd_rx,
            snapshot_tx: snap_tx,
            running: true,
            applied_green: None,
            phase_acc: None,
        };
        let handle = ControlHandle { commands: cmd_tx, snapshots: snap_rx };
        (loop_, handle)
    }

    /// Spawns the loop as a Tokio task and returns a handle to steer it
    /// as the ambient binding a real process entry point would use.
    pub fn spawn(link: L, config: Config) -> (tokio::task::JoinHandle<()>, ControlHandle) {
        let (loop_, handle) = ControlLoop::new(link, config);
        let join = tokio::spawn(loop_.run());
        (join, handle)
    }

    pub async fn run(mut self) {
        let tick_duration = Duration::from_secs_f64(self.config.tick_duration_seconds.max(0.001));
        let mut ticker = tokio::time::interval(tick_duration);
        loop {
            ticker.tick().await;
            while let Ok(cmd) = self.commands.try_recv() {
                self.handle_command(cmd);
            }
            if !self.running {
                continue;
            }
            self.tick_once();
        }
    }

    fn handle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Start => self.running = true,
            ControlCommand::Stop => self.running = false,
            ControlCommand::GetStatus(tx) => {
                let _ = tx.send(self.snapshot_tx.borrow().clone());
            }
            ControlCommand::GetMode(tx) => {
                let _ = tx.send(self.mode_status());
            }
            ControlCommand::SetMode { mode, respond_to } => {
                let _ = respond_to.send(self.try_set_mode(mode));
            }
            ControlCommand::ApplyManual { command, duration_seconds, respond_to } => {
                let result = self.try_apply_manual(command, duration_seconds);
                let _ = respond_to.send(result);
            }
            ControlCommand::CancelManual => {
                self.controller.cancel_manual();
            }
        }
    }

    fn mode_status(&self) -> ModeStatus {
        let manual = self.controller.manual_state();
        ModeStatus {
            mode: self.controller.mode(),
            manual_active: manual.is_some(),
            manual_command: manual.map(|m| m.command),
            remaining_seconds: manual
                .map(|m| m.expires_at.saturating_sub(self.adapter_known_time()) as u32)
                .unwrap_or(0),
        }
    }

    fn adapter_known_time(&self) -> u64 {
        // `current_time()` requires `&mut self`; the loop is the sole owner
        // of the adapter and this is only read between ticks, so a cached
        // copy on the controller's last decision time would duplicate state.
        // Reuse the last published snapshot's time instead.
        self.snapshot_tx.borrow().time
    }

    fn emergency_is_active(&mut self) -> bool {
        detect_emergency(&mut self.adapter).is_some()
    }

    fn try_set_mode(&mut self, mode: Mode) -> Result<(), ControlError> {
        if self.emergency_is_active() {
            return Err(ControlError::ConstraintViolation(
                "cannot change mode while emergency preemption is active".to_string(),
            ));
        }
        self.controller.set_mode(mode);
        Ok(())
    }

    fn try_apply_manual(&mut self, command: ManualCommand, duration_seconds: u64) -> Result<(), ControlError> {
        if self.emergency_is_active() {
            return Err(ControlError::ConstraintViolation(
                "cannot apply a manual override while emergency preemption is active".to_string(),
            ));
        }
        if self.controller.mode() == Mode::Auto {
            return Err(ControlError::InvalidCommand(
                "apply_manual requires MANUAL mode; call set_mode(MANUAL) first".to_string(),
            ));
        }
        if !(10..=120).contains(&duration_seconds) {
            return Err(ControlError::ConstraintViolation(format!(
                "manual duration {duration_seconds}s out of range [10, 120]"
            )));
        }
        let t = self.snapshot_tx.borrow().time;
        self.controller.apply_manual(command, t, duration_seconds);
        Ok(())
    }

    /// Advances the loop by exactly one simulated second: step, track,
    /// decide, publish. Exposed so scenario tests can drive the loop
    /// tick-by-tick without any real sleeping.
    pub fn step_once(&mut self) {
        self.tick_once();
    }

    /// The most recently published snapshot, without going through the
    /// command channel.
    pub fn latest_snapshot(&self) -> Snapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Direct access to the underlying simulator link, for tests that need
    /// to script vehicle presence directly rather than through the adapter.
    pub fn link_mut(&mut self) -> &mut L {
        self.adapter.link_mut()
    }

    /// Synchronous equivalent of [`ControlHandle::set_mode`], for scenario
    /// tests driving the loop with `step_once` instead of `run`.
    pub fn set_mode_now(&mut self, mode: Mode) -> Result<(), ControlError> {
        self.try_set_mode(mode)
    }

    /// Synchronous equivalent of [`ControlHandle::apply_manual`].
    pub fn apply_manual_now(&mut self, command: ManualCommand, duration_seconds: u64) -> Result<(), ControlError> {
        self.try_apply_manual(command, duration_seconds)
    }

    /// Synchronous equivalent of [`ControlHandle::cancel_manual`].
    pub fn cancel_manual_now(&mut self) -> bool {
        self.controller.cancel_manual()
    }

    fn tick_once(&mut self) {
        self.adapter.step();
        if let Some(SignalState::Green { approach, .. }) = self.adapter.tick_transition() {
            self.applied_green = Some(approach);
            self.metrics.record_green(approach, self.adapter.current_time());
        }

        let t = self.adapter.current_time();
        self.metrics.update_tracking(t, &mut self.adapter, self.config.tick_duration_seconds);
        let metrics = self.metrics.compute_metrics(t);
        let predictions = self.predictor.predict(&metrics, t);
        let decision = self.controller.decide(t, &mut self.adapter, &metrics, &predictions, &self.memory);

        self.accumulate_phase(&metrics);
        self.apply_decision(&decision, &metrics, t);

        if t % self.config.decision_interval_seconds.max(1) == 0 {
            self.metrics.finalize_decision_boundary();
        }

        if let Some(event) = &decision.mode_event {
            self.log_event(t, "mode_event", serde_json::json!({ "message": event }));
        }

        self.publish_snapshot(t, &decision, metrics, predictions);
    }

    fn accumulate_phase(&mut self, metrics: &HashMap<Approach, RoadMetrics>) {
        if let Some(acc) = self.phase_acc.as_mut() {
            if let Some(m) = metrics.get(&acc.approach) {
                acc.wait_seconds += m.avg_wait_time;
                acc.departures += m.cleared_last_interval;
            }
        }
    }

    fn apply_decision(&mut self, decision: &Decision, metrics: &HashMap<Approach, RoadMetrics>, t: u64) {
        match decision.target {
            DecisionTarget::Approach(approach) => {
                if self.applied_green != Some(approach) {
                    self.finish_phase(t);
                    let state = self.adapter.apply_safe_transition(self.applied_green, approach, decision.duration_seconds);
                    match state {
                        SignalState::Green { .. } => {
                            self.applied_green = Some(approach);
                            self.metrics.record_green(approach, t);
                        }
                        // Cross-group switch: the adapter is clearing through
                        // all-red before `approach` actually lights up.
                        // Nothing is physically green this tick.
                        SignalState::Transitioning { .. } | SignalState::AllRed { .. } => {
                            self.applied_green = None;
                        }
                    }
                    self.start_phase(approach, metrics);
                    self.log_event(
                        t,
                        "decision",
                        serde_json::json!({
                            "method": decision.explanation.method.to_string(),
                            "reason": decision.explanation.reason,
                            "approach": approach.to_string(),
                        }),
                    );
                }
            }
            DecisionTarget::AllRed => {
                if self.applied_green.is_some() {
                    self.finish_phase(t);
                    self.adapter.set_all_red(decision.duration_seconds);
                    self.applied_green = None;
                }
            }
        }
    }

    fn start_phase(&mut self, approach: Approach, metrics: &HashMap<Approach, RoadMetrics>) {
        self.phase_acc = Some(PhaseAccumulator {
            approach,
            state_vector: build_state_vector(metrics),
            departures: 0,
            wait_seconds: 0.0,
        });
    }

    /// Records the reward for the phase that just ended:
    /// `departures - 0.05*wait`, clamped to [-100, 100].
    fn finish_phase(&mut self, t: u64) {
        let Some(acc) = self.phase_acc.take() else { return };
        let reward = (acc.departures as f64 - 0.05 * acc.wait_seconds).clamp(-100.0, 100.0);
        self.memory.record(acc.state_vector.clone(), acc.approach, reward, t);
        let record = crate::memory::ExperienceRecord {
            state_vector: acc.state_vector,
            chosen_approach: acc.approach,
            reward,
            timestamp: t,
        };
        if let Err(e) = self.memory.append_one(&self.config.experience_store_path, &record) {
            log::warn!("failed to persist experience record: {e}");
        }
    }

    fn log_event(&self, t: u64, kind: &str, payload: serde_json::Value) {
        let event = EventRecord::new(t, kind, payload);
        if let Err(e) = append_event(&self.config.event_log_path, &event) {
            log::warn!("failed to append event log entry: {e}");
        }
    }

    fn publish_snapshot(
        &mut self,
        t: u64,
        decision: &Decision,
        metrics: HashMap<Approach, RoadMetrics>,
        predictions: HashMap<Approach, Prediction>,
    ) {
        let manual_state = self.controller.manual_state();
        let manual = ManualSummary {
            active: manual_state.is_some(),
            command: manual_state.map(|m| m.command),
            remaining_seconds: manual_state.map(|m| m.expires_at.saturating_sub(t) as u32).unwrap_or(0),
        };
        let emergency_approach = detect_emergency(&mut self.adapter);
        let emergency = EmergencySummary { active: emergency_approach.is_some(), approach: emergency_approach };
        // Mirrors `applied_green`: a cross-group switch reports zero
        // remaining seconds on the approach that isn't physically green
        // yet, rather than pairing a stale `green_approach` with the new
        // phase's full duration.
        let remaining_seconds = match decision.target {
            DecisionTarget::Approach(approach) if self.applied_green == Some(approach) => decision.duration_seconds,
            DecisionTarget::Approach(_) => 0,
            DecisionTarget::AllRed => decision.duration_seconds,
        };

        let snapshot = build_snapshot(
            t,
            self.applied_green,
            remaining_seconds,
            self.controller.mode(),
            manual,
            emergency,
            decision,
            metrics,
            predictions,
        );
        let _ = self.snapshot_tx.send(snapshot);
    }
}
