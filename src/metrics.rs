//! Metrics Engine: turns per-step vehicle snapshots into
//! smoothed, defensive, per-approach metrics.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::adapter::SimulatorAdapter;
use crate::types::{
    Approach, VehicleId, ARRIVAL_DEPARTURE_WINDOW_SECONDS, MAX_QUEUE_PER_APPROACH,
    WAITING_SPEED_THRESHOLD_MPS,
};

/// A lower bound applied to every divisor in this module, so a quiet
/// approach never produces a divide-by-zero rate or ETA.
const DIVISOR_FLOOR: f64 = 0.1;

/// Per-approach tracking state, mutated every tick and cleared on
/// [`MetricsEngine::reset`].
#[derive(Debug, Clone, Default)]
struct ApproachTracking {
    in_edge: HashSet<VehicleId>,
    wait_accum: HashMap<VehicleId, f64>,
    currently_waiting: HashSet<VehicleId>,
    arrivals: VecDeque<u64>,
    departures: VecDeque<u64>,
    last_green_time: Option<u64>,
    cleared_interval_accum: u32,
    cleared_interval_snapshot: u32,
}

/// Produced per tick, immutable within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RoadMetrics {
    pub waiting_count: u32,
    pub avg_wait_time: f64,
    pub cleared_last_interval: u32,
    pub arrival_rate_vpm: f64,
    pub departure_rate_vpm: f64,
    pub time_since_last_green: u64,
    pub congestion_percent: f64,
    pub eta_clear_seconds: f64,
}

pub struct MetricsEngine {
    tracking: HashMap<Approach, ApproachTracking>,
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEngine {
    pub fn new() -> Self {
        let mut tracking = HashMap::new();
        for a in Approach::ALL {
            tracking.insert(a, ApproachTracking::default());
        }
        MetricsEngine { tracking }
    }

    /// Called every simulated second.
    pub fn update_tracking(
        &mut self,
        current_time: u64,
        adapter: &mut dyn SimulatorAdapter,
        tick_duration_seconds: f64,
    ) {
        for approach in Approach::ALL {
            let present = adapter.list_vehicles_on_edge(approach);
            let state = self.tracking.get_mut(&approach).expect("all approaches tracked");

            let new_arrivals: Vec<VehicleId> =
                present.difference(&state.in_edge).copied().collect();
            for v in new_arrivals {
                state.arrivals.push_back(current_time);
                state.wait_accum.insert(v, 0.0);
            }

            let departed: Vec<VehicleId> = state.in_edge.difference(&present).copied().collect();
            for v in departed {
                state.departures.push_back(current_time);
                state.cleared_interval_accum += 1;
                state.wait_accum.remove(&v);
                state.currently_waiting.remove(&v);
            }

            for &v in &present {
                let waiting = adapter
                    .vehicle_speed(v)
                    .map(|s| s < WAITING_SPEED_THRESHOLD_MPS)
                    .unwrap_or(false); // unknown speed => treated as not waiting
                if waiting {
                    *state.wait_accum.entry(v).or_insert(0.0) += tick_duration_seconds;
                    state.currently_waiting.insert(v);
                } else {
                    state.currently_waiting.remove(&v);
                }
            }

            evict_older_than(&mut state.arrivals, current_time, ARRIVAL_DEPARTURE_WINDOW_SECONDS);
            evict_older_than(&mut state.departures, current_time, ARRIVAL_DEPARTURE_WINDOW_SECONDS);

            state.in_edge = present;
        }
    }

    /// Records that `approach` was just granted green, for
    /// `time_since_last_green` bookkeeping.
    pub fn record_green(&mut self, approach: Approach, current_time: u64) {
        if let Some(state) = self.tracking.get_mut(&approach) {
            state.last_green_time = Some(current_time);
        }
    }

    /// Strictly derived from tracking state; no side effects.
    pub fn compute_metrics(&self, current_time: u64) -> HashMap<Approach, RoadMetrics> {
        Approach::ALL
            .into_iter()
            .map(|a| {
                let metrics = match self.tracking.get(&a) {
                    Some(state) => compute_one(state, current_time),
                    None => RoadMetrics::default(),
                };
                (a, metrics)
            })
            .collect()
    }

    /// Snapshots the running `cleared_last_interval` accumulator and resets
    /// it. Called once per decision boundary, after that boundary's metrics
    /// have been computed and published — the exposed
    /// `cleared_last_interval` therefore always reflects the *previous*
    /// decision boundary.
    pub fn finalize_decision_boundary(&mut self) {
        for state in self.tracking.values_mut() {
            state.cleared_interval_snapshot = state.cleared_interval_accum;
            state.cleared_interval_accum = 0;
        }
    }

    pub fn reset(&mut self) {
        for a in Approach::ALL {
            self.tracking.insert(a, ApproachTracking::default());
        }
    }
}

fn compute_one(state: &ApproachTracking, current_time: u64) -> RoadMetrics {
    let waiting_count = state.currently_waiting.len() as u32;

    let avg_wait_time = if state.currently_waiting.is_empty() {
        0.0
    } else {
        let sum: f64 = state
            .currently_waiting
            .iter()
            .filter_map(|v| state.wait_accum.get(v))
            .sum();
        sum / state.currently_waiting.len() as f64
    };

    let window_observed = (current_time as f64).min(ARRIVAL_DEPARTURE_WINDOW_SECONDS as f64).max(DIVISOR_FLOOR);
    let arrival_rate_vpm = state.arrivals.len() as f64 * 60.0 / window_observed;
    let departure_rate_vpm = state.departures.len() as f64 * 60.0 / window_observed;

    let time_since_last_green = match state.last_green_time {
        Some(t) => current_time.saturating_sub(t),
        None => 0,
    };

    let congestion_percent =
        (waiting_count as f64 / MAX_QUEUE_PER_APPROACH * 100.0).min(100.0);

    let departure_rate_per_second = (departure_rate_vpm / 60.0).max(DIVISOR_FLOOR);
    let eta_clear_seconds = waiting_count as f64 / departure_rate_per_second;

    RoadMetrics {
        waiting_count,
        avg_wait_time,
        cleared_last_interval: state.cleared_interval_snapshot,
        arrival_rate_vpm,
        departure_rate_vpm,
        time_since_last_green,
        congestion_percent,
        eta_clear_seconds,
    }
}

fn evict_older_than(times: &mut VecDeque<u64>, current_time: u64, window_seconds: u64) {
    while let Some(&front) = times.front() {
        if current_time.saturating_sub(front) > window_seconds {
            times.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::SimVehicleWorld;
    use crate::adapter::FaultTolerantAdapter;
    use crate::types::VehicleType;

    #[test]
    fn metrics_are_never_negative_and_bounded() {
        let mut world = SimVehicleWorld::new();
        for i in 0..50 {
            world.place(VehicleId(i), Approach::North, 0.0, VehicleType::Car);
        }
        let mut adapter = FaultTolerantAdapter::new(world);
        let mut engine = MetricsEngine::new();
        for t in 1..=5 {
            engine.update_tracking(t, &mut adapter, 1.0);
        }
        let metrics = engine.compute_metrics(5);
        for (_, m) in metrics {
            assert!(m.waiting_count as f64 >= 0.0);
            assert!(m.avg_wait_time >= 0.0);
            assert!(m.congestion_percent <= 100.0);
            assert!(m.eta_clear_seconds >= 0.0);
        }
        // 50 stopped vehicles exceed the 40-per-approach cap.
        let metrics = engine.compute_metrics(5);
        assert_eq!(metrics[&Approach::North].congestion_percent, 100.0);
    }

    #[test]
    fn wait_accum_is_monotone_while_vehicle_stays_stopped() {
        let mut world = SimVehicleWorld::new();
        world.place(VehicleId(1), Approach::East, 0.0, VehicleType::Car);
        let mut adapter = FaultTolerantAdapter::new(world);
        let mut engine = MetricsEngine::new();
        let mut last_wait = 0.0;
        for t in 1..=10 {
            engine.update_tracking(t, &mut adapter, 1.0);
            let metrics = engine.compute_metrics(t);
            let wait = metrics[&Approach::East].avg_wait_time;
            assert!(wait >= last_wait);
            last_wait = wait;
        }
        assert_eq!(last_wait, 10.0);
    }

    #[test]
    fn arrival_rate_matches_windowed_count() {
        let world = SimVehicleWorld::new();
        let mut adapter = FaultTolerantAdapter::new(world);
        let mut engine = MetricsEngine::new();
        // One new arrival every tick for 10 ticks.
        for t in 1..=10u64 {
            adapter
                .link_mut()
                .place(VehicleId(t), Approach::South, 5.0, VehicleType::Car);
            engine.update_tracking(t, &mut adapter, 1.0);
        }
        let metrics = engine.compute_metrics(10);
        // window_observed = min(60, 10) = 10; 10 arrivals * 60/10 = 60 vpm.
        assert!((metrics[&Approach::South].arrival_rate_vpm - 60.0).abs() < 1e-9);
    }

    #[test]
    fn cleared_last_interval_lags_by_one_decision_boundary() {
        let mut world = SimVehicleWorld::new();
        world.place(VehicleId(1), Approach::West, 5.0, VehicleType::Car);
        let mut adapter = FaultTolerantAdapter::new(world);
        let mut engine = MetricsEngine::new();
        engine.update_tracking(1, &mut adapter, 1.0);

        // Vehicle departs by tick 2 (removed from the world before tracking).
        adapter.link_mut().remove(VehicleId(1));
        engine.update_tracking(2, &mut adapter, 1.0);

        // Before any finalize, the snapshot is still the pre-existing (zero) value.
        let metrics = engine.compute_metrics(2);
        assert_eq!(metrics[&Approach::West].cleared_last_interval, 0);

        engine.finalize_decision_boundary();
        let metrics = engine.compute_metrics(2);
        assert_eq!(metrics[&Approach::West].cleared_last_interval, 1);

        // Without any further departures, the next finalize snapshots zero again.
        engine.finalize_decision_boundary();
        let metrics = engine.compute_metrics(2);
        assert_eq!(metrics[&Approach::West].cleared_last_interval, 0);
    }
}
