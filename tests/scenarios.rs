//! End-to-end scenario tests driving a `SimVehicleWorld` + `ControlLoop`
//! pair tick-by-tick, no real sleeping.

use atsc_core::adapter::test_support::SimVehicleWorld;
use atsc_core::config::Config;
use atsc_core::control_loop::ControlLoop;
use atsc_core::types::{Approach, DecisionMethod, ManualCommand, Mode, VehicleId, VehicleType};

fn scratch_config(label: &str) -> Config {
    let dir = std::env::temp_dir().join(format!("atsc_scenario_{label}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    Config {
        experience_store_path: dir.join("experience.jsonl").to_string_lossy().to_string(),
        event_log_path: dir.join("events.jsonl").to_string_lossy().to_string(),
        tick_duration_seconds: 1.0,
        decision_interval_seconds: 5,
        ..Config::default()
    }
}

/// Scenario 1: uniform light traffic. Each approach gets one arrival every
/// 10s; after 120 ticks every approach has been served at least once and
/// none of them ever starved.
#[test]
fn uniform_light_traffic_serves_every_approach() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("uniform"));
    let mut served = std::collections::HashSet::new();
    let mut next_id = 0u64;

    for t in 1..=120u64 {
        for approach in Approach::ALL {
            if t % 10 == 0 {
                loop_.link_mut().place(VehicleId(next_id), approach, 0.0, VehicleType::Car);
                next_id += 1;
            }
        }
        loop_.step_once();
        let snapshot = loop_.latest_snapshot();
        if let Some(green) = snapshot.signal.green_approach {
            served.insert(green);
        }
    }

    assert_eq!(served.len(), 4, "every approach should have been granted green at least once");
}

/// Scenario 2: asymmetric load. East, south and west are permanently busy;
/// north carries no traffic at all and would never win fallback scoring, so
/// it must eventually be served through the starvation floor instead.
#[test]
fn asymmetric_load_eventually_triggers_starvation() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("asymmetric"));
    let mut next_id = 0u64;
    for approach in [Approach::East, Approach::South, Approach::West] {
        for _ in 0..10 {
            loop_.link_mut().place(VehicleId(next_id), approach, 0.0, VehicleType::Car);
            next_id += 1;
        }
    }

    let mut saw_starvation = false;
    for _ in 1..=150u64 {
        loop_.step_once();
        let snapshot = loop_.latest_snapshot();
        if snapshot.decision.method == DecisionMethod::Starvation {
            saw_starvation = true;
            assert_eq!(snapshot.signal.green_approach, Some(Approach::North));
        }
    }
    assert!(saw_starvation, "north should eventually be granted green via the starvation floor");
}

/// Scenario 3: emergency preemption. An emergency vehicle on south must be
/// granted green within a handful of ticks.
#[test]
fn emergency_vehicle_is_granted_green_quickly() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("emergency"));
    for i in 0..5u64 {
        loop_.link_mut().place(VehicleId(i), Approach::North, 0.0, VehicleType::Car);
    }
    loop_.step_once();

    loop_.link_mut().place(VehicleId(100), Approach::South, 0.0, VehicleType::Emergency);

    let mut granted_within = None;
    for tick in 1..=5u32 {
        loop_.step_once();
        let snapshot = loop_.latest_snapshot();
        if snapshot.signal.green_approach == Some(Approach::South) {
            granted_within = Some(tick);
            break;
        }
    }
    assert!(granted_within.is_some(), "south should receive green within 5 ticks of the emergency vehicle appearing");
    let snapshot = loop_.latest_snapshot();
    assert_eq!(snapshot.decision.method, DecisionMethod::Emergency);
}

/// Scenario 4: manual override is cleared the instant an emergency vehicle
/// appears.
#[test]
fn emergency_clears_an_active_manual_override() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("manual-emergency"));
    loop_.set_mode_now(Mode::Manual).unwrap();
    loop_.apply_manual_now(ManualCommand::NsGreen, 60).unwrap();

    loop_.step_once();
    let after_manual = loop_.latest_snapshot();
    assert!(after_manual.manual.active);

    loop_.link_mut().place(VehicleId(7), Approach::East, 0.0, VehicleType::Emergency);
    loop_.step_once();

    let snapshot = loop_.latest_snapshot();
    assert!(!snapshot.manual.active);
    assert_eq!(snapshot.decision.method, DecisionMethod::Emergency);
    assert_eq!(snapshot.signal.green_approach, Some(Approach::East));
}

/// Scenario 5: gap-out. A green phase with no waiting vehicles terminates
/// after three consecutive zero-wait ticks instead of running its full
/// duration.
#[test]
fn gap_out_terminates_an_empty_phase_early() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("gap-out"));
    loop_.link_mut().place(VehicleId(1), Approach::East, 0.0, VehicleType::Car);
    loop_.step_once();
    let first = loop_.latest_snapshot();
    assert_eq!(first.signal.green_approach, Some(Approach::East));
    let original_duration = first.signal.remaining_seconds;
    assert!(original_duration > 3);

    loop_.link_mut().remove(VehicleId(1));

    let mut gapped_out = false;
    for _ in 0..6u32 {
        loop_.step_once();
        let snapshot = loop_.latest_snapshot();
        if snapshot.decision.reason.contains("gap-out") || snapshot.signal.green_approach != Some(Approach::East) {
            gapped_out = true;
            break;
        }
    }
    assert!(gapped_out, "an empty phase should terminate well before its full duration elapses");
}

/// Invariant I1: at most one approach is ever reported green.
#[test]
fn single_green_invariant_holds_under_mixed_load() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("invariant-i1"));
    for i in 0..30u64 {
        let approach = Approach::ALL[(i % 4) as usize];
        loop_.link_mut().place(VehicleId(i), approach, 0.0, VehicleType::Car);
    }
    for _ in 0..60u32 {
        loop_.step_once();
        let snapshot = loop_.latest_snapshot();
        let greens = [snapshot.signal.green_approach].iter().filter(|g| g.is_some()).count();
        assert!(greens <= 1);
    }
}

/// Invariant I4: every metric stays within its documented bounds.
#[test]
fn metrics_stay_within_documented_bounds() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("invariant-i4"));
    for i in 0..60u64 {
        loop_.link_mut().place(VehicleId(i), Approach::North, 0.0, VehicleType::Car);
    }
    for _ in 0..20u32 {
        loop_.step_once();
        let snapshot = loop_.latest_snapshot();
        for metrics in snapshot.metrics.values() {
            assert!(metrics.waiting_count as f64 >= 0.0);
            assert!(metrics.avg_wait_time >= 0.0);
            assert!(metrics.congestion_percent <= 100.0);
            assert!(metrics.eta_clear_seconds >= 0.0);
        }
        for prediction in snapshot.prediction.values() {
            assert!(prediction.heavy_traffic_probability >= 0.0 && prediction.heavy_traffic_probability <= 100.0);
        }
    }
}

/// Invariant I7: a manual command of duration D expires at T+D.
#[test]
fn manual_override_expires_at_exact_duration() {
    let (mut loop_, _handle) = ControlLoop::new(SimVehicleWorld::new(), scratch_config("invariant-i7"));
    loop_.set_mode_now(Mode::Manual).unwrap();
    loop_.apply_manual_now(ManualCommand::AllRed, 10).unwrap();
    loop_.step_once();
    assert!(loop_.latest_snapshot().manual.active);

    for _ in 0..11u32 {
        loop_.step_once();
    }
    let snapshot = loop_.latest_snapshot();
    assert!(!snapshot.manual.active);
    assert_eq!(snapshot.mode, Mode::Auto);
}
