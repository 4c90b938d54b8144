//! Simulator Adapter: hides the external simulator behind a
//! fixed, narrow interface. Every operation is fail-safe — a communication
//! error with the simulator is caught, logged at `debug!`, and a documented
//! safe default is returned; the control loop never terminates on a single
//! adapter fault.

use std::collections::HashSet;

use crate::types::{Approach, Group, SignalState, VehicleId, VehicleType};

/// The actual narrow I/O boundary to the external simulator: one fallible
/// call per operation, with no retry or fallback logic of its own. A real
/// binding (TraCI, an HTTP control plane, whatever the simulator exposes)
/// implements only this trait; [`FaultTolerantAdapter`] supplies the
/// fail-safety the control loop depends on.
pub trait RawSimulatorLink {
    fn step(&mut self) -> Result<(), String>;
    fn list_vehicles_on_edge(&mut self, approach: Approach) -> Result<HashSet<VehicleId>, String>;
    fn vehicle_speed(&mut self, id: VehicleId) -> Result<f64, String>;
    fn vehicle_type(&mut self, id: VehicleId) -> Result<VehicleType, String>;
    fn current_time(&mut self) -> Result<u64, String>;
    fn set_green(&mut self, approach: Approach, duration_seconds: u32) -> Result<(), String>;
    fn set_all_red(&mut self, duration_seconds: u32) -> Result<(), String>;
    fn reset(&mut self) -> Result<(), String>;
}

/// Object-safe interface the control loop depends on. All
/// operations are infallible from the caller's point of view: failures are
/// swallowed by the implementation and a safe default returned.
pub trait SimulatorAdapter {
    fn step(&mut self);
    fn list_vehicles_on_edge(&mut self, approach: Approach) -> HashSet<VehicleId>;
    /// `None` means the simulator could not report a speed for this vehicle
    /// (signal `unknown`); callers must not treat it as waiting.
    fn vehicle_speed(&mut self, id: VehicleId) -> Option<f64>;
    fn vehicle_type(&mut self, id: VehicleId) -> Option<VehicleType>;
    fn current_time(&mut self) -> u64;
    fn set_green(&mut self, approach: Approach, duration_seconds: u32);
    fn set_all_red(&mut self, duration_seconds: u32);
    /// Begins (or completes, if same-group) a transition to `to`. Returns
    /// the resulting signal state immediately; if a cross-group clearance
    /// is in progress, [`SimulatorAdapter::tick_transition`] must be called
    /// every tick until it resolves to the granted green.
    fn apply_safe_transition(&mut self, from: Option<Approach>, to: Approach, duration_seconds: u32) -> SignalState;
    /// Advances any in-flight clearance by one tick. Returns `Some(Green)`
    /// the tick the clearance completes and the green is actually issued;
    /// `None` otherwise (including when there is no pending transition).
    fn tick_transition(&mut self) -> Option<SignalState>;
    fn reset(&mut self);
}

struct PendingTransition {
    to: Approach,
    duration_seconds: u32,
    remaining_clearance: u32,
}

/// Wraps a [`RawSimulatorLink`] with fail-safe behavior, plus the
/// group-clearance sequencing of `apply_safe_transition`.
pub struct FaultTolerantAdapter<L: RawSimulatorLink> {
    link: L,
    last_known_time: u64,
    pending: Option<PendingTransition>,
}

impl<L: RawSimulatorLink> FaultTolerantAdapter<L> {
    pub fn new(link: L) -> Self {
        FaultTolerantAdapter {
            link,
            last_known_time: 0,
            pending: None,
        }
    }

    /// Direct access to the underlying link, for tests and local demos that
    /// need to script the world the adapter reports on.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

impl<L: RawSimulatorLink> SimulatorAdapter for FaultTolerantAdapter<L> {
    fn step(&mut self) {
        if let Err(e) = self.link.step() {
            log::debug!("adapter step failed: {e}");
        }
    }

    fn list_vehicles_on_edge(&mut self, approach: Approach) -> HashSet<VehicleId> {
        match self.link.list_vehicles_on_edge(approach) {
            Ok(set) => set,
            Err(e) => {
                log::debug!("list_vehicles_on_edge({approach}) failed: {e}");
                HashSet::new()
            }
        }
    }

    fn vehicle_speed(&mut self, id: VehicleId) -> Option<f64> {
        match self.link.vehicle_speed(id) {
            Ok(speed) => Some(speed),
            Err(e) => {
                log::debug!("vehicle_speed({id:?}) failed: {e}");
                None
            }
        }
    }

    fn vehicle_type(&mut self, id: VehicleId) -> Option<VehicleType> {
        match self.link.vehicle_type(id) {
            Ok(t) => Some(t),
            Err(e) => {
                log::debug!("vehicle_type({id:?}) failed: {e}");
                None
            }
        }
    }

    fn current_time(&mut self) -> u64 {
        match self.link.current_time() {
            Ok(t) => {
                // current_time must stay monotone non-decreasing even
                // across adapter faults.
                self.last_known_time = self.last_known_time.max(t);
                self.last_known_time
            }
            Err(e) => {
                log::debug!("current_time failed: {e}");
                self.last_known_time
            }
        }
    }

    fn set_green(&mut self, approach: Approach, duration_seconds: u32) {
        if let Err(e) = self.link.set_green(approach, duration_seconds) {
            log::debug!("set_green({approach}, {duration_seconds}) failed: {e}");
        }
    }

    fn set_all_red(&mut self, duration_seconds: u32) {
        if let Err(e) = self.link.set_all_red(duration_seconds) {
            log::debug!("set_all_red({duration_seconds}) failed: {e}");
        }
    }

    fn apply_safe_transition(
        &mut self,
        from: Option<Approach>,
        to: Approach,
        duration_seconds: u32,
    ) -> SignalState {
        let needs_clearance = matches!(from, Some(f) if f.group() != to.group()) && from != Some(to);
        if needs_clearance {
            self.set_all_red(crate::types::GROUP_CLEARANCE_SECONDS);
            self.pending = Some(PendingTransition {
                to,
                duration_seconds,
                remaining_clearance: crate::types::GROUP_CLEARANCE_SECONDS,
            });
            SignalState::Transitioning { from, to }
        } else {
            self.pending = None;
            self.set_green(to, duration_seconds);
            SignalState::Green {
                approach: to,
                remaining_seconds: duration_seconds,
            }
        }
    }

    fn tick_transition(&mut self) -> Option<SignalState> {
        let pending = self.pending.as_mut()?;
        if pending.remaining_clearance > 1 {
            pending.remaining_clearance -= 1;
            None
        } else {
            let to = pending.to;
            let duration = pending.duration_seconds;
            self.pending = None;
            self.set_green(to, duration);
            Some(SignalState::Green {
                approach: to,
                remaining_seconds: duration,
            })
        }
    }

    fn reset(&mut self) {
        if let Err(e) = self.link.reset() {
            log::debug!("adapter reset failed: {e}");
        }
        self.pending = None;
    }
}

/// Returns the opposing group of `a`, used by tests to sanity-check
/// clearance insertion without depending on adapter internals.
pub fn requires_clearance(from: Approach, to: Approach) -> bool {
    from.group() != to.group()
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! An in-memory [`RawSimulatorLink`] for tests and local demos: a
    //! script-driven stand-in for the external simulator, the spiritual
    //! replacement for this crate's former hand-rolled vehicle/lane
    //! bookkeeping, now scoped to exactly the adapter boundary.

    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct WorldVehicle {
        approach: Approach,
        speed: f64,
        vehicle_type: VehicleType,
    }

    /// A directly scriptable vehicle world: tests call `place`/`remove`/
    /// `set_speed` to shape what the adapter reports each tick.
    #[derive(Default)]
    pub struct SimVehicleWorld {
        time: u64,
        vehicles: HashMap<VehicleId, WorldVehicle>,
        fail_next: bool,
    }

    impl SimVehicleWorld {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn place(&mut self, id: VehicleId, approach: Approach, speed: f64, vehicle_type: VehicleType) {
            self.vehicles.insert(
                id,
                WorldVehicle {
                    approach,
                    speed,
                    vehicle_type,
                },
            );
        }

        pub fn remove(&mut self, id: VehicleId) {
            self.vehicles.remove(&id);
        }

        pub fn set_speed(&mut self, id: VehicleId, speed: f64) {
            if let Some(v) = self.vehicles.get_mut(&id) {
                v.speed = speed;
            }
        }

        pub fn time(&self) -> u64 {
            self.time
        }

        /// Makes the next single adapter call observed by the underlying
        /// link fail, to exercise the fail-safe paths in tests.
        pub fn fail_next_call(&mut self) {
            self.fail_next = true;
        }

        fn maybe_fail(&mut self) -> Result<(), String> {
            if self.fail_next {
                self.fail_next = false;
                Err("simulated adapter fault".to_string())
            } else {
                Ok(())
            }
        }
    }

    impl RawSimulatorLink for SimVehicleWorld {
        fn step(&mut self) -> Result<(), String> {
            self.maybe_fail()?;
            self.time += 1;
            Ok(())
        }

        fn list_vehicles_on_edge(&mut self, approach: Approach) -> Result<HashSet<VehicleId>, String> {
            self.maybe_fail()?;
            Ok(self
                .vehicles
                .iter()
                .filter(|(_, v)| v.approach == approach)
                .map(|(id, _)| *id)
                .collect())
        }

        fn vehicle_speed(&mut self, id: VehicleId) -> Result<f64, String> {
            self.maybe_fail()?;
            self.vehicles
                .get(&id)
                .map(|v| v.speed)
                .ok_or_else(|| format!("unknown vehicle {id:?}"))
        }

        fn vehicle_type(&mut self, id: VehicleId) -> Result<VehicleType, String> {
            self.maybe_fail()?;
            self.vehicles
                .get(&id)
                .map(|v| v.vehicle_type)
                .ok_or_else(|| format!("unknown vehicle {id:?}"))
        }

        fn current_time(&mut self) -> Result<u64, String> {
            self.maybe_fail()?;
            Ok(self.time)
        }

        fn set_green(&mut self, _approach: Approach, _duration_seconds: u32) -> Result<(), String> {
            self.maybe_fail()
        }

        fn set_all_red(&mut self, _duration_seconds: u32) -> Result<(), String> {
            self.maybe_fail()
        }

        fn reset(&mut self) -> Result<(), String> {
            self.maybe_fail()?;
            self.vehicles.clear();
            self.time = 0;
            Ok(())
        }
    }
}
