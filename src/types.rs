//! Shared data model: approaches, vehicles, signal state, mode.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four incoming directions at the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Approach {
    North,
    East,
    South,
    West,
}

impl Approach {
    pub const ALL: [Approach; 4] = [
        Approach::North,
        Approach::East,
        Approach::South,
        Approach::West,
    ];

    /// The approach that is never concurrently green with this one.
    pub fn opposite(self) -> Approach {
        match self {
            Approach::North => Approach::South,
            Approach::South => Approach::North,
            Approach::East => Approach::West,
            Approach::West => Approach::East,
        }
    }

    pub fn group(self) -> Group {
        match self {
            Approach::North | Approach::South => Group::Ns,
            Approach::East | Approach::West => Group::Ew,
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Approach::North => "north",
            Approach::East => "east",
            Approach::South => "south",
            Approach::West => "west",
        };
        write!(f, "{s}")
    }
}

/// NS = {north, south}; EW = {east, west}. Transitions between groups
/// require an all-red clearance tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Ns,
    Ew,
}

/// Opaque vehicle identifier, scoped to the vehicle's presence on an
/// approach. Never persisted beyond a tick's tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleType {
    Car,
    Bike,
    Bus,
    Truck,
    Lorry,
    Auto,
    Emergency,
}

impl VehicleType {
    pub fn is_emergency(self) -> bool {
        matches!(self, VehicleType::Emergency)
    }
}

/// The signal state machine. Exactly one approach may hold a
/// green signal, or all may be red; non-opposing approaches are never both
/// green (this system only ever grants one approach at a time).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalState {
    Green {
        approach: Approach,
        remaining_seconds: u32,
    },
    AllRed {
        remaining_seconds: u32,
    },
    Transitioning {
        from: Option<Approach>,
        to: Approach,
    },
}

impl SignalState {
    pub fn green_approach(&self) -> Option<Approach> {
        match self {
            SignalState::Green { approach, .. } => Some(*approach),
            _ => None,
        }
    }
}

/// Process-wide operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Auto,
    Manual,
}

/// Operator-issued manual command, paired with an expiry in simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualCommand {
    NsGreen,
    EwGreen,
    AllRed,
}

/// Current manual-mode bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualState {
    pub command: ManualCommand,
    pub started_at: u64,
    pub expires_at: u64,
}

/// The method that produced a decision, used for explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionMethod {
    Emergency,
    Manual,
    Starvation,
    Memory,
    Fallback,
    GapOut,
    Hold,
}

impl fmt::Display for DecisionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionMethod::Emergency => "emergency",
            DecisionMethod::Manual => "manual",
            DecisionMethod::Starvation => "starvation",
            DecisionMethod::Memory => "memory",
            DecisionMethod::Fallback => "fallback",
            DecisionMethod::GapOut => "gap_out",
            DecisionMethod::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

/// A tagged decision explanation: `(method, human_string)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub method: DecisionMethod,
    pub reason: String,
}

/// Fixed per-approach tuning constants, shared by metrics, predictor and
/// controller.
pub const WAITING_SPEED_THRESHOLD_MPS: f64 = 2.0;
pub const ARRIVAL_DEPARTURE_WINDOW_SECONDS: u64 = 60;
pub const QUEUE_HISTORY_WINDOW_SECONDS: u64 = 30;
pub const MAX_QUEUE_PER_APPROACH: f64 = 40.0;
pub const STARVATION_THRESHOLD_SECONDS: u64 = 90;
pub const MIN_GREEN_SECONDS: u32 = 10;
pub const MAX_GREEN_SECONDS: u32 = 60;
pub const EMERGENCY_MIN_GREEN_SECONDS: u32 = 15;
pub const GAP_OUT_CONSECUTIVE_ZERO_TICKS: u32 = 3;
pub const GROUP_CLEARANCE_SECONDS: u32 = 1;
