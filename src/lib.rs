//! Adaptive traffic-signal control core for a four-approach intersection
//! coupled to an external microscopic traffic simulator.

pub mod adapter;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod persistence;
pub mod predictor;
pub mod snapshot;
pub mod types;

pub use adapter::{FaultTolerantAdapter, RawSimulatorLink, SimulatorAdapter};
pub use config::Config;
pub use control_loop::{ControlCommand, ControlHandle, ControlLoop, ModeStatus};
pub use controller::{Decision, DecisionController, DecisionTarget};
pub use error::{AtscError, ControlError};
pub use memory::ExperienceMemory;
pub use metrics::{MetricsEngine, RoadMetrics};
pub use predictor::{Prediction, Predictor};
pub use snapshot::Snapshot;
