//! Crash detection and escalation engine.
//!
//! Samples flow `MotionClassifier` -> `EscalationCoordinator` -> `EscalationSink`,
//! with the replicated Safety-Flag feeding cancellation back into the
//! coordinator. A `MonitorSession` serializes every input onto one actor.

pub mod config;
pub mod error;
pub mod escalation;
pub mod logic;
pub mod model;
pub mod safety_flag;
pub mod session;
pub mod sink;
pub mod wake;


pub use escalation::{CountdownDuration, EscalationCoordinator};
pub use logic::{MotionClassifier, Thresholds};
pub use model::{
    AccidentEvent, AccidentKind, EscalationCommand, EscalationState, ResolveReason, SensorKind,
    SensorSample, SessionEvent,
};
pub use safety_flag::{ReplicatedFlag, SafetyFlag};
pub use session::{MonitorSession, SessionHandle};
