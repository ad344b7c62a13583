//! Tracking sessions: data model, state machine and snapshots.
//!
//! The state machine here is synchronous and owns no concurrency; the per-session
//! actor in `core` serializes calls into it.

mod machine;
mod model;
mod snapshot;

pub use machine::{
    AppliedUpdate, ControlAck, EmergencyAck, HeartbeatLoss, ResolvedEmergency, TrackingSession,
    Transition,
};
pub use model::{
    AccuracyMode, DriverInfo, Emergency, EmergencyKind, EmergencyReport, EmergencyResolution,
    Performance, Resumable, SessionState, SessionStatus, TrackingSettings, TripPlan,
    UPDATE_INTERVAL_RANGE_S,
};
pub use snapshot::SessionSnapshot;
