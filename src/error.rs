//! Error types used by the tracking runtime.
//!
//! - [`TrackingError`]: failures of session control operations (start, ingest, pause, ...).
//! - [`Rejection`]: why the geo validator refused a raw location sample.
//! - [`SubscriptionError`]: membership management failures.
//! - [`CatalogError`]: the read-only catalog could not be loaded.
//! - [`RuntimeError`]: failures of the runtime itself (shutdown).
//!
//! Every enum exposes `as_label()`, a short stable snake_case reason code suitable for
//! logs, metrics and wire responses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::broadcast::Role;
use crate::ids::{BusId, GeofenceId, ObserverId, SessionId};
use crate::session::SessionStatus;

/// Error taxonomy bucket for a [`TrackingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; rejected synchronously, state untouched.
    Validation,
    /// The request does not fit the session's current state.
    State,
    /// The session actor or the runtime is not reachable.
    Unavailable,
}

/// Reason a raw sample was refused by the [`GeoValidator`](crate::GeoValidator).
///
/// Checks run in a fixed order (bounds, monotonicity, ranges), so the first
/// failing check determines the variant.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Coordinates fall outside the operating bounding box.
    #[error("coordinates ({latitude}, {longitude}) outside operating region")]
    OutOfBounds { latitude: f64, longitude: f64 },

    /// Timestamp is not newer than the last accepted sample.
    #[error("sample at {received} is not newer than last sample at {last}")]
    StaleSample {
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    /// Reported speed is negative, non-finite or above the sensor maximum.
    #[error("reported speed {speed_kmh} km/h out of range")]
    InvalidSpeed { speed_kmh: f64 },

    /// Heading is outside `[0, 360)`.
    #[error("heading {heading} out of range")]
    InvalidHeading { heading: f64 },

    /// Accuracy is negative or non-finite.
    #[error("accuracy {accuracy_m} m out of range")]
    InvalidAccuracy { accuracy_m: f64 },
}

impl Rejection {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            Rejection::OutOfBounds { .. } => "out_of_bounds",
            Rejection::StaleSample { .. } => "stale_sample",
            Rejection::InvalidSpeed { .. } => "invalid_speed",
            Rejection::InvalidHeading { .. } => "invalid_heading",
            Rejection::InvalidAccuracy { .. } => "invalid_accuracy",
        }
    }
}

/// Errors returned by session control operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    /// Driver descriptor is malformed.
    #[error("invalid driver: {reason}")]
    InvalidDriver { reason: String },

    /// Session settings are malformed.
    #[error("invalid settings: {reason}")]
    InvalidSettings { reason: String },

    /// The initial sample of a new session was refused.
    #[error("invalid initial location: {reason}")]
    InvalidLocation { reason: Rejection },

    /// A live session already exists for this bus.
    #[error("bus {bus_id} already has live session {existing}")]
    DuplicateSession { bus_id: BusId, existing: SessionId },

    /// No session is registered under this id.
    #[error("session {session_id} not found")]
    SessionNotFound { session_id: SessionId },

    /// Sample timestamp is not newer than the last accepted one.
    #[error("stale sample: received {received}, last {last}")]
    StaleSample {
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    /// Sample coordinates are outside the operating region.
    #[error("coordinates ({latitude}, {longitude}) outside operating region")]
    OutOfBounds { latitude: f64, longitude: f64 },

    /// Sample has an out-of-range speed, heading or accuracy.
    #[error("invalid sample: {reason}")]
    InvalidSample { reason: Rejection },

    /// Session is `stopped` or `completed`.
    #[error("session is terminated ({status})")]
    SessionTerminated { status: SessionStatus },

    /// The session already has an open emergency.
    #[error("emergency already open since {opened_at}")]
    EmergencyAlreadyOpen { opened_at: DateTime<Utc> },

    /// Resolution requested but nothing is open.
    #[error("no open emergency")]
    NoOpenEmergency,

    /// The current state does not permit the requested action.
    #[error("cannot {action} a session in state {from}")]
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },

    /// The session actor is gone or the runtime is shutting down.
    #[error("session {session_id} unavailable")]
    SessionUnavailable { session_id: SessionId },
}

impl TrackingError {
    /// Returns a short stable label (snake_case) for logs and wire responses.
    pub fn as_label(&self) -> &'static str {
        match self {
            TrackingError::InvalidDriver { .. } => "invalid_driver",
            TrackingError::InvalidSettings { .. } => "invalid_settings",
            TrackingError::InvalidLocation { .. } => "invalid_location",
            TrackingError::DuplicateSession { .. } => "duplicate_session",
            TrackingError::SessionNotFound { .. } => "session_not_found",
            TrackingError::StaleSample { .. } => "stale_sample",
            TrackingError::OutOfBounds { .. } => "out_of_bounds",
            TrackingError::InvalidSample { .. } => "invalid_sample",
            TrackingError::SessionTerminated { .. } => "session_terminated",
            TrackingError::EmergencyAlreadyOpen { .. } => "emergency_already_open",
            TrackingError::NoOpenEmergency => "no_open_emergency",
            TrackingError::InvalidTransition { .. } => "invalid_transition",
            TrackingError::SessionUnavailable { .. } => "session_unavailable",
        }
    }

    /// Classifies the error into the validation / state / unavailable buckets.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrackingError::InvalidDriver { .. }
            | TrackingError::InvalidSettings { .. }
            | TrackingError::InvalidLocation { .. }
            | TrackingError::StaleSample { .. }
            | TrackingError::OutOfBounds { .. }
            | TrackingError::InvalidSample { .. } => ErrorKind::Validation,
            TrackingError::DuplicateSession { .. }
            | TrackingError::SessionNotFound { .. }
            | TrackingError::SessionTerminated { .. }
            | TrackingError::EmergencyAlreadyOpen { .. }
            | TrackingError::NoOpenEmergency
            | TrackingError::InvalidTransition { .. } => ErrorKind::State,
            TrackingError::SessionUnavailable { .. } => ErrorKind::Unavailable,
        }
    }
}

impl From<Rejection> for TrackingError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::OutOfBounds {
                latitude,
                longitude,
            } => TrackingError::OutOfBounds {
                latitude,
                longitude,
            },
            Rejection::StaleSample { last, received } => {
                TrackingError::StaleSample { last, received }
            }
            other => TrackingError::InvalidSample { reason: other },
        }
    }
}

/// Errors returned by membership management.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The observer's role may not join this topic.
    #[error("role {role} may not subscribe to {topic}")]
    InsufficientRole { role: Role, topic: String },

    /// The observer has no open stream.
    #[error("observer {observer} is not connected")]
    UnknownObserver { observer: ObserverId },

    /// A topic key could not be parsed.
    #[error("invalid topic key {raw:?}")]
    InvalidTopic { raw: String },
}

impl SubscriptionError {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            SubscriptionError::InsufficientRole { .. } => "insufficient_role",
            SubscriptionError::UnknownObserver { .. } => "unknown_observer",
            SubscriptionError::InvalidTopic { .. } => "invalid_topic",
        }
    }
}

/// Errors raised while loading the read-only catalog.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Catalog document is not valid JSON for the expected shape.
    #[error("malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Bounding box is not finite or not ordered.
    #[error("invalid operating bounding box")]
    InvalidBounds,

    /// Geofence radius outside 10–5000 m.
    #[error("geofence {id} radius {radius_m} m outside 10..=5000")]
    InvalidRadius { id: GeofenceId, radius_m: f64 },

    /// Geofence center is not a finite coordinate.
    #[error("geofence {id} has an invalid center")]
    InvalidCenter { id: GeofenceId },

    /// Two geofences share an id.
    #[error("duplicate geofence id {id}")]
    DuplicateGeofence { id: GeofenceId },
}

impl CatalogError {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            CatalogError::Malformed(_) => "catalog_malformed",
            CatalogError::InvalidBounds => "catalog_invalid_bounds",
            CatalogError::InvalidRadius { .. } => "catalog_invalid_radius",
            CatalogError::InvalidCenter { .. } => "catalog_invalid_center",
            CatalogError::DuplicateGeofence { .. } => "catalog_duplicate_geofence",
        }
    }
}

/// # Errors produced by the tracking runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some session actors did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Sessions whose actors were still running.
        stuck: Vec<SessionId>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use fleetvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_maps_to_flat_tracking_errors() {
        let err: TrackingError = Rejection::OutOfBounds {
            latitude: 1.0,
            longitude: 2.0,
        }
        .into();
        assert_eq!(err.as_label(), "out_of_bounds");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: TrackingError = Rejection::InvalidHeading { heading: 400.0 }.into();
        assert_eq!(err.as_label(), "invalid_sample");
    }

    #[test]
    fn state_errors_are_classified() {
        assert_eq!(TrackingError::NoOpenEmergency.kind(), ErrorKind::State);
        let err = TrackingError::InvalidTransition {
            from: SessionStatus::Stopped,
            action: "resume",
        };
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.to_string(), "cannot resume a session in state stopped");
    }
}
