//! # Events emitted by session actors and the runtime.
//!
//! [`Payload`] is a tagged union, one variant per event class; [`EventKind`] is
//! its flat classifier for cheap matching. [`Event`] adds the envelope:
//! a global sequence number, a timestamp and the originating session identity.
//!
//! ## Observer-facing kinds
//! `connected`, `location_update`, `tracking_alert`, `emergency_alert`,
//! `status_changed`, `emergency_resolved`.
//!
//! ## Runtime kinds (internal bus only)
//! `session_opened`, `session_closed`, `observer_lagged`, `sink_overflow`,
//! `sink_panicked`, `shutdown_requested`, `all_stopped_within_grace`, `grace_exceeded`.
//!
//! ## Ordering
//! `seq` increases monotonically across the process. Events of one session are
//! created and published by that session's actor, so their `seq` order is also
//! their apply order.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alerts::{Alert, AlertResolution};
use crate::broadcast::Role;
use crate::geo::LocationSample;
use crate::ids::{BusId, ObserverId, RouteId, SessionId, TripId};
use crate::session::{Emergency, Performance, SessionStatus, Transition};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identity of the session an event originated from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub session_id: SessionId,
    pub trip_id: TripId,
    pub bus_id: BusId,
    pub route_id: RouteId,
}

/// Why a session actor exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Terminal retention window elapsed.
    Archived,
    /// Offline for longer than the offline retention window.
    OfflineReaped,
    /// Removed explicitly or runtime shutting down.
    Cancelled,
}

/// Event data, one variant per event class.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Connected {
        observer_id: ObserverId,
        role: Role,
    },
    LocationUpdate {
        sample: LocationSample,
        status: SessionStatus,
        performance: Performance,
    },
    TrackingAlert {
        alert: Alert,
    },
    EmergencyAlert {
        alert: Alert,
        emergency: Emergency,
    },
    StatusChanged {
        transition: Transition,
    },
    EmergencyResolved {
        resolution: AlertResolution,
    },
    SessionOpened {
        status: SessionStatus,
    },
    SessionClosed {
        status: SessionStatus,
        reason: CloseReason,
    },
    ObserverLagged {
        observer_id: ObserverId,
        skipped: u64,
    },
    SinkOverflow {
        sink: &'static str,
        reason: &'static str,
    },
    SinkPanicked {
        sink: &'static str,
        info: String,
    },
    ShutdownRequested,
    AllStoppedWithinGrace,
    GraceExceeded,
}

/// Flat classification of [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    LocationUpdate,
    TrackingAlert,
    EmergencyAlert,
    StatusChanged,
    EmergencyResolved,
    SessionOpened,
    SessionClosed,
    ObserverLagged,
    SinkOverflow,
    SinkPanicked,
    ShutdownRequested,
    AllStoppedWithinGrace,
    GraceExceeded,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::LocationUpdate => "location_update",
            EventKind::TrackingAlert => "tracking_alert",
            EventKind::EmergencyAlert => "emergency_alert",
            EventKind::StatusChanged => "status_changed",
            EventKind::EmergencyResolved => "emergency_resolved",
            EventKind::SessionOpened => "session_opened",
            EventKind::SessionClosed => "session_closed",
            EventKind::ObserverLagged => "observer_lagged",
            EventKind::SinkOverflow => "sink_overflow",
            EventKind::SinkPanicked => "sink_panicked",
            EventKind::ShutdownRequested => "shutdown_requested",
            EventKind::AllStoppedWithinGrace => "all_stopped_within_grace",
            EventKind::GraceExceeded => "grace_exceeded",
        }
    }
}

impl Payload {
    /// Flat kind of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Connected { .. } => EventKind::Connected,
            Payload::LocationUpdate { .. } => EventKind::LocationUpdate,
            Payload::TrackingAlert { .. } => EventKind::TrackingAlert,
            Payload::EmergencyAlert { .. } => EventKind::EmergencyAlert,
            Payload::StatusChanged { .. } => EventKind::StatusChanged,
            Payload::EmergencyResolved { .. } => EventKind::EmergencyResolved,
            Payload::SessionOpened { .. } => EventKind::SessionOpened,
            Payload::SessionClosed { .. } => EventKind::SessionClosed,
            Payload::ObserverLagged { .. } => EventKind::ObserverLagged,
            Payload::SinkOverflow { .. } => EventKind::SinkOverflow,
            Payload::SinkPanicked { .. } => EventKind::SinkPanicked,
            Payload::ShutdownRequested => EventKind::ShutdownRequested,
            Payload::AllStoppedWithinGrace => EventKind::AllStoppedWithinGrace,
            Payload::GraceExceeded => EventKind::GraceExceeded,
        }
    }
}

/// Event envelope.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - `origin`: set for every session-scoped event
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Event {
    /// Creates an event with the current timestamp and the next sequence number.
    pub fn new(payload: Payload) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: Utc::now(),
            origin: None,
            payload,
        }
    }

    /// Attaches the originating session identity.
    #[inline]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Flat kind of the payload.
    #[inline]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Originating session, if any.
    #[inline]
    pub fn session_id(&self) -> Option<SessionId> {
        self.origin.as_ref().map(|o| o.session_id)
    }

    /// Creates a sink overflow event.
    #[inline]
    pub fn sink_overflow(sink: &'static str, reason: &'static str) -> Self {
        Event::new(Payload::SinkOverflow { sink, reason })
    }

    /// Creates a sink panic event.
    #[inline]
    pub fn sink_panicked(sink: &'static str, info: String) -> Self {
        Event::new(Payload::SinkPanicked { sink, info })
    }

    #[inline]
    pub fn is_sink_overflow(&self) -> bool {
        matches!(self.payload, Payload::SinkOverflow { .. })
    }
}
