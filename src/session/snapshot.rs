//! # Session snapshots for resuming after a process restart.
//!
//! A snapshot carries exactly what is needed to rebuild a session actor:
//! identity, state, last sample, settings, open emergency, geofence membership,
//! alert cooldowns and counters. The alert/event log is not part of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::machine::TrackingSession;
use super::model::{
    DriverInfo, Emergency, Performance, SessionState, SessionStatus, TrackingSettings, TripPlan,
};
use crate::alerts::AlertState;
use crate::geo::LocationSample;
use crate::ids::{BusId, SessionId};

/// Serializable image of one [`TrackingSession`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub trip: TripPlan,
    pub bus_id: BusId,
    pub driver: DriverInfo,
    pub state: SessionState,
    pub last_sample: LocationSample,
    pub settings: TrackingSettings,
    #[serde(default)]
    pub open_emergency: Option<Emergency>,
    #[serde(flatten)]
    pub alerts: AlertState,
    #[serde(default)]
    pub performance: Performance,
    pub started_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Flat status of the captured state.
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Encodes the snapshot as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a snapshot from JSON.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl TrackingSession {
    /// Captures the current session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            trip: self.trip.clone(),
            bus_id: self.bus_id.clone(),
            driver: self.driver.clone(),
            state: self.state,
            last_sample: self.last_sample.clone(),
            settings: self.settings.clone(),
            open_emergency: self.open_emergency.clone(),
            alerts: self.alerts.clone(),
            performance: self.performance,
            started_at: self.started_at,
            taken_at: Utc::now(),
        }
    }

    /// Rebuilds a session from a snapshot.
    ///
    /// An `emergency` state without an emergency record is repaired to `active`
    /// so the single-open-emergency invariant holds after restore.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let state = match (snapshot.state, &snapshot.open_emergency) {
            (SessionState::Emergency { .. }, None) => SessionState::Active,
            (state, _) => state,
        };
        Self {
            id: snapshot.session_id,
            trip: snapshot.trip,
            bus_id: snapshot.bus_id,
            driver: snapshot.driver,
            state,
            last_sample: snapshot.last_sample,
            settings: snapshot.settings,
            open_emergency: snapshot.open_emergency,
            alerts: snapshot.alerts,
            performance: snapshot.performance,
            started_at: snapshot.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::geo::Coordinates;
    use crate::ids::GeofenceId;

    fn snapshot() -> SessionSnapshot {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let mut alerts = AlertState::default();
        alerts
            .geofence_membership
            .insert(GeofenceId::from("depot"), true);
        SessionSnapshot {
            session_id: SessionId::generate(),
            trip: TripPlan::new("trip-9", "route-2"),
            bus_id: BusId::from("NB-9"),
            driver: DriverInfo::new("Kamal", "0711111111", "C7654321"),
            state: SessionState::Emergency { stop_queued: true },
            last_sample: LocationSample::at(Coordinates::new(7.0, 80.0), t0),
            settings: TrackingSettings::default(),
            open_emergency: None,
            alerts,
            performance: Performance::default(),
            started_at: t0,
            taken_at: t0,
        }
    }

    #[test]
    fn json_keeps_membership_and_state() {
        let snap = snapshot();
        let back = SessionSnapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(back, snap);
        assert!(back.alerts.is_inside(&GeofenceId::from("depot")));
    }

    #[test]
    fn restore_repairs_orphan_emergency_state() {
        let session = TrackingSession::from_snapshot(snapshot());
        assert_eq!(session.status(), SessionStatus::Active);
    }
}
