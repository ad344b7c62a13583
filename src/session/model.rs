//! # Tracking session data model.
//!
//! ```text
//! TrackingSession
//!   ├─ identity:   id, trip (TripPlan), bus_id, driver
//!   ├─ state:      SessionState (tagged union; SessionStatus is its flat view)
//!   ├─ last_sample
//!   ├─ settings:   update interval, accuracy mode, alerts_enabled, share_location
//!   ├─ open_emergency (zero or one)
//!   ├─ alerts:     AlertState (geofence membership + cooldowns)
//!   └─ performance
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerts::Severity;
use crate::error::TrackingError;
use crate::geo::{Coordinates, ValidatedSample};
use crate::ids::{GeofenceId, RouteId, TripId};

/// Allowed update interval range in seconds.
pub const UPDATE_INTERVAL_RANGE_S: std::ops::RangeInclusive<u64> = 10..=300;

/// Flat session status as exposed on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Stopped,
    Completed,
    Emergency,
    Offline,
}

impl SessionStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Completed => "completed",
            SessionStatus::Emergency => "emergency",
            SessionStatus::Offline => "offline",
        }
    }

    /// `stopped` and `completed` accept nothing further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Completed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-state an offline session returns to on its next valid sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resumable {
    Active,
    Paused,
}

impl From<Resumable> for SessionState {
    fn from(r: Resumable) -> Self {
        match r {
            Resumable::Active => SessionState::Active,
            Resumable::Paused => SessionState::Paused,
        }
    }
}

/// Lifecycle state with the data each state needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
    Offline { resume_to: Resumable },
    Emergency { stop_queued: bool },
    Stopped,
    Completed,
}

impl SessionState {
    /// Flat status of this state.
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Active => SessionStatus::Active,
            SessionState::Paused => SessionStatus::Paused,
            SessionState::Offline { .. } => SessionStatus::Offline,
            SessionState::Emergency { .. } => SessionStatus::Emergency,
            SessionState::Stopped => SessionStatus::Stopped,
            SessionState::Completed => SessionStatus::Completed,
        }
    }
}

/// Driver descriptor supplied when tracking starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub phone: String,
    pub license_number: String,
}

impl DriverInfo {
    /// Creates a driver descriptor.
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        license_number: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            license_number: license_number.into(),
        }
    }

    /// Checks name, phone and licence formats.
    ///
    /// - phone: optional leading `+`, then 9–15 digits; spaces and dashes are ignored
    /// - licence: 5–20 characters, ASCII alphanumerics or `-`
    pub fn validate(&self) -> Result<(), TrackingError> {
        let invalid = |reason: &str| TrackingError::InvalidDriver {
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }

        let phone = self.phone.trim();
        let digits = phone.strip_prefix('+').unwrap_or(phone);
        let mut count = 0usize;
        for c in digits.chars() {
            match c {
                '0'..='9' => count += 1,
                ' ' | '-' => {}
                _ => return Err(invalid("phone contains invalid characters")),
            }
        }
        if !(9..=15).contains(&count) {
            return Err(invalid("phone must have 9 to 15 digits"));
        }

        let licence = self.license_number.trim();
        if !(5..=20).contains(&licence.len())
            || !licence.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(invalid("license number is malformed"));
        }
        Ok(())
    }
}

/// GPS accuracy profile requested from the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyMode {
    #[default]
    High,
    Medium,
    Low,
    BatterySaving,
}

/// Per-session tracking settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Expected seconds between samples (10–300).
    pub update_interval_s: u64,
    pub accuracy_mode: AccuracyMode,
    /// When `false`, geofence and speed alerts are not raised.
    pub alerts_enabled: bool,
    /// When `false`, location updates are kept off public trip/bus/route topics.
    pub share_location: bool,
}

impl TrackingSettings {
    /// Checks the update interval range.
    pub fn validate(&self) -> Result<(), TrackingError> {
        if !UPDATE_INTERVAL_RANGE_S.contains(&self.update_interval_s) {
            return Err(TrackingError::InvalidSettings {
                reason: format!(
                    "update interval {}s outside {}..={}",
                    self.update_interval_s,
                    UPDATE_INTERVAL_RANGE_S.start(),
                    UPDATE_INTERVAL_RANGE_S.end()
                ),
            });
        }
        Ok(())
    }

    /// Expected interval between samples.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_s)
    }

    /// Returns a copy with the given interval.
    pub fn with_update_interval(mut self, secs: u64) -> Self {
        self.update_interval_s = secs;
        self
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            update_interval_s: 30,
            accuracy_mode: AccuracyMode::High,
            alerts_enabled: true,
            share_location: true,
        }
    }
}

/// Trip boundaries received from the catalog collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripPlan {
    pub trip_id: TripId,
    pub route_id: RouteId,
    /// Geofence whose entry marks the end of the trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<GeofenceId>,
}

impl TripPlan {
    /// Creates a plan without an automatic destination.
    pub fn new(trip_id: impl Into<TripId>, route_id: impl Into<RouteId>) -> Self {
        Self {
            trip_id: trip_id.into(),
            route_id: route_id.into(),
            destination: None,
        }
    }

    /// Sets the destination geofence.
    pub fn with_destination(mut self, geofence: impl Into<GeofenceId>) -> Self {
        self.destination = Some(geofence.into());
        self
    }
}

/// Category of a reported emergency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyKind {
    Accident,
    Breakdown,
    Medical,
    Security,
    Fire,
    Other,
}

impl EmergencyKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyKind::Accident => "accident",
            EmergencyKind::Breakdown => "breakdown",
            EmergencyKind::Medical => "medical",
            EmergencyKind::Security => "security",
            EmergencyKind::Fire => "fire",
            EmergencyKind::Other => "other",
        }
    }
}

/// Emergency as reported by a driver or operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencyReport {
    pub kind: EmergencyKind,
    pub description: String,
    /// Severity the reporter asked for; recorded but overridden to `critical`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Retries carrying the same key are acknowledged instead of rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl EmergencyReport {
    /// Creates a report.
    pub fn new(kind: EmergencyKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            severity: None,
            idempotency_key: None,
        }
    }

    /// Records the severity the reporter asked for.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Attaches an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// The single open emergency of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Emergency {
    pub kind: EmergencyKind,
    pub description: String,
    pub severity: Severity,
    pub opened_at: DateTime<Utc>,
    /// Id of the `emergency_button` alert raised when it opened.
    pub alert_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Closing details supplied with `resolve_emergency`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyResolution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Cumulative per-session counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub distance_m: f64,
    /// Running mean of reported speed.
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub sample_count: u64,
}

impl Performance {
    /// Folds one accepted sample into the counters.
    pub fn record(&mut self, v: &ValidatedSample) {
        let speed = v.sample.speed_kmh;
        self.sample_count += 1;
        self.distance_m += v.distance_m;
        self.average_speed_kmh += (speed - self.average_speed_kmh) / self.sample_count as f64;
        self.max_speed_kmh = self.max_speed_kmh.max(speed);
    }
}
