//! # Alert data model.
//!
//! Alerts are immutable once emitted. Resolving something an alert reported
//! produces a separate [`AlertResolution`] linked by `alert_id`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::geo::Coordinates;
use crate::ids::SessionId;

/// What an alert is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SpeedViolation,
    RouteDeviation,
    GeofenceEntry,
    GeofenceExit,
    EmergencyButton,
    EngineIssue,
    FuelLow,
    MaintenanceDue,
    CommunicationLoss,
}

impl AlertType {
    /// Wire name of the alert type.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::SpeedViolation => "speed_violation",
            AlertType::RouteDeviation => "route_deviation",
            AlertType::GeofenceEntry => "geofence_entry",
            AlertType::GeofenceExit => "geofence_exit",
            AlertType::EmergencyButton => "emergency_button",
            AlertType::EngineIssue => "engine_issue",
            AlertType::FuelLow => "fuel_low",
            AlertType::MaintenanceDue => "maintenance_due",
            AlertType::CommunicationLoss => "communication_loss",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Wire name of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert raised for a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub session_id: SessionId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
    /// Always `false` at emission; resolution is a separate record.
    pub resolved: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Creates an unresolved alert with a fresh id.
    pub fn new(
        session_id: SessionId,
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            alert_type,
            severity,
            message: message.into(),
            location: None,
            resolved: false,
            metadata: Map::new(),
            raised_at,
        }
    }

    /// Attaches the position where the alert was detected.
    #[inline]
    pub fn with_location(mut self, location: Coordinates) -> Self {
        self.location = Some(location);
        self
    }

    /// Attaches one metadata entry.
    #[inline]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Returns `true` for alerts that reach the emergency responders' topic.
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Linked record closing out an earlier alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertResolution {
    pub alert_id: Uuid,
    pub session_id: SessionId,
    pub resolved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_gravity() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn alert_serializes_with_snake_case_names() {
        let alert = Alert::new(
            SessionId::generate(),
            AlertType::CommunicationLoss,
            Severity::High,
            "no heartbeat",
            Utc::now(),
        )
        .with_meta("silent_for_s", 90);
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["alert_type"], "communication_loss");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["resolved"], false);
        assert_eq!(json["metadata"]["silent_for_s"], 90);
    }
}
