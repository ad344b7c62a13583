//! # AlertEngine: rule evaluation over validated samples.
//!
//! The engine is transport-agnostic. It reads a [`ValidatedSample`], the read-only
//! [`GeofenceIndex`] and the session's [`AlertState`], and returns the alerts to
//! publish in order. The only thing it writes is the `AlertState` it was handed
//! (geofence membership and cooldown timestamps), which belongs to the session.
//!
//! ## Rules
//! ```text
//! per sample:
//!   geofences (catalog order):
//!     false → true  ─► geofence_entry   (if fence.alerts.on_entry)
//!     true  → false ─► geofence_exit    (if fence.alerts.on_exit)
//!     membership updated whether or not the alert fires
//!   speed flag:
//!     ≤ 10% over   ─► speed_violation (medium)
//!     > 10% over   ─► speed_violation (high)
//!
//! per watchdog fire:     communication_loss (high)
//! per emergency report:  emergency_button   (critical, bypasses cooldown)
//! ```
//!
//! Cooldown: an alert type already fired for this session within the cooldown
//! window is suppressed. Cooldowns are measured in the clock of the triggering
//! input (sample timestamps for per-sample rules, wall clock for the watchdog).
//! The key is the alert type alone: entering a second geofence inside the
//! window of a first entry raises no second `geofence_entry`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::alert::{Alert, AlertType, Severity};
use crate::geo::{GeofenceIndex, LocationSample, SpeedFlag, ValidatedSample};
use crate::ids::{GeofenceId, SessionId};
use crate::session::EmergencyReport;

/// Share above the limit up to which a speed violation is `medium`.
const MEDIUM_OVERAGE: f64 = 0.10;

/// Per-session memory the engine reads and updates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    /// Geofence id → currently inside.
    pub geofence_membership: BTreeMap<GeofenceId, bool>,
    /// Alert type → when it last fired. Bounded by the number of alert types.
    pub recent_alerts: BTreeMap<AlertType, DateTime<Utc>>,
}

impl AlertState {
    /// Records a firing at `at` unless one happened within `cooldown`.
    fn try_fire(&mut self, alert_type: AlertType, at: DateTime<Utc>, cooldown: TimeDelta) -> bool {
        if let Some(last) = self.recent_alerts.get(&alert_type)
            && at.signed_duration_since(*last) < cooldown
        {
            return false;
        }
        self.recent_alerts.insert(alert_type, at);
        true
    }

    /// Returns `true` if the session is currently inside `id`.
    pub fn is_inside(&self, id: &GeofenceId) -> bool {
        self.geofence_membership.get(id).copied().unwrap_or(false)
    }
}

/// Output of one per-sample evaluation.
#[derive(Clone, Debug, Default)]
pub struct Evaluation {
    /// Alerts to publish, in order.
    pub alerts: Vec<Alert>,
    /// Geofences entered by this sample (whether or not an alert fired).
    pub entered: Vec<GeofenceId>,
    /// Geofences exited by this sample (whether or not an alert fired).
    pub exited: Vec<GeofenceId>,
}

/// Rule evaluator shared by every session actor.
#[derive(Debug)]
pub struct AlertEngine {
    geofences: Arc<GeofenceIndex>,
    cooldown: TimeDelta,
}

impl AlertEngine {
    /// Creates an engine over a geofence snapshot with the given cooldown window.
    pub fn new(geofences: Arc<GeofenceIndex>, cooldown: std::time::Duration) -> Self {
        Self {
            geofences,
            cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Geofence snapshot this engine evaluates against.
    pub fn geofences(&self) -> &GeofenceIndex {
        &self.geofences
    }

    /// Seeds membership from a session's first position without raising alerts.
    ///
    /// Starting a trip inside a depot is not a crossing.
    pub fn prime(&self, sample: &LocationSample, state: &mut AlertState) {
        state.geofence_membership = self
            .geofences
            .membership(&sample.coordinates)
            .map(|(fence, inside)| (fence.id.clone(), inside))
            .collect();
    }

    /// Evaluates one freshly applied sample.
    ///
    /// With `alerts_enabled = false` membership is still tracked, but geofence and
    /// speed alerts are not produced.
    pub fn evaluate(
        &self,
        session_id: SessionId,
        validated: &ValidatedSample,
        alerts_enabled: bool,
        state: &mut AlertState,
    ) -> Evaluation {
        let sample = &validated.sample;
        let at = sample.timestamp;
        let mut out = Evaluation::default();

        for (fence, inside) in self.geofences.membership(&sample.coordinates) {
            let was_inside = state
                .geofence_membership
                .insert(fence.id.clone(), inside)
                .unwrap_or(false);
            if inside == was_inside {
                continue;
            }

            let (alert_type, wanted, verb) = if inside {
                out.entered.push(fence.id.clone());
                (AlertType::GeofenceEntry, fence.alerts.on_entry, "entered")
            } else {
                out.exited.push(fence.id.clone());
                (AlertType::GeofenceExit, fence.alerts.on_exit, "left")
            };

            if alerts_enabled && wanted && state.try_fire(alert_type, at, self.cooldown) {
                out.alerts.push(
                    Alert::new(
                        session_id,
                        alert_type,
                        Severity::Low,
                        format!("bus {verb} {}", fence.name),
                        at,
                    )
                    .with_location(sample.coordinates)
                    .with_meta("geofence_id", fence.id.as_str())
                    .with_meta("geofence_kind", serde_json::to_value(fence.kind).unwrap_or_default()),
                );
            }
        }

        if alerts_enabled
            && let Some(flag) = validated.speed_flag
            && state.try_fire(AlertType::SpeedViolation, at, self.cooldown)
        {
            out.alerts.push(speed_alert(session_id, sample, &flag));
        }

        out
    }

    /// Builds the `communication_loss` alert raised by the heartbeat watchdog.
    pub fn communication_loss(
        &self,
        session_id: SessionId,
        last: Option<&LocationSample>,
        silent_for: std::time::Duration,
        now: DateTime<Utc>,
        state: &mut AlertState,
    ) -> Option<Alert> {
        if !state.try_fire(AlertType::CommunicationLoss, now, self.cooldown) {
            return None;
        }
        let mut alert = Alert::new(
            session_id,
            AlertType::CommunicationLoss,
            Severity::High,
            format!("no location update for {}s", silent_for.as_secs()),
            now,
        )
        .with_meta("silent_for_s", silent_for.as_secs());
        if let Some(last) = last {
            alert = alert
                .with_location(last.coordinates)
                .with_meta("last_seen", last.timestamp.to_rfc3339());
        }
        Some(alert)
    }

    /// Builds the alert for an emergency report.
    ///
    /// Always `critical` whatever the reporter asked for; bypasses cooldown but
    /// still records the firing.
    pub fn emergency(
        &self,
        session_id: SessionId,
        report: &EmergencyReport,
        last: Option<&LocationSample>,
        now: DateTime<Utc>,
        state: &mut AlertState,
    ) -> Alert {
        state
            .recent_alerts
            .insert(AlertType::EmergencyButton, now);

        let mut alert = Alert::new(
            session_id,
            AlertType::EmergencyButton,
            Severity::Critical,
            format!("emergency reported: {}", report.kind.as_str()),
            now,
        )
        .with_meta("emergency_kind", report.kind.as_str())
        .with_meta("description", report.description.as_str());
        if let Some(requested) = report.severity {
            alert = alert.with_meta("reported_severity", requested.as_str());
        }
        if let Some(last) = last {
            alert = alert.with_location(last.coordinates);
        }
        alert
    }
}

fn speed_alert(session_id: SessionId, sample: &LocationSample, flag: &SpeedFlag) -> Alert {
    let severity = if flag.overage() <= MEDIUM_OVERAGE {
        Severity::Medium
    } else {
        Severity::High
    };
    Alert::new(
        session_id,
        AlertType::SpeedViolation,
        severity,
        format!(
            "speed {:.0} km/h exceeds limit {:.0} km/h",
            flag.observed_kmh, flag.limit_kmh
        ),
        sample.timestamp,
    )
    .with_location(sample.coordinates)
    .with_meta("observed_kmh", flag.observed_kmh)
    .with_meta("limit_kmh", flag.limit_kmh)
    .with_meta(
        "source",
        serde_json::to_value(flag.source).unwrap_or_default(),
    )
}
