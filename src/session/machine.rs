//! # Session state machine.
//!
//! Synchronous, side-effect-free transitions over one [`TrackingSession`]. The
//! session actor serializes calls and turns the returned outcomes into events.
//!
//! ## Transitions
//! ```text
//! (none)            ──start──────────────► active
//! active            ──pause──────────────► paused
//! paused            ──resume─────────────► active
//! active | paused   ──heartbeat lost─────► offline { resume_to }
//! offline           ──valid sample───────► resume_to (active | paused)
//! active | paused   ──emergency──────────► emergency
//! emergency         ──resolve────────────► active, or stopped if a stop was queued
//! active | paused   ──stop───────────────► stopped
//! emergency         ──stop───────────────► (queued until resolved)
//! active | paused   ──trip end reached───► completed
//! ```
//!
//! ## Rules
//! - `stopped` / `completed` are terminal: samples fail with `SessionTerminated`.
//! - At most one open emergency; a second report fails with `EmergencyAlreadyOpen`
//!   unless it carries the idempotency key of the open one.
//! - A sample is accepted only if strictly newer than `last_sample`.
//! - Failed operations leave the session untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{
    DriverInfo, Emergency, EmergencyReport, EmergencyResolution, Performance, Resumable,
    SessionState, SessionStatus, TrackingSettings, TripPlan,
};
use crate::alerts::{Alert, AlertEngine, AlertResolution, AlertState};
use crate::error::TrackingError;
use crate::geo::{GeoValidator, LocationSample, ValidatedSample};
use crate::ids::{BusId, SessionId};

/// A state change, `from → to`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of a successfully ingested sample.
#[derive(Clone, Debug)]
pub struct AppliedUpdate {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub sample: ValidatedSample,
    /// Alerts raised by this sample, in publish order.
    pub alerts: Vec<Alert>,
    /// Transitions caused by this sample (offline recovery, trip completion).
    pub transitions: Vec<Transition>,
}

/// Result of pause / resume / stop / complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlAck {
    pub status: SessionStatus,
    /// `None` when the request was queued rather than applied.
    pub transition: Option<Transition>,
}

/// Result of an emergency report.
#[derive(Clone, Debug)]
pub struct EmergencyAck {
    pub alert_id: Uuid,
    pub opened_at: DateTime<Utc>,
    /// `Some` when this call opened the emergency; `None` for an idempotent retry.
    pub alert: Option<Alert>,
    pub transition: Option<Transition>,
}

/// Result of an emergency resolution.
#[derive(Clone, Debug)]
pub struct ResolvedEmergency {
    pub resolution: AlertResolution,
    pub transition: Transition,
}

/// Outcome of a heartbeat timeout.
#[derive(Clone, Debug, Default)]
pub struct HeartbeatLoss {
    pub transition: Option<Transition>,
    pub alert: Option<Alert>,
}

/// Live tracking record for one bus operating one trip.
#[derive(Clone, Debug)]
pub struct TrackingSession {
    pub(crate) id: SessionId,
    pub(crate) trip: TripPlan,
    pub(crate) bus_id: BusId,
    pub(crate) driver: DriverInfo,
    pub(crate) state: SessionState,
    pub(crate) last_sample: LocationSample,
    pub(crate) settings: TrackingSettings,
    pub(crate) open_emergency: Option<Emergency>,
    pub(crate) alerts: AlertState,
    pub(crate) performance: Performance,
    pub(crate) started_at: DateTime<Utc>,
}

impl TrackingSession {
    /// Creates an `active` session from an already-validated first sample.
    ///
    /// Driver and settings must be validated by the caller.
    pub fn start(
        id: SessionId,
        trip: TripPlan,
        bus_id: BusId,
        driver: DriverInfo,
        initial: ValidatedSample,
        settings: TrackingSettings,
        engine: &AlertEngine,
    ) -> Self {
        let mut alerts = AlertState::default();
        engine.prime(&initial.sample, &mut alerts);
        let mut performance = Performance::default();
        performance.record(&initial);

        Self {
            id,
            trip,
            bus_id,
            driver,
            state: SessionState::Active,
            started_at: initial.sample.timestamp,
            last_sample: initial.sample,
            settings,
            open_emergency: None,
            alerts,
            performance,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn trip(&self) -> &TripPlan {
        &self.trip
    }

    pub fn bus_id(&self) -> &BusId {
        &self.bus_id
    }

    pub fn driver(&self) -> &DriverInfo {
        &self.driver
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn last_sample(&self) -> &LocationSample {
        &self.last_sample
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    pub fn open_emergency(&self) -> Option<&Emergency> {
        self.open_emergency.as_ref()
    }

    pub fn alert_state(&self) -> &AlertState {
        &self.alerts
    }

    pub fn performance(&self) -> &Performance {
        &self.performance
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Silence after which the watchdog declares the session offline.
    pub fn heartbeat_timeout(&self, multiplier: u32) -> Duration {
        self.settings.update_interval() * multiplier.max(1)
    }

    /// Validates and applies one sample, then runs alert evaluation.
    pub fn ingest(
        &mut self,
        raw: &LocationSample,
        validator: &GeoValidator,
        engine: &AlertEngine,
    ) -> Result<AppliedUpdate, TrackingError> {
        self.ensure_live()?;
        let validated = validator.validate(raw, Some(&self.last_sample))?;

        let mut transitions = Vec::new();
        if let SessionState::Offline { resume_to } = self.state {
            transitions.push(self.move_to(resume_to.into(), Some("location restored")));
        }

        self.last_sample = validated.sample.clone();
        self.performance.record(&validated);

        let eval = engine.evaluate(
            self.id,
            &validated,
            self.settings.alerts_enabled,
            &mut self.alerts,
        );

        let reached_end = self
            .trip
            .destination
            .as_ref()
            .is_some_and(|dest| eval.entered.contains(dest));
        if reached_end && matches!(self.state, SessionState::Active | SessionState::Paused) {
            transitions.push(self.move_to(SessionState::Completed, Some("destination reached")));
        }

        Ok(AppliedUpdate {
            session_id: self.id,
            status: self.status(),
            sample: validated,
            alerts: eval.alerts,
            transitions,
        })
    }

    /// `active → paused`.
    pub fn pause(&mut self, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        match self.state {
            SessionState::Active => Ok(self.applied(SessionState::Paused, reason)),
            _ => Err(self.invalid("pause")),
        }
    }

    /// `paused → active`.
    pub fn resume(&mut self, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        match self.state {
            SessionState::Paused => Ok(self.applied(SessionState::Active, reason)),
            _ => Err(self.invalid("resume")),
        }
    }

    /// `active | paused → stopped`; queued while an emergency is open.
    pub fn stop(&mut self, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        match self.state {
            SessionState::Active | SessionState::Paused => {
                Ok(self.applied(SessionState::Stopped, reason))
            }
            SessionState::Emergency { .. } => {
                self.state = SessionState::Emergency { stop_queued: true };
                Ok(ControlAck {
                    status: SessionStatus::Emergency,
                    transition: None,
                })
            }
            _ => Err(self.invalid("stop")),
        }
    }

    /// `active | paused → completed` (explicit trip end).
    pub fn complete(&mut self, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        match self.state {
            SessionState::Active | SessionState::Paused => {
                Ok(self.applied(SessionState::Completed, reason))
            }
            _ => Err(self.invalid("complete")),
        }
    }

    /// Opens an emergency and moves to `emergency`.
    pub fn report_emergency(
        &mut self,
        report: &EmergencyReport,
        engine: &AlertEngine,
        now: DateTime<Utc>,
    ) -> Result<EmergencyAck, TrackingError> {
        if let Some(open) = &self.open_emergency {
            return match (&open.idempotency_key, &report.idempotency_key) {
                (Some(a), Some(b)) if a == b => Ok(EmergencyAck {
                    alert_id: open.alert_id,
                    opened_at: open.opened_at,
                    alert: None,
                    transition: None,
                }),
                _ => Err(TrackingError::EmergencyAlreadyOpen {
                    opened_at: open.opened_at,
                }),
            };
        }
        if !matches!(self.state, SessionState::Active | SessionState::Paused) {
            return Err(self.invalid("report an emergency on"));
        }

        let alert = engine.emergency(
            self.id,
            report,
            Some(&self.last_sample),
            now,
            &mut self.alerts,
        );
        self.open_emergency = Some(Emergency {
            kind: report.kind,
            description: report.description.clone(),
            severity: alert.severity,
            opened_at: now,
            alert_id: alert.id,
            location: alert.location,
            idempotency_key: report.idempotency_key.clone(),
        });
        let transition = self.move_to(
            SessionState::Emergency { stop_queued: false },
            Some(report.kind.as_str()),
        );

        Ok(EmergencyAck {
            alert_id: alert.id,
            opened_at: now,
            alert: Some(alert),
            transition: Some(transition),
        })
    }

    /// Closes the open emergency; returns to `active`, or `stopped` if a stop was queued.
    pub fn resolve_emergency(
        &mut self,
        resolution: EmergencyResolution,
        now: DateTime<Utc>,
    ) -> Result<ResolvedEmergency, TrackingError> {
        let Some(open) = self.open_emergency.take() else {
            return Err(TrackingError::NoOpenEmergency);
        };

        let next = match self.state {
            SessionState::Emergency { stop_queued: true } => SessionState::Stopped,
            _ => SessionState::Active,
        };
        let transition = self.move_to(next, Some("emergency resolved"));

        Ok(ResolvedEmergency {
            resolution: AlertResolution {
                alert_id: open.alert_id,
                session_id: self.id,
                resolved_at: now,
                resolved_by: resolution.resolved_by,
                note: resolution.note,
            },
            transition,
        })
    }

    /// Applies a heartbeat timeout.
    ///
    /// `active | paused` go offline and raise `communication_loss`; an emergency
    /// session keeps its state but still raises the alert.
    pub fn heartbeat_lost(
        &mut self,
        engine: &AlertEngine,
        silent_for: Duration,
        now: DateTime<Utc>,
    ) -> HeartbeatLoss {
        let resume_to = match self.state {
            SessionState::Active => Some(Resumable::Active),
            SessionState::Paused => Some(Resumable::Paused),
            SessionState::Emergency { .. } => None,
            _ => return HeartbeatLoss::default(),
        };

        let transition = resume_to
            .map(|r| self.move_to(SessionState::Offline { resume_to: r }, Some("heartbeat timeout")));
        let alert = engine.communication_loss(
            self.id,
            Some(&self.last_sample),
            silent_for,
            now,
            &mut self.alerts,
        );
        HeartbeatLoss { transition, alert }
    }

    fn ensure_live(&self) -> Result<(), TrackingError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(TrackingError::SessionTerminated { status });
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> TrackingError {
        TrackingError::InvalidTransition {
            from: self.status(),
            action,
        }
    }

    fn applied(&mut self, next: SessionState, reason: Option<String>) -> ControlAck {
        let mut transition = self.move_to(next, None);
        transition.reason = reason;
        ControlAck {
            status: self.status(),
            transition: Some(transition),
        }
    }

    fn move_to(&mut self, next: SessionState, reason: Option<&str>) -> Transition {
        let from = self.status();
        self.state = next;
        Transition {
            from,
            to: next.status(),
            reason: reason.map(str::to_string),
        }
    }
}
