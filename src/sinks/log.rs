//! # LogWriter: events as `tracing` records
//!
//! A sink that renders every internal event as one structured record under the
//! `fleetvisor::events` target. Install any `tracing` subscriber to see them.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  session_opened session=7c1e.. bus=NB-1234 status=active
//! DEBUG location_update session=7c1e.. lat=6.9271 lon=79.8612 speed_kmh=42.0
//! WARN  tracking_alert session=7c1e.. alert=speed_violation severity=high
//! ERROR emergency_alert session=7c1e.. kind=breakdown
//! INFO  session_closed session=7c1e.. status=completed reason=Archived
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::alerts::Severity;
use crate::events::{Event, Payload};
use crate::sinks::Sink;

const TARGET: &str = "fleetvisor::events";

/// Event writer sink.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for LogWriter {
    async fn on_event(&self, e: &Event) {
        let session = e.session_id().map(|id| id.to_string()).unwrap_or_default();
        let bus = e.origin.as_ref().map(|o| o.bus_id.as_str()).unwrap_or_default();

        match &e.payload {
            Payload::Connected { observer_id, role } => {
                info!(target: TARGET, %observer_id, %role, "connected");
            }
            Payload::LocationUpdate { sample, status, .. } => {
                debug!(
                    target: TARGET,
                    session = %session,
                    lat = sample.coordinates.latitude,
                    lon = sample.coordinates.longitude,
                    speed_kmh = sample.speed_kmh,
                    %status,
                    "location_update"
                );
            }
            Payload::TrackingAlert { alert } if alert.severity >= Severity::High => {
                warn!(
                    target: TARGET,
                    session = %session,
                    alert = alert.alert_type.as_str(),
                    severity = alert.severity.as_str(),
                    message = %alert.message,
                    "tracking_alert"
                );
            }
            Payload::TrackingAlert { alert } => {
                info!(
                    target: TARGET,
                    session = %session,
                    alert = alert.alert_type.as_str(),
                    severity = alert.severity.as_str(),
                    "tracking_alert"
                );
            }
            Payload::EmergencyAlert { emergency, .. } => {
                error!(
                    target: TARGET,
                    session = %session,
                    bus,
                    kind = emergency.kind.as_str(),
                    description = %emergency.description,
                    "emergency_alert"
                );
            }
            Payload::StatusChanged { transition } => {
                info!(
                    target: TARGET,
                    session = %session,
                    from = %transition.from,
                    to = %transition.to,
                    reason = transition.reason.as_deref().unwrap_or(""),
                    "status_changed"
                );
            }
            Payload::EmergencyResolved { resolution } => {
                info!(target: TARGET, session = %session, alert_id = %resolution.alert_id, "emergency_resolved");
            }
            Payload::SessionOpened { status } => {
                info!(target: TARGET, session = %session, bus, %status, "session_opened");
            }
            Payload::SessionClosed { status, reason } => {
                info!(target: TARGET, session = %session, %status, ?reason, "session_closed");
            }
            Payload::ObserverLagged { observer_id, skipped } => {
                warn!(target: TARGET, %observer_id, skipped, "observer_lagged");
            }
            Payload::SinkOverflow { sink, reason } => {
                warn!(target: TARGET, sink, reason, "sink_overflow");
            }
            Payload::SinkPanicked { sink, info } => {
                error!(target: TARGET, sink, %info, "sink_panicked");
            }
            Payload::ShutdownRequested => info!(target: TARGET, "shutdown_requested"),
            Payload::AllStoppedWithinGrace => info!(target: TARGET, "all_stopped_within_grace"),
            Payload::GraceExceeded => warn!(target: TARGET, "grace_exceeded"),
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
