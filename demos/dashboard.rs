//! # Example: dashboard
//!
//! Simulates one bus on a short run and prints what an operator dashboard and
//! a custom audit sink receive.
//!
//! Shows how to:
//! - Implement the [`Sink`] trait.
//! - Connect an observer and subscribe it to topics.
//! - Feed samples, report and resolve an emergency, complete the trip.
//!
//! ## Flow
//! ```text
//! Tracker::start() ──► SessionActor::run()
//!     ├─► ingest()            ──► location_update (+ tracking_alert)
//!     ├─► report_emergency()  ──► emergency_alert, status_changed
//!     ├─► resolve_emergency() ──► emergency_resolved, status_changed
//!     └─► complete()          ──► status_changed
//!
//! BroadcastRouter ──► dashboard ObserverStream
//! Bus ──► sink listener ──► AuditSink.on_event()
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example dashboard
//! ```

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use fleetvisor::{
    Config, Coordinates, DriverInfo, EmergencyKind, EmergencyReport, EmergencyResolution, Event,
    EventKind, LocationSample, ObserverId, Payload, Role, Sink, Topic, Tracker, TrackingSettings,
    TripPlan,
};

/// Prints session lifecycle and alert events.
/// In real life this would append to an audit table.
struct AuditSink;

#[async_trait::async_trait]
impl Sink for AuditSink {
    async fn on_event(&self, ev: &Event) {
        match &ev.payload {
            Payload::SessionOpened { status } => {
                println!("[audit] #{} opened session={:?} status={status}", ev.seq, ev.session_id());
            }
            Payload::TrackingAlert { alert } | Payload::EmergencyAlert { alert, .. } => {
                println!(
                    "[audit] #{} alert type={} severity={} msg={}",
                    ev.seq,
                    alert.alert_type.as_str(),
                    alert.severity.as_str(),
                    alert.message
                );
            }
            Payload::SessionClosed { status, reason } => {
                println!("[audit] #{} closed status={status} reason={reason:?}", ev.seq);
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "audit"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tracker = Tracker::builder(Config::default())
        .with_sinks(vec![Arc::new(AuditSink) as Arc<dyn Sink>])
        .build()?;

    let ops = ObserverId::from("ops-colombo");
    let mut dashboard = tracker.connect(ops.clone(), Role::BusOperator);
    tracker.subscribe(&ops, Role::BusOperator, [Topic::DashboardUpdates])?;

    let t0 = Utc::now();
    let route = [
        Coordinates::new(6.9271, 79.8612),
        Coordinates::new(6.9291, 79.8632),
        Coordinates::new(6.9311, 79.8652),
        Coordinates::new(6.9331, 79.8672),
    ];

    let session = tracker
        .start(
            TripPlan::new("trip-0800", "route-138"),
            "NB-4521".into(),
            DriverInfo::new("Nimal Perera", "+94 77 123 4567", "B1234567"),
            LocationSample::at(route[0], t0),
            TrackingSettings::default(),
        )
        .await?;

    for (step, point) in route.iter().enumerate().skip(1) {
        let at = t0 + TimeDelta::seconds(30 * step as i64);
        let update = tracker
            .ingest(session, LocationSample::at(*point, at).with_speed(38.0))
            .await?;
        println!(
            "[driver] sample {step}: {:.0} m from last fix",
            update.sample.distance_m
        );
    }

    // Reported speed over the regional limit.
    let at = t0 + TimeDelta::seconds(150);
    tracker
        .ingest(session, LocationSample::at(route[3], at).with_speed(131.0))
        .await?;

    tracker
        .report_emergency(
            session,
            EmergencyReport::new(EmergencyKind::Breakdown, "flat tyre").with_idempotency_key("sos-1"),
        )
        .await?;
    tracker
        .resolve_emergency(
            session,
            EmergencyResolution {
                resolved_by: Some("ops-colombo".into()),
                note: Some("tyre replaced".into()),
            },
        )
        .await?;
    tracker.complete(session, Some("arrived".into())).await?;

    for ev in dashboard.drain() {
        if ev.kind() == EventKind::Connected {
            continue;
        }
        println!("[dashboard] {}", serde_json::to_string(&*ev)?);
    }

    tracker.shutdown().await?;
    // Let the sink worker flush its queue.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok(())
}
