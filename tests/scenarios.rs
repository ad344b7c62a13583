use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use fleetvisor::{
    AlertType, Catalog, Config, Coordinates, DriverInfo, EmergencyKind, EmergencyReport,
    EmergencyResolution, Event, EventKind, LocationSample, ObserverId, ObserverStream, Payload,
    Role, SessionId, SessionStatus, Severity, Sink, SubscriptionError, Topic, Tracker,
    TrackingError, TrackingSettings, TripPlan,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const COLOMBO: Coordinates = Coordinates::new(6.9271, 79.8612);
const KANDY: Coordinates = Coordinates::new(7.2906, 80.6337);
const FORT: Coordinates = Coordinates::new(6.9344, 79.8500);

fn tracker() -> Tracker {
    Tracker::builder(Config::default()).build().unwrap()
}

fn driver() -> DriverInfo {
    DriverInfo::new("Kamal Silva", "0771234567", "B1234567")
}

async fn start(tracker: &Tracker, bus: &str, t0: DateTime<Utc>) -> Result<SessionId, TrackingError> {
    tracker
        .start(
            TripPlan::new(format!("trip-{bus}"), "route-1"),
            bus.into(),
            driver(),
            LocationSample::at(COLOMBO, t0),
            TrackingSettings::default(),
        )
        .await
}

fn at(point: Coordinates, t0: DateTime<Utc>, secs: i64) -> LocationSample {
    LocationSample::at(point, t0 + TimeDelta::seconds(secs))
}

/// Events delivered so far, without the `connected` greeting.
fn received(stream: &mut ObserverStream) -> Vec<Arc<Event>> {
    stream
        .drain()
        .into_iter()
        .filter(|ev| ev.kind() != EventKind::Connected)
        .collect()
}

fn kinds(events: &[Arc<Event>]) -> Vec<EventKind> {
    events.iter().map(|ev| ev.kind()).collect()
}

fn alerts(events: &[Arc<Event>]) -> Vec<(AlertType, Severity)> {
    events
        .iter()
        .filter_map(|ev| match &ev.payload {
            Payload::TrackingAlert { alert } | Payload::EmergencyAlert { alert, .. } => {
                Some((alert.alert_type, alert.severity))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn implausible_jump_raises_high_speed_alert() {
    let tracker = tracker();
    let t0 = Utc::now();
    let id = start(&tracker, "NB-1001", t0).await.unwrap();

    let admin = ObserverId::from("admin");
    let mut stream = tracker.connect(admin.clone(), Role::NtcAdmin);
    tracker
        .subscribe(&admin, Role::NtcAdmin, [Topic::Tracking(id), Topic::DashboardUpdates])
        .unwrap();

    let update = tracker.ingest(id, at(KANDY, t0, 5)).await.unwrap();
    assert_eq!(update.status, SessionStatus::Active);
    assert_eq!(update.alerts.len(), 1);
    assert_eq!(update.alerts[0].alert_type, AlertType::SpeedViolation);
    assert_eq!(update.alerts[0].severity, Severity::High);

    // Both memberships match, each event still arrives once.
    let events = received(&mut stream);
    assert_eq!(
        kinds(&events),
        vec![EventKind::LocationUpdate, EventKind::TrackingAlert]
    );
    assert_eq!(alerts(&events), vec![(AlertType::SpeedViolation, Severity::High)]);
}

#[tokio::test(start_paused = true)]
async fn silent_bus_goes_offline_and_recovers() {
    let tracker = tracker();
    let t0 = Utc::now();
    let id = start(&tracker, "NB-1002", t0).await.unwrap();

    let ops = ObserverId::from("ops");
    let mut dashboard = tracker.connect(ops.clone(), Role::BusOperator);
    tracker
        .subscribe(&ops, Role::BusOperator, [Topic::DashboardUpdates])
        .unwrap();
    let rider = ObserverId::from("rider");
    let mut tracking = tracker.connect(rider.clone(), Role::Commuter);
    tracker
        .subscribe(&rider, Role::Commuter, [Topic::Tracking(id)])
        .unwrap();

    tokio::time::sleep(Duration::from_secs(89)).await;
    assert_eq!(tracker.status(id), Some(SessionStatus::Active));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(tracker.status(id), Some(SessionStatus::Offline));

    let expected = vec![(AlertType::CommunicationLoss, Severity::High)];
    assert_eq!(alerts(&received(&mut dashboard)), expected);
    let seen = received(&mut tracking);
    assert_eq!(
        kinds(&seen),
        vec![EventKind::StatusChanged, EventKind::TrackingAlert]
    );
    assert_eq!(alerts(&seen), expected);

    let update = tracker.ingest(id, at(COLOMBO, t0, 120)).await.unwrap();
    assert_eq!(update.status, SessionStatus::Active);
    assert_eq!(update.transitions.len(), 1);
    assert_eq!(update.transitions[0].from, SessionStatus::Offline);
}

#[tokio::test]
async fn emergency_is_critical_and_reaches_every_channel() {
    let tracker = tracker();
    let t0 = Utc::now();
    let id = start(&tracker, "NB-1003", t0).await.unwrap();

    let admin = ObserverId::from("admin");
    let mut emergencies = tracker.connect(admin.clone(), Role::NtcAdmin);
    tracker
        .subscribe(&admin, Role::NtcAdmin, [Topic::EmergencyAlerts])
        .unwrap();
    let ops = ObserverId::from("ops");
    let mut dashboard = tracker.connect(ops.clone(), Role::BusOperator);
    tracker
        .subscribe(&ops, Role::BusOperator, [Topic::DashboardUpdates])
        .unwrap();
    let rider = ObserverId::from("rider");
    let mut tracking = tracker.connect(rider.clone(), Role::Commuter);
    tracker
        .subscribe(&rider, Role::Commuter, [Topic::Tracking(id)])
        .unwrap();

    let report = EmergencyReport::new(EmergencyKind::Breakdown, "engine failure near Kadawatha")
        .with_severity(Severity::Low)
        .with_idempotency_key("sos-1");
    let ack = tracker.report_emergency(id, report.clone()).await.unwrap();
    let alert = ack.alert.clone().unwrap();
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(tracker.status(id), Some(SessionStatus::Emergency));

    for stream in [&mut emergencies, &mut dashboard, &mut tracking] {
        let events = received(stream);
        assert_eq!(alerts(&events), vec![(AlertType::EmergencyButton, Severity::Critical)]);
    }

    // Retry with the same key: same alert, nothing republished.
    let retry = tracker.report_emergency(id, report).await.unwrap();
    assert_eq!(retry.alert_id, ack.alert_id);
    assert!(retry.alert.is_none());
    assert!(received(&mut emergencies).is_empty());

    let resolution = tracker
        .resolve_emergency(
            id,
            EmergencyResolution {
                resolved_by: Some("ops".into()),
                note: Some("tow truck arrived".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolution.alert_id, ack.alert_id);
    assert_eq!(tracker.status(id), Some(SessionStatus::Active));
    assert_eq!(kinds(&received(&mut emergencies)), vec![EventKind::EmergencyResolved]);

    let err = tracker
        .resolve_emergency(id, EmergencyResolution::default())
        .await
        .unwrap_err();
    assert_eq!(err, TrackingError::NoOpenEmergency);
}

#[tokio::test]
async fn stop_during_emergency_waits_for_resolution() {
    let tracker = tracker();
    let id = start(&tracker, "NB-1004", Utc::now()).await.unwrap();
    tracker
        .report_emergency(id, EmergencyReport::new(EmergencyKind::Medical, "passenger collapsed"))
        .await
        .unwrap();

    let ack = tracker.stop(id, Some("end of shift".into())).await.unwrap();
    assert_eq!(ack.status, SessionStatus::Emergency);
    assert!(ack.transition.is_none());

    tracker
        .resolve_emergency(id, EmergencyResolution::default())
        .await
        .unwrap();
    assert_eq!(tracker.status(id), Some(SessionStatus::Stopped));
}

#[tokio::test]
async fn role_gates_are_all_or_nothing() {
    let tracker = tracker();
    let id = start(&tracker, "NB-1005", Utc::now()).await.unwrap();

    let rider = ObserverId::from("rider");
    let err = tracker
        .subscribe(&rider, Role::Commuter, [Topic::Tracking(id)])
        .unwrap_err();
    assert_eq!(err.as_label(), "unknown_observer");

    let _stream = tracker.connect(rider.clone(), Role::Commuter);
    let err = tracker
        .subscribe(
            &rider,
            Role::Commuter,
            [Topic::Tracking(id), Topic::DashboardUpdates],
        )
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InsufficientRole { .. }));
    assert_eq!(
        tracker.subscriptions().topics_of(&rider),
        Some(vec![Topic::Role(Role::Commuter)])
    );

    // Claiming a stronger role than the one connected with is refused too.
    let err = tracker
        .subscribe(&rider, Role::NtcAdmin, [Topic::EmergencyAlerts])
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::InsufficientRole { .. }));
    assert!(tracker.subscriptions().members(&Topic::EmergencyAlerts).is_empty());

    assert!(tracker.disconnect(&rider));
    assert_eq!(tracker.subscriptions().topics_of(&rider), None);
}

#[tokio::test]
async fn one_live_session_per_bus() {
    let tracker = tracker();
    let t0 = Utc::now();
    let first = start(&tracker, "NB-1006", t0).await.unwrap();

    let err = start(&tracker, "NB-1006", t0).await.unwrap_err();
    assert_eq!(
        err,
        TrackingError::DuplicateSession {
            bus_id: "NB-1006".into(),
            existing: first,
        }
    );

    tracker.complete(first, None).await.unwrap();
    let err = tracker.ingest(first, at(COLOMBO, t0, 30)).await.unwrap_err();
    assert_eq!(
        err,
        TrackingError::SessionTerminated {
            status: SessionStatus::Completed
        }
    );

    let second = start(&tracker, "NB-1006", t0).await.unwrap();
    assert_eq!(tracker.session_for_bus(&"NB-1006".into()), Some(second));
}

#[tokio::test]
async fn bad_samples_leave_the_session_untouched() {
    let tracker = tracker();
    let t0 = Utc::now();
    let id = start(&tracker, "NB-1007", t0).await.unwrap();

    let err = tracker.ingest(id, at(COLOMBO, t0, 0)).await.unwrap_err();
    assert_eq!(err.as_label(), "stale_sample");

    let london = Coordinates::new(51.5072, -0.1276);
    let err = tracker.ingest(id, at(london, t0, 10)).await.unwrap_err();
    assert_eq!(err.as_label(), "out_of_bounds");

    let err = tracker
        .ingest(id, at(COLOMBO, t0, 10).with_speed(-3.0))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "invalid_sample");

    assert_eq!(tracker.status(id), Some(SessionStatus::Active));
    let snap = tracker.snapshot(id).await.unwrap();
    assert_eq!(snap.last_sample.timestamp, t0);

    let err = tracker
        .start(
            TripPlan::new("trip-x", "route-1"),
            "NB-1008".into(),
            driver(),
            LocationSample::at(london, t0),
            TrackingSettings::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "invalid_location");
    assert!(tracker.session_for_bus(&"NB-1008".into()).is_none());

    let err = tracker
        .start(
            TripPlan::new("trip-y", "route-1"),
            "NB-1009".into(),
            driver(),
            LocationSample::at(COLOMBO, t0),
            TrackingSettings::default().with_update_interval(5),
        )
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "invalid_settings");
}

#[tokio::test]
async fn snapshot_survives_a_restart() {
    let tracker = tracker();
    let t0 = Utc::now();
    let id = start(&tracker, "NB-1010", t0).await.unwrap();
    tracker.ingest(id, at(FORT, t0, 120)).await.unwrap();
    tracker.pause(id, Some("tea break".into())).await.unwrap();

    let json = tracker.snapshot(id).await.unwrap().to_json().unwrap();
    tracker.shutdown().await.unwrap();

    let restarted = self::tracker();
    let snap = fleetvisor::SessionSnapshot::from_json(&json).unwrap();
    assert_eq!(snap.performance.sample_count, 2);
    let restored = restarted.restore(snap).await.unwrap();
    assert_eq!(restored, id);
    assert_eq!(restarted.status(id), Some(SessionStatus::Paused));

    let err = restarted.ingest(id, at(FORT, t0, 60)).await.unwrap_err();
    assert_eq!(err.as_label(), "stale_sample");
    let ack = restarted.resume(id, None).await.unwrap();
    assert_eq!(ack.status, SessionStatus::Active);
}

#[tokio::test]
async fn removed_session_can_be_restored_in_place() {
    let tracker = tracker();
    let id = start(&tracker, "NB-1011", Utc::now()).await.unwrap();
    let snap = tracker.snapshot(id).await.unwrap();

    tracker.remove(id).await.unwrap();
    assert_eq!(tracker.status(id), None);

    tracker.restore(snap).await.unwrap();
    // A late close event for the removed actor must not evict the new one.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(tracker.status(id), Some(SessionStatus::Active));
    assert_eq!(tracker.sessions(), vec![id]);
}

#[tokio::test]
async fn geofence_entry_and_destination_completion() {
    let catalog = Catalog::from_json(
        r#"{
            "geofences": [{
                "id": "fort", "name": "Colombo Fort", "kind": "terminal",
                "center": { "latitude": 6.9344, "longitude": 79.8500 },
                "radius_m": 150, "alerts": { "on_entry": true }
            }]
        }"#,
    )
    .unwrap();
    let tracker = Tracker::builder(Config::default())
        .with_catalog(catalog)
        .build()
        .unwrap();
    assert_eq!(tracker.geofences().len(), 1);

    let t0 = Utc::now();
    let id = tracker
        .start(
            TripPlan::new("trip-fort", "route-1").with_destination("fort"),
            "NB-1012".into(),
            driver(),
            LocationSample::at(COLOMBO, t0),
            TrackingSettings::default(),
        )
        .await
        .unwrap();

    let ops = ObserverId::from("ops");
    let mut dashboard = tracker.connect(ops.clone(), Role::BusOperator);
    tracker
        .subscribe(&ops, Role::BusOperator, [Topic::DashboardUpdates])
        .unwrap();

    let update = tracker.ingest(id, at(FORT, t0, 120)).await.unwrap();
    assert_eq!(update.alerts.len(), 1);
    assert_eq!(update.alerts[0].alert_type, AlertType::GeofenceEntry);
    assert_eq!(update.alerts[0].severity, Severity::Low);
    assert_eq!(update.status, SessionStatus::Completed);

    // Low-severity alerts stay on the tracking topic.
    assert_eq!(
        kinds(&received(&mut dashboard)),
        vec![EventKind::LocationUpdate, EventKind::StatusChanged]
    );
}

#[tokio::test]
async fn hidden_location_skips_public_topics() {
    let tracker = tracker();
    let t0 = Utc::now();
    let id = tracker
        .start(
            TripPlan::new("trip-private", "route-9"),
            "NB-1013".into(),
            driver(),
            LocationSample::at(COLOMBO, t0),
            TrackingSettings {
                share_location: false,
                ..TrackingSettings::default()
            },
        )
        .await
        .unwrap();

    let rider = ObserverId::from("rider");
    let mut route = tracker.connect(rider.clone(), Role::Commuter);
    tracker
        .subscribe(&rider, Role::Commuter, [Topic::Route("route-9".into())])
        .unwrap();
    let ops = ObserverId::from("ops");
    let mut dashboard = tracker.connect(ops.clone(), Role::BusOperator);
    tracker
        .subscribe(&ops, Role::BusOperator, [Topic::DashboardUpdates])
        .unwrap();

    tracker.ingest(id, at(COLOMBO, t0, 30)).await.unwrap();
    assert!(received(&mut route).is_empty());
    assert_eq!(kinds(&received(&mut dashboard)), vec![EventKind::LocationUpdate]);
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<EventKind>>,
}

#[async_trait::async_trait]
impl Sink for Recorder {
    async fn on_event(&self, event: &Event) {
        self.seen.lock().push(event.kind());
    }
}

#[tokio::test]
async fn shutdown_stops_sessions_and_notifies_sinks() {
    let recorder = Arc::new(Recorder::default());
    let tracker = Tracker::builder(Config::default())
        .with_sinks(vec![recorder.clone() as Arc<dyn Sink>])
        .build()
        .unwrap();
    let mut bus = tracker.events();

    let t0 = Utc::now();
    start(&tracker, "NB-1014", t0).await.unwrap();
    start(&tracker, "NB-1015", t0).await.unwrap();

    tracker.shutdown().await.unwrap();
    assert!(tracker.is_shut_down());
    assert!(tracker.sessions().is_empty());

    let err = start(&tracker, "NB-1016", t0).await.unwrap_err();
    assert_eq!(err.as_label(), "session_unavailable");

    let mut kinds = Vec::new();
    while let Ok(ev) = bus.try_recv() {
        kinds.push(ev.kind());
    }
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::SessionClosed).count(),
        2
    );
    assert_eq!(kinds.last(), Some(&EventKind::AllStoppedWithinGrace));

    for _ in 0..50 {
        if recorder.seen.lock().contains(&EventKind::AllStoppedWithinGrace) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let seen = recorder.seen.lock().clone();
    assert!(seen.contains(&EventKind::SessionOpened));
    assert!(seen.contains(&EventKind::ShutdownRequested));
}
