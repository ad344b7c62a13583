//! # fleetvisor
//!
//! **Fleetvisor** is the live-tracking core of a public bus monitoring service.
//!
//! It turns a stream of raw GPS samples reported by bus drivers into a
//! validated session state, raises alerts (speeding, geofence entry/exit,
//! communication loss, emergencies) and fans events out to observers by topic
//! and role. HTTP/WebSocket transports, persistence and identity are left to
//! collaborators: this crate is the in-process engine they plug into.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   driver app           driver app           driver app
//!       │ samples,            │                    │
//!       │ control, SOS        │                    │
//!       ▼                     ▼                    ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Tracker (public facade)                                          │
//! │  - GeoValidator (bounds, plausibility, derived speed)             │
//! │  - GeofenceIndex (read-only catalog snapshot)                     │
//! │  - SessionRegistry (one live session per bus)                     │
//! │  - SubscriptionManager (observer ↔ topic tables, role gates)      │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ SessionActor │   │ SessionActor │   │ SessionActor │
//!     │ state machine│   │ state machine│   │ state machine│
//!     │ + watchdog   │   │ + watchdog   │   │ + watchdog   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘
//!      │ AlertEngine      │                  │
//!      │ evaluates each   │                  │
//!      │ accepted sample  │                  │
//!      ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  BroadcastRouter: event ──► topics ──► deduped observer streams    │
//! └──────┬──────────────────────────────────────────────┬─────────────┘
//!        ▼                                              ▼
//!  ObserverStream (per observer,               Bus (broadcast channel)
//!  bounded, drop-oldest)                    ┌───────────┴───────────┐
//!                                           ▼                       ▼
//!                                   registry listener        sink listener
//!                                   (cleanup on close)             │
//!                                                        ┌─────────┼─────────┐
//!                                                        ▼         ▼         ▼
//!                                                      sink1     sink2     sinkN
//! ```
//!
//! ### Session lifecycle
//! ```text
//! start ──► active ◄────────► paused
//!             │  ▲               │
//!   SOS       │  │ resolve       │ SOS
//!             ▼  │               ▼
//!           emergency ◄──────────┘
//!             │
//!   heartbeat │ lost (no sample for interval × multiplier)
//!             ▼
//!          offline ──(next accepted sample)──► prior state
//!             │
//!             └──(offline retention elapsed)──► archived
//!
//! active | paused ──► stopped | completed ──(terminal retention)──► archived
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Tracking**      | Start sessions, ingest samples, control and emergencies.      | [`Tracker`], [`TrackingSession`]            |
//! | **Geo**           | Coordinate validation, haversine, geofence membership.        | [`GeoValidator`], [`GeofenceIndex`]         |
//! | **Alerts**        | Per-session alert rules with cooldown.                        | [`AlertEngine`], [`Alert`]                  |
//! | **Fan-out**       | Topic routing with role gates and per-observer queues.        | [`BroadcastRouter`], [`SubscriptionManager`]|
//! | **Sinks**         | Hook into every internal event (logging, audit, persistence). | [`Sink`]                                    |
//! | **Errors**        | Typed rejections for every operation.                         | [`TrackingError`], [`SubscriptionError`]    |
//! | **Configuration** | Centralize runtime settings.                                  | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging`: exports a built-in [`LogWriter`] sink that turns events into `tracing` records.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use fleetvisor::{
//!     Config, Coordinates, DriverInfo, EventKind, LocationSample, ObserverId, Role, Topic,
//!     Tracker, TrackingSettings, TripPlan,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let sinks: Vec<Arc<dyn fleetvisor::Sink>> =
//!         vec![Arc::new(fleetvisor::LogWriter::default()) as Arc<dyn fleetvisor::Sink>];
//!     #[cfg(not(feature = "logging"))]
//!     let sinks: Vec<Arc<dyn fleetvisor::Sink>> = Vec::new();
//!
//!     let tracker = Tracker::builder(Config::default()).with_sinks(sinks).build()?;
//!
//!     let ops = ObserverId::from("ops-1");
//!     let mut dashboard = tracker.connect(ops.clone(), Role::NtcAdmin);
//!     tracker.subscribe(&ops, Role::NtcAdmin, [Topic::DashboardUpdates])?;
//!
//!     let t0 = Utc::now();
//!     let session = tracker
//!         .start(
//!             TripPlan::new("trip-1", "route-1"),
//!             "NB-1234".into(),
//!             DriverInfo::new("Nimal Perera", "0771234567", "B1234567"),
//!             LocationSample::at(Coordinates::new(6.9271, 79.8612), t0),
//!             TrackingSettings::default(),
//!         )
//!         .await?;
//!
//!     // Colombo to Kandy in five seconds: implausible, flagged as speeding.
//!     let jump = LocationSample::at(Coordinates::new(7.2906, 80.6337), t0 + Duration::seconds(5));
//!     let applied = tracker.ingest(session, jump).await?;
//!     assert!(!applied.alerts.is_empty());
//!
//!     while let Some(ev) = dashboard.try_recv() {
//!         println!("{}", ev.kind().as_str());
//!         if ev.kind() == EventKind::TrackingAlert {
//!             break;
//!         }
//!     }
//!
//!     tracker.complete(session, None).await?;
//!     tracker.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod alerts;
mod broadcast;
mod core;
mod error;
mod events;
mod geo;
mod ids;
mod session;
mod sinks;

// ---- Public re-exports ----

pub use alerts::{Alert, AlertEngine, AlertResolution, AlertState, AlertType, Evaluation, Severity};
pub use broadcast::{BroadcastRouter, ObserverStream, Role, SubscriptionManager, Topic, topics_for};
pub use core::{Config, SessionRegistry, Tracker, TrackerBuilder};
pub use error::{
    CatalogError, ErrorKind, Rejection, RuntimeError, SubscriptionError, TrackingError,
};
pub use events::{Bus, CloseReason, Event, EventKind, Origin, Payload};
pub use geo::{
    BoundingBox, Catalog, Coordinates, EARTH_RADIUS_M, GeoValidator, Geofence, GeofenceAlerts,
    GeofenceIndex, GeofenceKind, LocationSample, RADIUS_RANGE_M, SpeedFlag, SpeedSource,
    ValidatedSample,
};
pub use ids::{BusId, GeofenceId, ObserverId, RouteId, SessionId, TripId};
pub use session::{
    AccuracyMode, AppliedUpdate, ControlAck, DriverInfo, Emergency, EmergencyAck, EmergencyKind,
    EmergencyReport, EmergencyResolution, HeartbeatLoss, Performance, ResolvedEmergency, Resumable,
    SessionSnapshot, SessionState, SessionStatus, TrackingSession, TrackingSettings, Transition,
    TripPlan, UPDATE_INTERVAL_RANGE_S,
};
pub use sinks::{Sink, SinkSet};

// Optional: expose a built-in logging sink.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use sinks::LogWriter;
