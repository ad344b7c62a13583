//! # Tracker: the public facade of the tracking runtime.
//!
//! [`Tracker`] owns the session registry, the subscription tables, the router,
//! the internal bus and the sink set. Every operation exposed to collaborators
//! is a method here.
//!
//! ## High-level architecture
//! ```text
//! start(trip, bus, driver, sample, settings)
//!   ├─► DriverInfo::validate / TrackingSettings::validate
//!   ├─► GeoValidator::validate(sample, None)      (InvalidLocation on failure)
//!   └─► SessionRegistry::spawn(TrackingSession)    (DuplicateSession on conflict)
//!
//! ingest / pause / resume / stop / complete / report_emergency / resolve_emergency / snapshot
//!   └─► SessionRegistry::request(id, Command) ──► SessionActor ──► reply
//!
//! connect / subscribe / unsubscribe / disconnect
//!   └─► SubscriptionManager
//!
//! Event flow:
//!   SessionActor ──► BroadcastRouter ──┬──► observer streams (by topic, deduped)
//!                                      └──► Bus ──┬──► registry listener
//!                                                 └──► sink listener ──► SinkSet
//!
//! Shutdown path:
//!   shutdown()
//!     ├─► Bus.publish(ShutdownRequested)
//!     ├─► registry.cancel_all(cfg.grace)
//!     │      ├─ all joined  → Bus.publish(AllStoppedWithinGrace)
//!     │      └─ deadline    → Bus.publish(GraceExceeded), RuntimeError::GraceExceeded
//!     └─► runtime_token.cancel()   (listeners drain and exit)
//! ```
//!
//! ## Example
//! ```no_run
//! use chrono::Utc;
//! use fleetvisor::{
//!     Config, Coordinates, DriverInfo, LocationSample, ObserverId, Role, Topic, Tracker,
//!     TrackingSettings, TripPlan,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = Tracker::builder(Config::default()).build()?;
//!
//!     let mut dashboard = tracker.connect(ObserverId::from("ops-1"), Role::BusOperator);
//!     tracker.subscribe(&ObserverId::from("ops-1"), Role::BusOperator, [Topic::DashboardUpdates])?;
//!
//!     let session = tracker
//!         .start(
//!             TripPlan::new("trip-1", "route-138"),
//!             "NB-1234".into(),
//!             DriverInfo::new("Nimal", "0771234567", "B1234567"),
//!             LocationSample::at(Coordinates::new(6.9271, 79.8612), Utc::now()),
//!             TrackingSettings::default(),
//!         )
//!         .await?;
//!
//!     while let Some(ev) = dashboard.recv().await {
//!         println!("{} {:?}", ev.kind().as_str(), ev.session_id());
//!         # break;
//!     }
//!     tracker.stop(session, None).await?;
//!     tracker.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::actor::{Command, ControlOp, SessionContext};
use super::builder::TrackerBuilder;
use super::config::Config;
use super::registry::SessionRegistry;
use super::shutdown;
use crate::alerts::AlertResolution;
use crate::broadcast::{ObserverStream, Role, SubscriptionManager, Topic};
use crate::error::{RuntimeError, SubscriptionError, TrackingError};
use crate::events::{Bus, Event, Payload};
use crate::geo::{GeofenceIndex, LocationSample};
use crate::ids::{BusId, ObserverId, SessionId};
use crate::session::{
    AppliedUpdate, ControlAck, DriverInfo, EmergencyAck, EmergencyReport, EmergencyResolution,
    SessionSnapshot, SessionStatus, TrackingSession, TrackingSettings, TripPlan,
};
use crate::sinks::SinkSet;

/// Live tracking runtime.
///
/// Build with [`Tracker::builder`]. Must be created inside a tokio runtime.
pub struct Tracker {
    cfg: Config,
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    subs: Arc<SubscriptionManager>,
    bus: Bus,
    sinks: Arc<SinkSet>,
    runtime_token: CancellationToken,
}

impl Tracker {
    /// Starts a builder with the given configuration.
    pub fn builder(cfg: Config) -> TrackerBuilder {
        TrackerBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        ctx: Arc<SessionContext>,
        registry: Arc<SessionRegistry>,
        subs: Arc<SubscriptionManager>,
        bus: Bus,
        sinks: Arc<SinkSet>,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            ctx,
            registry,
            subs,
            bus,
            sinks,
            runtime_token,
        }
    }

    // ---------------------------
    // Session control
    // ---------------------------

    /// Opens a session for `bus_id` on `trip`.
    ///
    /// Fails with `InvalidDriver`, `InvalidSettings`, `InvalidLocation` or
    /// `DuplicateSession`.
    pub async fn start(
        &self,
        trip: TripPlan,
        bus_id: BusId,
        driver: DriverInfo,
        initial: LocationSample,
        settings: TrackingSettings,
    ) -> Result<SessionId, TrackingError> {
        driver.validate()?;
        settings.validate()?;
        let first = self
            .ctx
            .validator
            .validate(&initial, None)
            .map_err(|reason| TrackingError::InvalidLocation { reason })?;

        let session = TrackingSession::start(
            SessionId::generate(),
            trip,
            bus_id,
            driver,
            first,
            settings,
            &self.ctx.engine,
        );
        self.registry.spawn(session)
    }

    /// Validates and applies one location sample.
    pub async fn ingest(
        &self,
        id: SessionId,
        sample: LocationSample,
    ) -> Result<AppliedUpdate, TrackingError> {
        self.registry
            .request(id, |reply| Command::Ingest { sample, reply })
            .await?
    }

    /// `active → paused`.
    pub async fn pause(&self, id: SessionId, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        self.control(id, ControlOp::Pause, reason).await
    }

    /// `paused → active`.
    pub async fn resume(&self, id: SessionId, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        self.control(id, ControlOp::Resume, reason).await
    }

    /// `active | paused → stopped`; queued while an emergency is open.
    pub async fn stop(&self, id: SessionId, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        self.control(id, ControlOp::Stop, reason).await
    }

    /// `active | paused → completed`.
    pub async fn complete(&self, id: SessionId, reason: Option<String>) -> Result<ControlAck, TrackingError> {
        self.control(id, ControlOp::Complete, reason).await
    }

    async fn control(
        &self,
        id: SessionId,
        op: ControlOp,
        reason: Option<String>,
    ) -> Result<ControlAck, TrackingError> {
        self.registry
            .request(id, |reply| Command::Control { op, reason, reply })
            .await?
    }

    /// Opens an emergency. Callers retry with the same idempotency key until accepted.
    pub async fn report_emergency(
        &self,
        id: SessionId,
        report: EmergencyReport,
    ) -> Result<EmergencyAck, TrackingError> {
        self.registry
            .request(id, |reply| Command::ReportEmergency { report, reply })
            .await?
    }

    /// Closes the open emergency and returns the linked resolution record.
    pub async fn resolve_emergency(
        &self,
        id: SessionId,
        resolution: EmergencyResolution,
    ) -> Result<AlertResolution, TrackingError> {
        self.registry
            .request(id, |reply| Command::ResolveEmergency { resolution, reply })
            .await?
    }

    /// Current status as last published by the session's actor.
    pub fn status(&self, id: SessionId) -> Option<SessionStatus> {
        self.registry.status(id)
    }

    /// Session currently registered for a bus.
    pub fn session_for_bus(&self, bus_id: &BusId) -> Option<SessionId> {
        self.registry.session_for_bus(bus_id)
    }

    /// Sorted ids of all registered sessions.
    pub fn sessions(&self) -> Vec<SessionId> {
        self.registry.list()
    }

    // ---------------------------
    // Snapshots
    // ---------------------------

    /// Captures one session.
    pub async fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, TrackingError> {
        self.registry
            .request(id, |reply| Command::Snapshot { reply })
            .await
    }

    /// Captures every reachable session; sessions exiting meanwhile are skipped.
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut out = Vec::new();
        for id in self.registry.list() {
            match self.snapshot(id).await {
                Ok(snap) => out.push(snap),
                Err(e) => warn!(session = %id, reason = e.as_label(), "snapshot skipped"),
            }
        }
        out
    }

    /// Resumes a session from a snapshot taken before a restart.
    pub async fn restore(&self, snapshot: SessionSnapshot) -> Result<SessionId, TrackingError> {
        snapshot.driver.validate()?;
        snapshot.settings.validate()?;
        let session = TrackingSession::from_snapshot(snapshot);
        info!(session = %session.id(), status = %session.status(), "restoring session");
        self.registry.spawn(session)
    }

    /// Archives a session immediately, whatever its state.
    pub async fn remove(&self, id: SessionId) -> Result<(), TrackingError> {
        self.registry.remove(id).await
    }

    /// Drops registry entries of actors that already exited.
    pub fn reap(&self) -> usize {
        self.registry.reap()
    }

    // ---------------------------
    // Observers
    // ---------------------------

    /// Opens an observer stream; joins `role_{role}` and queues `connected`.
    pub fn connect(&self, observer: ObserverId, role: Role) -> ObserverStream {
        self.subs.connect(observer, role)
    }

    /// Adds memberships; all-or-nothing, gated by `role`.
    pub fn subscribe(
        &self,
        observer: &ObserverId,
        role: Role,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Result<(), SubscriptionError> {
        self.subs.subscribe(observer, role, topics)
    }

    /// Removes memberships.
    pub fn unsubscribe(
        &self,
        observer: &ObserverId,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Result<(), SubscriptionError> {
        self.subs.unsubscribe(observer, topics)
    }

    /// Revokes every membership of the observer and closes its stream.
    pub fn disconnect(&self, observer: &ObserverId) -> bool {
        self.subs.disconnect(observer)
    }

    /// Membership tables (read access for collaborators and diagnostics).
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subs
    }

    /// Read-only geofence snapshot in use.
    pub fn geofences(&self) -> &GeofenceIndex {
        self.ctx.engine.geofences()
    }

    /// Receiver on the internal bus (every event, including runtime ones).
    pub fn events(&self) -> broadcast::Receiver<Arc<Event>> {
        self.bus.subscribe()
    }

    /// Events dropped by full sink queues since start.
    pub fn sink_drops(&self) -> u64 {
        self.sinks.dropped()
    }

    // ---------------------------
    // Shutdown
    // ---------------------------

    /// Waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere) or an external
    /// shutdown, then shuts down.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => {
                if let Err(e) = res {
                    warn!(error = %e, "signal handler registration failed");
                }
            }
            _ = self.runtime_token.cancelled() => return Ok(()),
        }
        self.shutdown().await
    }

    /// Cancels every session actor and waits up to `cfg.grace`.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        info!(sessions = self.registry.len(), "shutdown requested");
        self.bus.publish(Event::new(Payload::ShutdownRequested));

        let grace = self.cfg.grace;
        let stuck = self.registry.cancel_all(grace).await;

        let res = if stuck.is_empty() {
            self.bus.publish(Event::new(Payload::AllStoppedWithinGrace));
            Ok(())
        } else {
            warn!(stuck = stuck.len(), ?grace, "grace exceeded");
            self.bus.publish(Event::new(Payload::GraceExceeded));
            Err(RuntimeError::GraceExceeded { grace, stuck })
        };
        self.runtime_token.cancel();
        res
    }

    /// True once shutdown started.
    pub fn is_shut_down(&self) -> bool {
        self.runtime_token.is_cancelled()
    }
}
