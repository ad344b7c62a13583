//! # SessionActor: one task per tracking session.
//!
//! Serializes every operation on one session. Commands arrive on a bounded
//! queue in arrival order; each is applied to the [`TrackingSession`] state
//! machine, its events are dispatched through the router, and only then is the
//! caller answered. Sessions never share a lock.
//!
//! ## Architecture
//! ```text
//! Tracker ──Command──► [mpsc, session_queue_capacity] ──► SessionActor::run()
//!
//! loop select! (biased) {
//!   ├─► runtime/session token cancelled  → exit (cancelled)
//!   ├─► retention timer (terminal|offline) → exit (archived | offline_reaped)
//!   ├─► command  → TrackingSession::{ingest, pause, ...}
//!   │               ├─► router.dispatch(events, in apply order)
//!   │               ├─► watch::send(status)
//!   │               └─► reply (oneshot)
//!   └─► heartbeat watchdog (multiplier × update interval since last accepted sample)
//!                   └─► heartbeat_lost → offline + communication_loss
//! }
//! publish session_closed
//! ```
//!
//! ## Rules
//! - The watchdog resets on every accepted sample and is disarmed while the
//!   session is offline or terminal.
//! - Events of one session are dispatched in the order their changes were applied.
//! - A dropped reply channel (caller gave up) never affects the session.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::Config;
use crate::alerts::{AlertEngine, AlertResolution};
use crate::broadcast::BroadcastRouter;
use crate::error::TrackingError;
use crate::events::{CloseReason, Event, Origin, Payload};
use crate::geo::{GeoValidator, LocationSample};
use crate::session::{
    AppliedUpdate, ControlAck, EmergencyAck, EmergencyReport, EmergencyResolution,
    SessionSnapshot, SessionStatus, TrackingSession, Transition,
};

/// Read-only collaborators shared by every session actor.
pub(crate) struct SessionContext {
    pub validator: GeoValidator,
    pub engine: AlertEngine,
    pub router: BroadcastRouter,
    pub cfg: Config,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, TrackingError>>;

/// Lifecycle requests without payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlOp {
    Pause,
    Resume,
    Stop,
    Complete,
}

/// Messages accepted by a session actor.
pub(crate) enum Command {
    Ingest {
        sample: LocationSample,
        reply: Reply<AppliedUpdate>,
    },
    Control {
        op: ControlOp,
        reason: Option<String>,
        reply: Reply<ControlAck>,
    },
    ReportEmergency {
        report: EmergencyReport,
        reply: Reply<EmergencyAck>,
    },
    ResolveEmergency {
        resolution: EmergencyResolution,
        reply: Reply<AlertResolution>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Heartbeat watchdog and retention timer of one actor.
struct Timers {
    watchdog: Pin<Box<Sleep>>,
    watchdog_armed: bool,
    last_accepted: Instant,
    expiry: Pin<Box<Sleep>>,
    expiry_armed: bool,
    expiry_reason: CloseReason,
}

impl Timers {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            watchdog: Box::pin(sleep(Duration::ZERO)),
            watchdog_armed: false,
            last_accepted: now,
            expiry: Box::pin(sleep(Duration::ZERO)),
            expiry_armed: false,
            expiry_reason: CloseReason::Archived,
        }
    }

    /// Restarts the watchdog from now.
    fn feed(&mut self, timeout: Duration) {
        let now = Instant::now();
        self.last_accepted = now;
        self.watchdog.as_mut().reset(now + timeout);
        self.watchdog_armed = true;
    }

    fn arm_expiry(&mut self, after: Duration, reason: CloseReason) {
        self.expiry.as_mut().reset(Instant::now() + after);
        self.expiry_armed = true;
        self.expiry_reason = reason;
    }
}

/// Owns one [`TrackingSession`] and serializes every operation on it.
pub(crate) struct SessionActor {
    session: TrackingSession,
    origin: Origin,
    ctx: Arc<SessionContext>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionActor {
    pub fn new(
        session: TrackingSession,
        ctx: Arc<SessionContext>,
        status_tx: watch::Sender<SessionStatus>,
    ) -> Self {
        let origin = Origin {
            session_id: session.id(),
            trip_id: session.trip().trip_id.clone(),
            bus_id: session.bus_id().clone(),
            route_id: session.trip().route_id.clone(),
        };
        Self {
            session,
            origin,
            ctx,
            status_tx,
        }
    }

    /// Runs until cancelled, archived or reaped.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        token: CancellationToken,
    ) -> CloseReason {
        let mut timers = Timers::new();
        self.enter(self.session.status(), &mut timers);
        info!(session = %self.origin.session_id, bus = %self.origin.bus_id, status = %self.session.status(), "session actor started");
        self.publish(Payload::SessionOpened {
            status: self.session.status(),
        });

        let reason = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break CloseReason::Cancelled,
                _ = &mut timers.expiry, if timers.expiry_armed => break timers.expiry_reason,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd, &mut timers),
                    None => break CloseReason::Cancelled,
                },
                _ = &mut timers.watchdog, if timers.watchdog_armed => self.on_heartbeat_lost(&mut timers),
            }
        };
        // Closed before the final event so the registry can tell this actor from a successor.
        rx.close();

        let status = self.session.status();
        info!(session = %self.origin.session_id, %status, ?reason, "session actor exiting");
        self.publish(Payload::SessionClosed { status, reason });
        reason
    }

    fn handle(&mut self, cmd: Command, timers: &mut Timers) {
        let before = self.session.status();

        match cmd {
            Command::Ingest { sample, reply } => {
                let res = self
                    .session
                    .ingest(&sample, &self.ctx.validator, &self.ctx.engine);
                match &res {
                    Ok(update) => {
                        timers.feed(self.heartbeat_timeout());
                        self.publish_update(update);
                    }
                    Err(e) => self.rejected("ingest", e),
                }
                let _ = reply.send(res);
            }
            Command::Control { op, reason, reply } => {
                let res = match op {
                    ControlOp::Pause => self.session.pause(reason),
                    ControlOp::Resume => self.session.resume(reason),
                    ControlOp::Stop => self.session.stop(reason),
                    ControlOp::Complete => self.session.complete(reason),
                };
                match &res {
                    Ok(ack) => {
                        if let Some(t) = &ack.transition {
                            self.publish_transition(t);
                        } else {
                            debug!(session = %self.origin.session_id, ?op, "request queued until emergency is resolved");
                        }
                    }
                    Err(e) => self.rejected("control", e),
                }
                let _ = reply.send(res);
            }
            Command::ReportEmergency { report, reply } => {
                let res = self
                    .session
                    .report_emergency(&report, &self.ctx.engine, Utc::now());
                match &res {
                    Ok(ack) => self.publish_emergency(ack),
                    Err(e) => self.rejected("report_emergency", e),
                }
                let _ = reply.send(res);
            }
            Command::ResolveEmergency { resolution, reply } => {
                let res = self.session.resolve_emergency(resolution, Utc::now());
                let res = match res {
                    Ok(resolved) => {
                        self.publish(Payload::EmergencyResolved {
                            resolution: resolved.resolution.clone(),
                        });
                        self.publish_transition(&resolved.transition);
                        Ok(resolved.resolution)
                    }
                    Err(e) => {
                        self.rejected("resolve_emergency", &e);
                        Err(e)
                    }
                };
                let _ = reply.send(res);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
        }

        self.settle(before, timers);
    }

    fn on_heartbeat_lost(&mut self, timers: &mut Timers) {
        let before = self.session.status();
        let silent_for = timers.last_accepted.elapsed();
        timers.watchdog_armed = false;

        let loss = self
            .session
            .heartbeat_lost(&self.ctx.engine, silent_for, Utc::now());
        warn!(
            session = %self.origin.session_id,
            silent_s = silent_for.as_secs(),
            status = %before,
            "heartbeat lost"
        );
        if let Some(t) = &loss.transition {
            self.publish_transition(t);
        }
        if let Some(alert) = loss.alert {
            self.publish(Payload::TrackingAlert { alert });
        }

        self.settle(before, timers);
    }

    /// Publishes the new status and re-plans timers after a state change.
    fn settle(&mut self, before: SessionStatus, timers: &mut Timers) {
        let status = self.session.status();
        self.status_tx.send_replace(status);
        if status != before {
            self.enter(status, timers);
        }
    }

    fn enter(&self, status: SessionStatus, timers: &mut Timers) {
        let cfg = &self.ctx.cfg;
        match status {
            SessionStatus::Active | SessionStatus::Paused | SessionStatus::Emergency => {
                timers.expiry_armed = false;
                if !timers.watchdog_armed {
                    timers.feed(self.heartbeat_timeout());
                }
            }
            SessionStatus::Offline => {
                timers.watchdog_armed = false;
                timers.arm_expiry(cfg.offline_retention, CloseReason::OfflineReaped);
            }
            SessionStatus::Stopped | SessionStatus::Completed => {
                timers.watchdog_armed = false;
                timers.arm_expiry(cfg.terminal_retention, CloseReason::Archived);
            }
        }
    }

    fn heartbeat_timeout(&self) -> Duration {
        self.session
            .heartbeat_timeout(self.ctx.cfg.heartbeat_multiplier_clamped())
    }

    fn publish(&self, payload: Payload) {
        let ev = Event::new(payload).with_origin(self.origin.clone());
        self.ctx
            .router
            .dispatch(ev, self.session.settings().share_location);
    }

    fn publish_transition(&self, transition: &Transition) {
        debug!(
            session = %self.origin.session_id,
            from = %transition.from,
            to = %transition.to,
            "status changed"
        );
        self.publish(Payload::StatusChanged {
            transition: transition.clone(),
        });
    }

    /// Offline recovery, then the location itself, then its alerts, then trip completion.
    fn publish_update(&self, update: &AppliedUpdate) {
        let (recovered, later): (Vec<&Transition>, Vec<&Transition>) = update
            .transitions
            .iter()
            .partition(|t| t.from == SessionStatus::Offline);

        for t in recovered {
            self.publish_transition(t);
        }
        self.publish(Payload::LocationUpdate {
            sample: update.sample.sample.clone(),
            status: update.status,
            performance: *self.session.performance(),
        });
        for alert in &update.alerts {
            self.publish(Payload::TrackingAlert {
                alert: alert.clone(),
            });
        }
        for t in later {
            self.publish_transition(t);
        }
    }

    fn publish_emergency(&self, ack: &EmergencyAck) {
        let (Some(alert), Some(emergency)) = (&ack.alert, self.session.open_emergency()) else {
            debug!(session = %self.origin.session_id, alert_id = %ack.alert_id, "emergency retry acknowledged");
            return;
        };
        self.publish(Payload::EmergencyAlert {
            alert: alert.clone(),
            emergency: emergency.clone(),
        });
        if let Some(t) = &ack.transition {
            self.publish_transition(t);
        }
    }

    fn rejected(&self, op: &'static str, err: &TrackingError) {
        warn!(
            session = %self.origin.session_id,
            op,
            reason = err.as_label(),
            error = %err,
            "operation rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration as TimeDelta};

    use super::*;
    use crate::alerts::AlertType;
    use crate::broadcast::SubscriptionManager;
    use crate::events::{Bus, EventKind};
    use crate::geo::{BoundingBox, Coordinates, GeofenceIndex};
    use crate::ids::{BusId, SessionId};
    use crate::session::{DriverInfo, TrackingSettings, TripPlan};

    const COLOMBO: Coordinates = Coordinates::new(6.9271, 79.8612);

    struct Harness {
        tx: mpsc::Sender<Command>,
        status: watch::Receiver<SessionStatus>,
        events: tokio::sync::broadcast::Receiver<Arc<Event>>,
        token: CancellationToken,
        join: tokio::task::JoinHandle<CloseReason>,
        t0: DateTime<Utc>,
    }

    fn spawn(cfg: Config) -> Harness {
        let bus = Bus::new(256);
        let events = bus.subscribe();
        let subs = Arc::new(SubscriptionManager::new(16, bus.clone()));
        let ctx = Arc::new(SessionContext {
            validator: GeoValidator::new(BoundingBox::SRI_LANKA, 120.0, 250.0),
            engine: AlertEngine::new(Arc::new(GeofenceIndex::default()), cfg.alert_cooldown),
            router: BroadcastRouter::new(subs, bus),
            cfg,
        });

        let t0 = Utc::now();
        let first = ctx
            .validator
            .validate(&LocationSample::at(COLOMBO, t0), None)
            .unwrap();
        let session = TrackingSession::start(
            SessionId::generate(),
            TripPlan::new("trip-1", "route-1"),
            BusId::from("NB-1"),
            DriverInfo::new("Sunil", "0771234567", "B1234567"),
            first,
            TrackingSettings::default().with_update_interval(30),
            &ctx.engine,
        );

        let (status_tx, status) = watch::channel(session.status());
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let actor = SessionActor::new(session, ctx, status_tx);
        let join = tokio::spawn(actor.run(rx, token.clone()));
        Harness {
            tx,
            status,
            events,
            token,
            join,
            t0,
        }
    }

    async fn ingest(h: &Harness, secs: i64) -> Result<AppliedUpdate, TrackingError> {
        let (reply, rx) = oneshot::channel();
        let sample = LocationSample::at(COLOMBO, h.t0 + TimeDelta::seconds(secs));
        h.tx.send(Command::Ingest { sample, reply }).await.unwrap();
        rx.await.unwrap()
    }

    async fn control(h: &Harness, op: ControlOp) -> Result<ControlAck, TrackingError> {
        let (reply, rx) = oneshot::channel();
        h.tx.send(Command::Control {
            op,
            reason: None,
            reply,
        })
        .await
        .unwrap();
        rx.await.unwrap()
    }

    fn kinds(h: &mut Harness) -> Vec<EventKind> {
        std::iter::from_fn(|| h.events.try_recv().ok())
            .map(|ev| ev.kind())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fires_after_three_intervals() {
        let mut h = spawn(Config::default());
        ingest(&h, 10).await.unwrap();

        tokio::time::sleep(Duration::from_secs(89)).await;
        assert_eq!(*h.status.borrow(), SessionStatus::Active);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*h.status.borrow(), SessionStatus::Offline);

        let mut alerts = Vec::new();
        while let Ok(ev) = h.events.try_recv() {
            if let Payload::TrackingAlert { alert } = &ev.payload {
                alerts.push(alert.alert_type);
            }
        }
        assert_eq!(alerts, vec![AlertType::CommunicationLoss]);

        let update = ingest(&h, 200).await.unwrap();
        assert_eq!(update.status, SessionStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_samples_keep_session_alive() {
        let h = spawn(Config::default());
        for step in 1..=5 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ingest(&h, step * 60).await.unwrap();
        }
        assert_eq!(*h.status.borrow(), SessionStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_session_is_archived_after_retention() {
        let mut h = spawn(Config {
            terminal_retention: Duration::from_secs(60),
            ..Config::default()
        });
        control(&h, ControlOp::Stop).await.unwrap();
        let err = ingest(&h, 5).await.unwrap_err();
        assert_eq!(err.as_label(), "session_terminated");

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!((&mut h.join).await.unwrap(), CloseReason::Archived);
        assert_eq!(kinds(&mut h).last(), Some(&EventKind::SessionClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_session_is_reaped() {
        let h = spawn(Config {
            offline_retention: Duration::from_secs(120),
            ..Config::default()
        });
        tokio::time::sleep(Duration::from_secs(91 + 121)).await;
        assert_eq!(h.join.await.unwrap(), CloseReason::OfflineReaped);
    }

    #[tokio::test]
    async fn cancellation_closes_the_actor() {
        let mut h = spawn(Config::default());
        h.token.cancel();
        assert_eq!((&mut h.join).await.unwrap(), CloseReason::Cancelled);
        let seen = kinds(&mut h);
        assert_eq!(seen.first(), Some(&EventKind::SessionOpened));
        assert_eq!(seen.last(), Some(&EventKind::SessionClosed));
    }

    #[tokio::test]
    async fn events_follow_apply_order() {
        let mut h = spawn(Config::default());
        control(&h, ControlOp::Pause).await.unwrap();
        ingest(&h, 5).await.unwrap();
        control(&h, ControlOp::Resume).await.unwrap();

        assert_eq!(
            kinds(&mut h),
            vec![
                EventKind::SessionOpened,
                EventKind::StatusChanged,
                EventKind::LocationUpdate,
                EventKind::StatusChanged,
            ]
        );
    }
}
