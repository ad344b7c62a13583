//! # Session registry - concurrent map of live session actors.
//!
//! Owns one handle per session actor (command sender, status view, join handle,
//! cancellation token) and the `bus → session` index used for duplicate checks.
//!
//! ## Architecture
//! ```text
//! Tracker::start/restore ──► SessionRegistry::spawn(session)
//!                               ├─► by_bus.entry(bus)   (duplicate check, held while inserting)
//!                               ├─► tokio::spawn(SessionActor::run(rx, child_token))
//!                               └─► sessions.insert(id, Handle)
//!
//! Bus ──► SessionRegistry listener
//!           ├─► session_closed(id) → cleanup(id)
//!           └─► Lagged              → reap() sweep
//! ```
//!
//! ## Rules
//! - `sessions` and `by_bus` are sharded (`DashMap`); no lock spans sessions.
//! - Lock order is `by_bus` then `sessions`, never the reverse.
//! - A bus may hold a new session only once its previous one is terminal or gone.
//! - Each actor runs under a child of the runtime token.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast::error::RecvError, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::actor::{Command, SessionActor, SessionContext};
use crate::error::TrackingError;
use crate::events::{Bus, CloseReason, Payload};
use crate::ids::{BusId, SessionId};
use crate::session::{SessionStatus, TrackingSession};

/// Handle to a running session actor.
struct Handle {
    bus_id: BusId,
    tx: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    join: JoinHandle<CloseReason>,
    cancel: CancellationToken,
}

impl Handle {
    /// True while the actor runs a session that may still take samples.
    fn is_live(&self) -> bool {
        !self.tx.is_closed() && !self.status.borrow().is_terminal()
    }
}

/// Concurrency-safe registry of session actors.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Handle>,
    by_bus: DashMap<BusId, SessionId>,
    ctx: Arc<SessionContext>,
    bus: Bus,
    runtime_token: CancellationToken,
}

impl SessionRegistry {
    pub(crate) fn new(ctx: Arc<SessionContext>, bus: Bus, runtime_token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            by_bus: DashMap::new(),
            ctx,
            bus,
            runtime_token,
        })
    }

    /// Spawns the bus listener that removes finished actors.
    ///
    /// Call once during tracker init.
    pub(crate) fn spawn_listener(self: &Arc<Self>) {
        let mut rx = self.bus.subscribe();
        let rt = self.runtime_token.clone();
        let me = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rt.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => {
                            if let (Payload::SessionClosed { .. }, Some(id)) = (&ev.payload, ev.session_id()) {
                                me.cleanup_closed(id);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "registry listener lagged, sweeping");
                            me.reap();
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    /// Registers a session and starts its actor.
    ///
    /// Fails with `DuplicateSession` if the bus already has a live session.
    pub(crate) fn spawn(&self, session: TrackingSession) -> Result<SessionId, TrackingError> {
        let id = session.id();
        let bus_id = session.bus_id().clone();

        if self.runtime_token.is_cancelled() {
            return Err(TrackingError::SessionUnavailable { session_id: id });
        }
        if self.sessions.contains_key(&id) {
            return Err(TrackingError::DuplicateSession {
                bus_id,
                existing: id,
            });
        }

        match self.by_bus.entry(bus_id.clone()) {
            Entry::Occupied(mut slot) => {
                let existing = *slot.get();
                let live = self.sessions.get(&existing).is_some_and(|h| h.is_live());
                if live {
                    return Err(TrackingError::DuplicateSession { bus_id, existing });
                }
                self.insert(session);
                slot.insert(id);
            }
            Entry::Vacant(slot) => {
                self.insert(session);
                slot.insert(id);
            }
        }

        info!(session = %id, bus = %bus_id, "session registered");
        Ok(id)
    }

    fn insert(&self, session: TrackingSession) {
        let id = session.id();
        let bus_id = session.bus_id().clone();
        let (status_tx, status) = watch::channel(session.status());
        let (tx, rx) = mpsc::channel(self.ctx.cfg.session_queue_clamped());
        let cancel = self.runtime_token.child_token();

        let actor = SessionActor::new(session, Arc::clone(&self.ctx), status_tx);
        let join = tokio::spawn(actor.run(rx, cancel.clone()));

        self.sessions.insert(
            id,
            Handle {
                bus_id,
                tx,
                status,
                join,
                cancel,
            },
        );
    }

    /// Sends a command built around a fresh reply channel and waits for the answer.
    ///
    /// Waits for queue space when the session's queue is full.
    pub(crate) async fn request<T>(
        &self,
        id: SessionId,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TrackingError> {
        let tx = self
            .sessions
            .get(&id)
            .map(|h| h.tx.clone())
            .ok_or(TrackingError::SessionNotFound { session_id: id })?;

        let (reply, rx) = oneshot::channel();
        let unavailable = || TrackingError::SessionUnavailable { session_id: id };
        tx.send(make(reply)).await.map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())
    }

    /// Current status of a session, without touching its actor.
    pub fn status(&self, id: SessionId) -> Option<SessionStatus> {
        self.sessions.get(&id).map(|h| *h.status.borrow())
    }

    /// Session currently registered for a bus.
    pub fn session_for_bus(&self, bus_id: &BusId) -> Option<SessionId> {
        self.by_bus.get(bus_id).map(|e| *e.value())
    }

    /// Sorted ids of every registered session.
    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes every entry whose actor has exited. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| e.join.is_finished() || e.tx.is_closed())
            .map(|e| *e.key())
            .collect();
        finished.into_iter().filter(|id| self.cleanup(*id)).count()
    }

    /// Cancels one actor, waits for it and removes its entry.
    pub async fn remove(&self, id: SessionId) -> Result<(), TrackingError> {
        let Some(handle) = self.take(id) else {
            return Err(TrackingError::SessionNotFound { session_id: id });
        };
        handle.cancel.cancel();
        if let Err(e) = handle.join.await {
            warn!(session = %id, error = %e, "session actor panicked");
        }
        info!(session = %id, "session removed");
        Ok(())
    }

    /// Cancels every actor and waits up to `grace` for all of them.
    ///
    /// Returns the ids of actors still running at the deadline (they are aborted).
    pub async fn cancel_all(&self, grace: Duration) -> Vec<SessionId> {
        let ids = self.list();
        let handles: Vec<(SessionId, Handle)> = ids
            .into_iter()
            .filter_map(|id| self.take(id).map(|h| (id, h)))
            .collect();

        for (_, h) in &handles {
            h.cancel.cancel();
        }

        let deadline = Instant::now() + grace;
        let mut stuck = Vec::new();
        for (id, mut h) in handles {
            if timeout_at(deadline, &mut h.join).await.is_err() {
                h.join.abort();
                stuck.push(id);
            }
        }
        stuck
    }

    fn cleanup(&self, id: SessionId) -> bool {
        let removed = self.take(id).is_some();
        if removed {
            debug!(session = %id, "session cleaned up");
        }
        removed
    }

    /// Removes the entry only if its actor already closed its queue.
    ///
    /// A `session_closed` event may arrive after the same id was restored
    /// under a fresh actor; that entry stays.
    fn cleanup_closed(&self, id: SessionId) {
        let Some((_, handle)) = self.sessions.remove_if(&id, |_, h| h.tx.is_closed()) else {
            return;
        };
        self.by_bus.remove_if(&handle.bus_id, |_, current| *current == id);
        debug!(session = %id, "session cleaned up");
    }

    /// Removes the handle and its bus index entry (if it still points here).
    fn take(&self, id: SessionId) -> Option<Handle> {
        let (_, handle) = self.sessions.remove(&id)?;
        self.by_bus.remove_if(&handle.bus_id, |_, current| *current == id);
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::alerts::AlertEngine;
    use crate::broadcast::{BroadcastRouter, SubscriptionManager};
    use crate::core::actor::ControlOp;
    use crate::core::config::Config;
    use crate::geo::{BoundingBox, Coordinates, GeoValidator, GeofenceIndex, LocationSample};
    use crate::session::{ControlAck, DriverInfo, TrackingSettings, TripPlan};

    fn registry() -> Arc<SessionRegistry> {
        let bus = Bus::new(64);
        let subs = Arc::new(SubscriptionManager::new(8, bus.clone()));
        let cfg = Config::default();
        let ctx = Arc::new(SessionContext {
            validator: GeoValidator::new(BoundingBox::SRI_LANKA, 120.0, 250.0),
            engine: AlertEngine::new(Arc::new(GeofenceIndex::default()), cfg.alert_cooldown),
            router: BroadcastRouter::new(subs, bus.clone()),
            cfg,
        });
        let reg = SessionRegistry::new(ctx, bus, CancellationToken::new());
        reg.spawn_listener();
        reg
    }

    fn session(reg: &SessionRegistry, bus: &str) -> TrackingSession {
        let first = reg
            .ctx
            .validator
            .validate(&LocationSample::at(Coordinates::new(7.2906, 80.6337), Utc::now()), None)
            .unwrap();
        TrackingSession::start(
            SessionId::generate(),
            TripPlan::new("trip", "route"),
            BusId::from(bus),
            DriverInfo::new("Ruwan", "+94 77 123 4567", "DL-55555"),
            first,
            TrackingSettings::default(),
            &reg.ctx.engine,
        )
    }

    async fn stop(reg: &SessionRegistry, id: SessionId) -> ControlAck {
        reg.request(id, |reply| Command::Control {
            op: ControlOp::Stop,
            reason: None,
            reply,
        })
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn one_live_session_per_bus() {
        let reg = registry();
        let first = reg.spawn(session(&reg, "NB-1")).unwrap();
        let err = reg.spawn(session(&reg, "NB-1")).unwrap_err();
        assert_eq!(
            err,
            TrackingError::DuplicateSession {
                bus_id: BusId::from("NB-1"),
                existing: first
            }
        );
        reg.spawn(session(&reg, "NB-2")).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn terminal_session_frees_the_bus() {
        let reg = registry();
        let first = reg.spawn(session(&reg, "NB-1")).unwrap();
        stop(&reg, first).await;

        let second = reg.spawn(session(&reg, "NB-1")).unwrap();
        assert_eq!(reg.session_for_bus(&BusId::from("NB-1")), Some(second));
        assert_eq!(reg.status(first), Some(SessionStatus::Stopped));
    }

    #[tokio::test]
    async fn remove_cancels_and_forgets() {
        let reg = registry();
        let id = reg.spawn(session(&reg, "NB-1")).unwrap();
        reg.remove(id).await.unwrap();

        assert!(reg.is_empty());
        assert!(reg.session_for_bus(&BusId::from("NB-1")).is_none());
        let err = reg.remove(id).await.unwrap_err();
        assert_eq!(err.as_label(), "session_not_found");
    }

    #[tokio::test]
    async fn cancel_all_within_grace() {
        let reg = registry();
        for bus in ["NB-1", "NB-2", "NB-3"] {
            reg.spawn(session(&reg, bus)).unwrap();
        }
        let stuck = reg.cancel_all(Duration::from_secs(1)).await;
        assert!(stuck.is_empty());
        assert!(reg.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn archived_sessions_are_cleaned_up() {
        let reg = registry();
        let id = reg.spawn(session(&reg, "NB-1")).unwrap();
        stop(&reg, id).await;

        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        tokio::task::yield_now().await;
        reg.reap();
        assert!(reg.status(id).is_none());
    }
}
