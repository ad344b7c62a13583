//! # Observer membership tables.
//!
//! [`SubscriptionManager`] tracks which observer belongs to which [`Topic`] and
//! owns the sending half of every observer's delivery channel.
//!
//! ## Rules
//! - An observer must `connect` before it can `subscribe`; connecting joins
//!   `role_{role}` and queues a `connected` event on the new stream.
//! - Role gating happens once, at subscribe time. A rejected call creates no
//!   membership at all, even for the topics in the same call that were allowed.
//! - The role passed to `subscribe` must be the role the observer connected
//!   with; an observer holds exactly one role for the life of its stream.
//! - `disconnect` revokes every membership and closes the stream.
//! - Locks are short and synchronous; delivery never happens under a lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::observer::ObserverStream;
use super::topic::{Role, Topic};
use crate::error::SubscriptionError;
use crate::events::{Bus, Event, Payload};
use crate::ids::ObserverId;

/// Sending half of one observer's channel, as handed to the router.
pub(crate) type Outbox = broadcast::Sender<Arc<Event>>;

struct Member {
    role: Role,
    topics: HashSet<Topic>,
    outbox: Outbox,
}

#[derive(Default)]
struct Tables {
    observers: HashMap<ObserverId, Member>,
    topics: HashMap<Topic, HashSet<ObserverId>>,
}

impl Tables {
    fn join(&mut self, observer: &ObserverId, topic: Topic) {
        let Some(member) = self.observers.get_mut(observer) else {
            return;
        };
        if member.topics.insert(topic.clone()) {
            self.topics.entry(topic).or_default().insert(observer.clone());
        }
    }

    fn leave(&mut self, observer: &ObserverId, topic: &Topic) {
        if let Some(member) = self.observers.get_mut(observer) {
            member.topics.remove(topic);
        }
        if let Some(set) = self.topics.get_mut(topic) {
            set.remove(observer);
            if set.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    fn drop_observer(&mut self, observer: &ObserverId) -> Option<Member> {
        let member = self.observers.remove(observer)?;
        for topic in &member.topics {
            if let Some(set) = self.topics.get_mut(topic) {
                set.remove(observer);
                if set.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        Some(member)
    }
}

/// Membership registry for connected observers.
pub struct SubscriptionManager {
    tables: RwLock<Tables>,
    capacity: usize,
    bus: Bus,
}

impl SubscriptionManager {
    /// Creates an empty manager; each observer channel buffers `capacity` events.
    pub fn new(capacity: usize, bus: Bus) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            capacity: capacity.max(1),
            bus,
        }
    }

    /// Opens the observer's stream and joins its role topic.
    ///
    /// Connecting an already connected observer replaces its stream; the old
    /// one is closed and its memberships are dropped.
    pub fn connect(&self, observer: ObserverId, role: Role) -> ObserverStream {
        let (outbox, rx) = broadcast::channel(self.capacity);
        let hello = Arc::new(Event::new(Payload::Connected {
            observer_id: observer.clone(),
            role,
        }));
        let _ = outbox.send(Arc::clone(&hello));

        {
            let mut tables = self.tables.write();
            if tables.drop_observer(&observer).is_some() {
                debug!(%observer, "replacing existing observer stream");
            }
            tables.observers.insert(
                observer.clone(),
                Member {
                    role,
                    topics: HashSet::new(),
                    outbox,
                },
            );
            tables.join(&observer, Topic::Role(role));
        }

        info!(%observer, %role, "observer connected");
        self.bus.publish_arc(hello);
        ObserverStream::new(observer, rx, self.bus.clone())
    }

    /// Adds memberships for `topics`, all or nothing.
    ///
    /// Fails with `InsufficientRole` if `role` may not join any of the topics
    /// or differs from the role the observer connected with, and with
    /// `UnknownObserver` if the observer has no open stream.
    pub fn subscribe(
        &self,
        observer: &ObserverId,
        role: Role,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Result<(), SubscriptionError> {
        let topics: Vec<Topic> = topics.into_iter().collect();
        if let Some(denied) = topics.iter().find(|t| !t.permits(role)) {
            return Err(SubscriptionError::InsufficientRole {
                role,
                topic: denied.to_string(),
            });
        }

        let mut tables = self.tables.write();
        let Some(member) = tables.observers.get(observer) else {
            return Err(SubscriptionError::UnknownObserver {
                observer: observer.clone(),
            });
        };
        if member.role != role {
            debug!(%observer, connected = %member.role, requested = %role, "role mismatch");
            let topic = topics.first().cloned().unwrap_or(Topic::Role(role));
            return Err(SubscriptionError::InsufficientRole {
                role,
                topic: topic.to_string(),
            });
        }
        for topic in topics {
            debug!(%observer, %topic, "subscribed");
            tables.join(observer, topic);
        }
        Ok(())
    }

    /// Removes memberships for `topics`; unknown memberships are ignored.
    pub fn unsubscribe(
        &self,
        observer: &ObserverId,
        topics: impl IntoIterator<Item = Topic>,
    ) -> Result<(), SubscriptionError> {
        let mut tables = self.tables.write();
        if !tables.observers.contains_key(observer) {
            return Err(SubscriptionError::UnknownObserver {
                observer: observer.clone(),
            });
        }
        for topic in topics {
            tables.leave(observer, &topic);
        }
        Ok(())
    }

    /// Revokes every membership and closes the observer's stream.
    ///
    /// Returns `false` if the observer was not connected.
    pub fn disconnect(&self, observer: &ObserverId) -> bool {
        let removed = self.tables.write().drop_observer(observer).is_some();
        if removed {
            info!(%observer, "observer disconnected");
        }
        removed
    }

    /// Observers currently in `topic`, sorted.
    pub fn members(&self, topic: &Topic) -> Vec<ObserverId> {
        let tables = self.tables.read();
        let mut out: Vec<ObserverId> = tables
            .topics
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    /// Topics the observer belongs to, sorted; `None` if not connected.
    pub fn topics_of(&self, observer: &ObserverId) -> Option<Vec<Topic>> {
        let tables = self.tables.read();
        let member = tables.observers.get(observer)?;
        let mut out: Vec<Topic> = member.topics.iter().cloned().collect();
        out.sort_unstable();
        Some(out)
    }

    /// Role the observer connected with.
    pub fn role_of(&self, observer: &ObserverId) -> Option<Role> {
        self.tables.read().observers.get(observer).map(|m| m.role)
    }

    /// Number of connected observers.
    pub fn observer_count(&self) -> usize {
        self.tables.read().observers.len()
    }

    /// Every observer that belongs to at least one of `topics`, each exactly once.
    pub(crate) fn recipients(&self, topics: &[Topic]) -> Vec<(ObserverId, Outbox)> {
        let tables = self.tables.read();
        let mut seen: HashSet<&ObserverId> = HashSet::new();
        let mut out = Vec::new();
        for topic in topics {
            let Some(set) = tables.topics.get(topic) else {
                continue;
            };
            for observer in set {
                if seen.insert(observer)
                    && let Some(member) = tables.observers.get(observer)
                {
                    out.push((observer.clone(), member.outbox.clone()));
                }
            }
        }
        out
    }

    /// Drops an observer whose stream is gone, unless it reconnected meanwhile.
    pub(crate) fn evict_closed(&self, observer: &ObserverId) {
        let mut tables = self.tables.write();
        let closed = tables
            .observers
            .get(observer)
            .is_some_and(|m| m.outbox.receiver_count() == 0);
        if closed {
            tables.drop_observer(observer);
            debug!(%observer, "evicted observer with closed stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn manager() -> SubscriptionManager {
        SubscriptionManager::new(16, Bus::new(16))
    }

    #[test]
    fn connect_joins_role_topic_and_greets() {
        let subs = manager();
        let id = ObserverId::from("op-1");
        let mut stream = subs.connect(id.clone(), Role::BusOperator);

        assert_eq!(subs.topics_of(&id).unwrap(), vec![Topic::Role(Role::BusOperator)]);
        let hello = stream.try_recv().unwrap();
        assert_eq!(hello.kind(), EventKind::Connected);
    }

    #[test]
    fn rejected_subscribe_creates_no_membership() {
        let subs = manager();
        let id = ObserverId::from("rider");
        let _stream = subs.connect(id.clone(), Role::Commuter);

        let err = subs
            .subscribe(
                &id,
                Role::Commuter,
                [Topic::Bus("NB-1".into()), Topic::DashboardUpdates],
            )
            .unwrap_err();
        assert_eq!(err.as_label(), "insufficient_role");
        assert!(subs.members(&Topic::DashboardUpdates).is_empty());
        assert!(subs.members(&Topic::Bus("NB-1".into())).is_empty());
    }

    #[test]
    fn subscribe_role_must_match_connected_role() {
        let subs = manager();
        let id = ObserverId::from("rider");
        let _stream = subs.connect(id.clone(), Role::Commuter);

        let err = subs
            .subscribe(&id, Role::NtcAdmin, [Topic::EmergencyAlerts])
            .unwrap_err();
        assert_eq!(err.as_label(), "insufficient_role");
        assert!(subs.members(&Topic::EmergencyAlerts).is_empty());
        assert_eq!(subs.topics_of(&id).unwrap(), vec![Topic::Role(Role::Commuter)]);
        assert_eq!(subs.role_of(&id), Some(Role::Commuter));
    }

    #[test]
    fn subscribe_requires_connection() {
        let subs = manager();
        let err = subs
            .subscribe(&ObserverId::from("ghost"), Role::NtcAdmin, [Topic::EmergencyAlerts])
            .unwrap_err();
        assert_eq!(err.as_label(), "unknown_observer");
    }

    #[test]
    fn disconnect_revokes_everything() {
        let subs = manager();
        let id = ObserverId::from("admin");
        let mut stream = subs.connect(id.clone(), Role::NtcAdmin);
        subs.subscribe(&id, Role::NtcAdmin, [Topic::EmergencyAlerts, Topic::DashboardUpdates])
            .unwrap();
        assert_eq!(subs.members(&Topic::EmergencyAlerts), vec![id.clone()]);

        assert!(subs.disconnect(&id));
        assert!(!subs.disconnect(&id));
        assert!(subs.members(&Topic::EmergencyAlerts).is_empty());
        assert!(subs.topics_of(&id).is_none());
        stream.drain();
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn recipients_are_unique_per_observer() {
        let subs = manager();
        let id = ObserverId::from("admin");
        let _stream = subs.connect(id.clone(), Role::NtcAdmin);
        subs.subscribe(&id, Role::NtcAdmin, [Topic::Bus("NB-1".into()), Topic::DashboardUpdates])
            .unwrap();

        let to = subs.recipients(&[Topic::Bus("NB-1".into()), Topic::DashboardUpdates]);
        assert_eq!(to.len(), 1);
    }

    #[test]
    fn reconnect_replaces_stream_and_memberships() {
        let subs = manager();
        let id = ObserverId::from("op");
        let mut old = subs.connect(id.clone(), Role::BusOperator);
        subs.subscribe(&id, Role::BusOperator, [Topic::DashboardUpdates])
            .unwrap();

        let _new = subs.connect(id.clone(), Role::BusOperator);
        assert!(subs.members(&Topic::DashboardUpdates).is_empty());
        assert_eq!(subs.observer_count(), 1);
        old.drain();
        assert!(old.try_recv().is_none());
    }
}
