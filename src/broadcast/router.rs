//! # Topic-based fan-out.
//!
//! [`BroadcastRouter`] turns an event into a topic set, resolves the topic set
//! into a de-duplicated observer set and hands the event to every observer's
//! channel without waiting. Every event also goes to the internal [`Bus`].
//!
//! ## Routing policy
//! ```text
//! location_update      → tracking_{s} trip_{t} bus_{b} route_{r} dashboard_updates
//!                        (share_location = false: tracking_{s} dashboard_updates)
//! tracking_alert       → tracking_{s}
//!   severity ≥ high    →   + dashboard_updates
//!   severity = critical→   + emergency_alerts
//! emergency_alert      → tracking_{s} dashboard_updates emergency_alerts
//! status_changed       → tracking_{s} trip_{t} dashboard_updates
//! emergency_resolved   → tracking_{s} dashboard_updates emergency_alerts
//! runtime events       → (bus only)
//! ```
//!
//! Role is not re-checked here: membership already encodes the decision made at
//! subscribe time.

use std::sync::Arc;

use tracing::trace;

use super::subscriptions::SubscriptionManager;
use super::topic::Topic;
use crate::alerts::Severity;
use crate::events::{Bus, Event, Origin, Payload};

/// Fans events out to subscribed observers.
#[derive(Clone)]
pub struct BroadcastRouter {
    subs: Arc<SubscriptionManager>,
    bus: Bus,
}

impl BroadcastRouter {
    pub fn new(subs: Arc<SubscriptionManager>, bus: Bus) -> Self {
        Self { subs, bus }
    }

    /// Delivers `event` once to every observer in any of `topics`.
    ///
    /// Never blocks. Returns the number of observers the event was handed to.
    pub fn publish(&self, event: Event, topics: &[Topic]) -> usize {
        let event = Arc::new(event);
        let delivered = self.deliver(&event, topics);
        self.bus.publish_arc(event);
        delivered
    }

    /// Routes `event` according to the policy above and publishes it.
    pub fn dispatch(&self, event: Event, share_location: bool) -> usize {
        let topics = topics_for(&event, share_location);
        self.publish(event, &topics)
    }

    fn deliver(&self, event: &Arc<Event>, topics: &[Topic]) -> usize {
        if topics.is_empty() {
            return 0;
        }
        let mut delivered = 0;
        for (observer, outbox) in self.subs.recipients(topics) {
            match outbox.send(Arc::clone(event)) {
                Ok(_) => delivered += 1,
                Err(_) => self.subs.evict_closed(&observer),
            }
        }
        trace!(kind = event.kind().as_str(), delivered, "event delivered");
        delivered
    }
}

/// Topic set an event is routed to.
pub fn topics_for(event: &Event, share_location: bool) -> Vec<Topic> {
    let Some(origin) = &event.origin else {
        return Vec::new();
    };
    let tracking = Topic::Tracking(origin.session_id);

    match &event.payload {
        Payload::LocationUpdate { .. } if share_location => vec![
            tracking,
            Topic::Trip(origin.trip_id.clone()),
            Topic::Bus(origin.bus_id.clone()),
            Topic::Route(origin.route_id.clone()),
            Topic::DashboardUpdates,
        ],
        Payload::LocationUpdate { .. } => vec![tracking, Topic::DashboardUpdates],
        Payload::TrackingAlert { alert } => {
            let mut topics = vec![tracking];
            if alert.severity >= Severity::High {
                topics.push(Topic::DashboardUpdates);
            }
            if alert.severity == Severity::Critical {
                topics.push(Topic::EmergencyAlerts);
            }
            topics
        }
        Payload::EmergencyAlert { .. } | Payload::EmergencyResolved { .. } => {
            vec![tracking, Topic::DashboardUpdates, Topic::EmergencyAlerts]
        }
        Payload::StatusChanged { .. } => vec![
            tracking,
            Topic::Trip(origin.trip_id.clone()),
            Topic::DashboardUpdates,
        ],
        _ => Vec::new(),
    }
}

impl Origin {
    /// `tracking_{session}` topic of this origin.
    pub fn tracking_topic(&self) -> Topic {
        Topic::Tracking(self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::alerts::{Alert, AlertType};
    use crate::broadcast::Role;
    use crate::events::EventKind;
    use crate::geo::{Coordinates, LocationSample};
    use crate::ids::{ObserverId, SessionId};
    use crate::session::{Performance, SessionStatus};

    fn origin() -> Origin {
        Origin {
            session_id: SessionId::generate(),
            trip_id: "trip-1".into(),
            bus_id: "NB-1".into(),
            route_id: "138".into(),
        }
    }

    fn location(origin: &Origin) -> Event {
        Event::new(Payload::LocationUpdate {
            sample: LocationSample::at(Coordinates::new(6.9271, 79.8612), Utc::now()),
            status: SessionStatus::Active,
            performance: Performance::default(),
        })
        .with_origin(origin.clone())
    }

    fn alert(origin: &Origin, severity: Severity) -> Event {
        let alert = Alert::new(origin.session_id, AlertType::SpeedViolation, severity, "fast", Utc::now());
        Event::new(Payload::TrackingAlert { alert }).with_origin(origin.clone())
    }

    #[test]
    fn alert_topics_scale_with_severity() {
        let o = origin();
        assert_eq!(topics_for(&alert(&o, Severity::Medium), true), vec![o.tracking_topic()]);
        assert_eq!(
            topics_for(&alert(&o, Severity::High), true),
            vec![o.tracking_topic(), Topic::DashboardUpdates]
        );
        assert_eq!(
            topics_for(&alert(&o, Severity::Critical), true),
            vec![o.tracking_topic(), Topic::DashboardUpdates, Topic::EmergencyAlerts]
        );
    }

    #[test]
    fn hidden_location_skips_public_topics() {
        let o = origin();
        assert_eq!(topics_for(&location(&o), true).len(), 5);
        assert_eq!(
            topics_for(&location(&o), false),
            vec![o.tracking_topic(), Topic::DashboardUpdates]
        );
    }

    #[test]
    fn overlapping_topics_deliver_once() {
        let bus = Bus::new(16);
        let subs = Arc::new(SubscriptionManager::new(16, bus.clone()));
        let router = BroadcastRouter::new(Arc::clone(&subs), bus);
        let o = origin();

        let admin = ObserverId::from("admin");
        let mut stream = subs.connect(admin.clone(), Role::NtcAdmin);
        subs.subscribe(
            &admin,
            Role::NtcAdmin,
            [Topic::Bus(o.bus_id.clone()), Topic::DashboardUpdates],
        )
        .unwrap();
        stream.drain();

        assert_eq!(router.dispatch(location(&o), true), 1);
        let got = stream.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind(), EventKind::LocationUpdate);
    }

    #[test]
    fn dropped_stream_is_evicted() {
        let bus = Bus::new(16);
        let subs = Arc::new(SubscriptionManager::new(16, bus.clone()));
        let router = BroadcastRouter::new(Arc::clone(&subs), bus);
        let o = origin();

        let id = ObserverId::from("gone");
        let stream = subs.connect(id.clone(), Role::Commuter);
        subs.subscribe(&id, Role::Commuter, [o.tracking_topic()]).unwrap();
        drop(stream);

        assert_eq!(router.dispatch(alert(&o, Severity::Low), true), 0);
        assert_eq!(subs.observer_count(), 0);
    }
}
