//! # Internal event bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] carrying every
//! event the runtime produces to internal consumers: the registry listener
//! (session cleanup) and the sink listener (logging, audit).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Receivers:
//!   SessionActor 1 ──┐
//!   SessionActor N ──┼──► Bus ──┬──► Registry listener (session_closed → cleanup)
//!   Router         ──┤          └──► Sink listener ──► SinkSet ──► per-sink workers
//!   Tracker        ──┘
//! ```
//!
//! Observers are **not** fed from the bus; the [`BroadcastRouter`](crate::BroadcastRouter)
//! delivers to them directly through per-observer channels.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no receivers at send time.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Arc<Event>>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Arc<Event>>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        self.publish_arc(Arc::new(ev));
    }

    /// Publishes an already shared event.
    pub fn publish_arc(&self, ev: Arc<Event>) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }
}
