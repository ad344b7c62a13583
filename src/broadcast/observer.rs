//! # Per-observer event stream.
//!
//! Each connected observer owns one bounded broadcast channel. The router
//! never waits on it: when the observer falls behind, the oldest events are
//! overwritten and the next `recv()` reports how many were skipped.
//!
//! ```text
//! BroadcastRouter ──send()──► [ring buffer, observer_queue_capacity] ──► ObserverStream::recv()
//!                                   (full → oldest dropped)               (Lagged(n) → log + skip)
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::events::{Bus, Event, Payload};
use crate::ids::ObserverId;

/// Receiving end of one observer's delivery channel.
///
/// Returned by [`Tracker::connect`](crate::Tracker::connect). Dropping it (or
/// connecting the same observer again) closes the stream.
#[derive(Debug)]
pub struct ObserverStream {
    observer: ObserverId,
    rx: broadcast::Receiver<Arc<Event>>,
    bus: Bus,
}

impl ObserverStream {
    pub(crate) fn new(observer: ObserverId, rx: broadcast::Receiver<Arc<Event>>, bus: Bus) -> Self {
        Self { observer, rx, bus }
    }

    /// Observer this stream belongs to.
    pub fn observer(&self) -> &ObserverId {
        &self.observer
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the observer was disconnected or replaced.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.try_recv() {
                Ok(ev) => return Some(ev),
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Vec<Arc<Event>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn lagged(&self, skipped: u64) {
        warn!(observer = %self.observer, skipped, "observer lagged, oldest events dropped");
        self.bus.publish(Event::new(Payload::ObserverLagged {
            observer_id: self.observer.clone(),
            skipped,
        }));
    }
}
