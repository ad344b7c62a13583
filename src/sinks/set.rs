//! # SinkSet: non-blocking fan-out over internal sinks
//!
//! [`SinkSet`] hands each [`Event`] to every sink **without awaiting** its
//! processing.
//!
//! ## What it guarantees
//! - `emit()` returns immediately.
//! - Per-sink FIFO (queue order).
//! - Panics inside a sink are caught and reported as `sink_panicked`.
//!
//! ## What it does **not** guarantee
//! - No ordering across different sinks.
//! - No retries on overflow (the event is dropped for that sink and counted).
//!
//! ## Diagram
//! ```text
//!    emit(Arc<Event>)
//!        ├────────────────► [queue S1] ─► worker S1 ─► on_event()
//!        ├────────────────► [queue S2] ─► worker S2 ─► on_event()
//!        └────────────────► [queue SN] ─► worker SN ─► on_event()
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, warn};

use super::Sink;
use crate::events::{Bus, Event};

struct SinkChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out with per-sink bounded queues and worker tasks.
pub struct SinkSet {
    channels: Vec<SinkChannel>,
    workers: Vec<JoinHandle<()>>,
    dropped: AtomicU64,
    bus: Bus,
}

impl SinkSet {
    /// Creates the set and spawns one worker per sink.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn Sink>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(sinks.len());
        let mut workers = Vec::with_capacity(sinks.len());

        for sink in sinks {
            let name = sink.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sink.queue_capacity().max(1));
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sink.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(&*panic_err);
                        error!(sink = sink.name(), %info, "sink panicked");
                        worker_bus.publish(Event::sink_panicked(sink.name(), info));
                    }
                }
            });

            channels.push(SinkChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            dropped: AtomicU64::new(0),
            bus,
        }
    }

    /// Hands one event to every sink (non-blocking).
    pub fn emit(&self, event: &Arc<Event>) {
        // no overflow-on-overflow events
        let is_overflow = event.is_sink_overflow();

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            self.dropped.fetch_add(1, Ordering::Relaxed);
            if !is_overflow {
                warn!(sink = channel.name, reason, kind = event.kind().as_str(), "sink dropped event");
                self.bus.publish(Event::sink_overflow(channel.name, reason));
            }
        }
    }

    /// Events dropped across all sinks since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Closes every queue and waits for the workers to drain.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::events::{EventKind, Payload};

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Sink for Counter {
        async fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    #[async_trait]
    impl Sink for Exploding {
        async fn on_event(&self, _event: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    struct Stuck;

    #[async_trait]
    impl Sink for Stuck {
        async fn on_event(&self, _event: &Event) {
            std::future::pending::<()>().await;
        }
        fn name(&self) -> &'static str {
            "stuck"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    fn ev() -> Arc<Event> {
        Arc::new(Event::new(Payload::ShutdownRequested))
    }

    #[tokio::test]
    async fn every_sink_sees_every_event() {
        let seen = Arc::new(AtomicUsize::new(0));
        let set = SinkSet::new(
            vec![
                Arc::new(Counter(seen.clone())) as Arc<dyn Sink>,
                Arc::new(Counter(seen.clone())),
            ],
            Bus::new(8),
        );
        set.emit(&ev());
        set.emit(&ev());
        set.shutdown().await;
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn panic_is_isolated_and_reported() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let seen = Arc::new(AtomicUsize::new(0));
        let set = SinkSet::new(
            vec![Arc::new(Exploding) as Arc<dyn Sink>, Arc::new(Counter(seen.clone()))],
            bus,
        );
        set.emit(&ev());
        set.shutdown().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let reported = rx.recv().await.unwrap();
        assert_eq!(reported.kind(), EventKind::SinkPanicked);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SinkSet::new(vec![Arc::new(Stuck) as Arc<dyn Sink>], bus);

        for _ in 0..5 {
            set.emit(&ev());
        }
        assert!(set.dropped() >= 3);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::SinkOverflow);
    }
}
