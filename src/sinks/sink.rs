//! # Sink trait
//!
//! `Sink` is the extension point for plugging internal event consumers (audit
//! log, metrics, archival) into the runtime. Each sink is driven by a dedicated
//! worker fed by a bounded queue owned by the [`SinkSet`](crate::SinkSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching); they never block session
//!   actors or other sinks.
//! - Each sink declares its queue capacity via [`Sink::queue_capacity`]. On
//!   overflow the event is dropped for that sink and a `sink_overflow` event is
//!   published.
//!
//! ## Example
//! ```rust
//! use fleetvisor::{Event, EventKind, Sink};
//!
//! struct EmergencyAudit;
//!
//! #[async_trait::async_trait]
//! impl Sink for EmergencyAudit {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind() == EventKind::EmergencyAlert {
//!             // append to the audit trail...
//!         }
//!     }
//!     fn name(&self) -> &'static str { "emergency-audit" }
//!     fn queue_capacity(&self) -> usize { 4096 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for internal event consumers.
///
/// Called from a sink-dedicated worker task. Implementations should avoid
/// blocking the async runtime.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this sink's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
