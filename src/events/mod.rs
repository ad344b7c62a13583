//! Runtime events: types and the internal broadcast bus.
//!
//! ## Contents
//! - [`Payload`], [`EventKind`], [`Event`] event data model and envelope
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: session actors (through the router), `SessionRegistry`,
//!   `SinkSet` workers (overflow/panic), `ObserverStream` (lag), `Tracker` (shutdown).
//! - **Consumers**: the registry listener and the sink listener.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{CloseReason, Event, EventKind, Origin, Payload};
