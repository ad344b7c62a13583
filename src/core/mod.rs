//! Runtime core: session actors, registry, facade and lifecycle.
//!
//! The public API from this module is [`Tracker`] (built with
//! [`TrackerBuilder`] from a [`Config`]).
//!
//! Internal modules:
//! - [`actor`]: one task per session, serializing its commands, watchdog and retention;
//! - [`registry`]: concurrent map of session actors, duplicate checks, cleanup;
//! - [`tracker`]: facade over registry, subscriptions, router and sinks;
//! - [`builder`]: wiring of all runtime components;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod actor;
mod builder;
mod config;
mod registry;
mod shutdown;
mod tracker;

pub use builder::TrackerBuilder;
pub use config::Config;
pub use registry::SessionRegistry;
pub use tracker::Tracker;
