//! # Internal event sinks.
//!
//! Sinks consume the internal [`Bus`](crate::Bus): every event the
//! runtime produces, including the ones observers never see (session
//! lifecycle, lag, shutdown).
//!
//! ```text
//! Bus ──► sink listener ──► SinkSet::emit(Arc<Event>)
//!                               ├──► LogWriter       (feature "logging")
//!                               └──► custom sinks    (audit, metrics, archival)
//! ```

mod set;
mod sink;

#[cfg(feature = "logging")]
mod log;

pub use set::SinkSet;
pub use sink::Sink;

#[cfg(feature = "logging")]
pub use log::LogWriter;
