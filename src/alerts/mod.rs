//! Alert model and rule engine.
//!
//! - [`Alert`], [`AlertType`], [`Severity`], [`AlertResolution`] immutable alert records
//! - [`AlertEngine`] geofence / speed / liveness / emergency rules with cooldown dedup
//! - [`AlertState`] per-session membership and cooldown memory

mod alert;
mod engine;

pub use alert::{Alert, AlertResolution, AlertType, Severity};
pub use engine::{AlertEngine, AlertState, Evaluation};
