//! Geospatial building blocks.
//!
//! ## Contents
//! - [`Coordinates`], [`BoundingBox`] positions, operating region, haversine distance
//! - [`LocationSample`] raw GPS telemetry
//! - [`GeoValidator`] bounds / monotonicity / range / plausibility checks
//! - [`GeofenceIndex`] read-only point-in-zone queries over the [`Catalog`]

mod coords;
mod geofence;
mod sample;
mod validator;

pub use coords::{BoundingBox, Coordinates, EARTH_RADIUS_M};
pub use geofence::{Catalog, Geofence, GeofenceAlerts, GeofenceIndex, GeofenceKind, RADIUS_RANGE_M};
pub use sample::LocationSample;
pub use validator::{GeoValidator, SpeedFlag, SpeedSource, ValidatedSample};
