//! # Coordinates, bounding box and great-circle distance.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a position from latitude and longitude.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Great-circle distance to `other` in metres (haversine).
    pub fn haversine_m(&self, other: &Coordinates) -> f64 {
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_M * c
    }
}

/// Fixed geographic rectangle constraining valid coordinates for a deployment.
///
/// Bounds are inclusive on every edge.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Operating region covering Sri Lanka's national road network.
    pub const SRI_LANKA: BoundingBox = BoundingBox {
        min_latitude: 5.85,
        max_latitude: 9.90,
        min_longitude: 79.50,
        max_longitude: 81.95,
    };

    /// Returns `true` if `point` lies inside the box (edges included).
    pub fn contains(&self, point: &Coordinates) -> bool {
        point.is_finite()
            && (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }

    /// Returns `true` if the box is well formed (finite, ordered, within WGS84 ranges).
    pub fn is_valid(&self) -> bool {
        let finite = [
            self.min_latitude,
            self.max_latitude,
            self.min_longitude,
            self.max_longitude,
        ]
        .iter()
        .all(|v| v.is_finite());

        finite
            && self.min_latitude < self.max_latitude
            && self.min_longitude < self.max_longitude
            && self.min_latitude >= -90.0
            && self.max_latitude <= 90.0
            && self.min_longitude >= -180.0
            && self.max_longitude <= 180.0
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::SRI_LANKA
    }
}
