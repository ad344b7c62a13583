//! # Geofences and the read-only geofence index.
//!
//! The catalog collaborator owns geofences; the core only holds an immutable
//! snapshot loaded once at startup. The index is shared behind an `Arc` and
//! needs no locking.
//!
//! ## Rules
//! - Radius must be within `10..=5000` metres.
//! - Containment uses haversine distance; a cheap degree-box prefilter skips
//!   zones that are clearly too far.
//! - Iteration order is catalog order, which keeps alert ordering deterministic.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::coords::{BoundingBox, Coordinates, EARTH_RADIUS_M};
use crate::error::CatalogError;
use crate::ids::GeofenceId;

/// Allowed geofence radius range in metres.
pub const RADIUS_RANGE_M: std::ops::RangeInclusive<f64> = 10.0..=5000.0;

/// Classification of a geofence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceKind {
    Station,
    Terminal,
    Depot,
    Waypoint,
    RestrictedZone,
}

/// Which crossings of a geofence raise alerts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeofenceAlerts {
    #[serde(default)]
    pub on_entry: bool,
    #[serde(default)]
    pub on_exit: bool,
}

/// Named circular zone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: GeofenceId,
    pub name: String,
    pub kind: GeofenceKind,
    pub center: Coordinates,
    pub radius_m: f64,
    #[serde(default)]
    pub alerts: GeofenceAlerts,
}

impl Geofence {
    fn validate(&self) -> Result<(), CatalogError> {
        if !self.center.is_finite()
            || !(-90.0..=90.0).contains(&self.center.latitude)
            || !(-180.0..=180.0).contains(&self.center.longitude)
        {
            return Err(CatalogError::InvalidCenter {
                id: self.id.clone(),
            });
        }
        if !self.radius_m.is_finite() || !RADIUS_RANGE_M.contains(&self.radius_m) {
            return Err(CatalogError::InvalidRadius {
                id: self.id.clone(),
                radius_m: self.radius_m,
            });
        }
        Ok(())
    }
}

/// Read-only configuration received from the catalog collaborator.
///
/// ## Example
/// ```rust
/// use fleetvisor::Catalog;
///
/// let catalog = Catalog::from_json(r#"{
///     "bounds": { "min_latitude": 5.85, "max_latitude": 9.9,
///                 "min_longitude": 79.5, "max_longitude": 81.95 },
///     "geofences": [{
///         "id": "fort", "name": "Colombo Fort", "kind": "station",
///         "center": { "latitude": 6.9344, "longitude": 79.8500 },
///         "radius_m": 150, "alerts": { "on_entry": true, "on_exit": true }
///     }]
/// }"#).unwrap();
/// assert_eq!(catalog.geofences.len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub bounds: BoundingBox,
    #[serde(default)]
    pub geofences: Vec<Geofence>,
}

impl Catalog {
    /// Parses and validates a catalog document.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_json::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Checks bounds, every geofence, and id uniqueness.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if !self.bounds.is_valid() {
            return Err(CatalogError::InvalidBounds);
        }
        let mut seen = HashSet::with_capacity(self.geofences.len());
        for g in &self.geofences {
            g.validate()?;
            if !seen.insert(&g.id) {
                return Err(CatalogError::DuplicateGeofence { id: g.id.clone() });
            }
        }
        Ok(())
    }
}

/// Geofence with a precomputed degree box for prefiltering.
#[derive(Debug)]
struct Entry {
    fence: Geofence,
    dlat: f64,
    dlon: f64,
}

impl Entry {
    fn new(fence: Geofence) -> Self {
        let dlat = (fence.radius_m / EARTH_RADIUS_M).to_degrees();
        let cos_lat = fence.center.latitude.to_radians().cos().abs().max(1e-6);
        let dlon = (dlat / cos_lat).min(180.0);
        Self { fence, dlat, dlon }
    }

    fn contains(&self, point: &Coordinates) -> bool {
        let c = &self.fence.center;
        // Slack covers the haversine/degree-box mismatch at the corners.
        if (point.latitude - c.latitude).abs() > self.dlat * 1.01
            || (point.longitude - c.longitude).abs() > self.dlon * 1.01
        {
            return false;
        }
        c.haversine_m(point) <= self.fence.radius_m
    }
}

/// Immutable snapshot of geofences answering point-in-zone queries.
#[derive(Debug, Default)]
pub struct GeofenceIndex {
    entries: Vec<Entry>,
    by_id: HashMap<GeofenceId, usize>,
}

impl GeofenceIndex {
    /// Builds an index from a validated catalog.
    pub fn new(geofences: Vec<Geofence>) -> Result<Self, CatalogError> {
        let mut entries = Vec::with_capacity(geofences.len());
        let mut by_id = HashMap::with_capacity(geofences.len());
        for fence in geofences {
            fence.validate()?;
            if by_id.insert(fence.id.clone(), entries.len()).is_some() {
                return Err(CatalogError::DuplicateGeofence { id: fence.id });
            }
            entries.push(Entry::new(fence));
        }
        Ok(Self { entries, by_id })
    }

    /// Number of geofences.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the index holds no geofences.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a geofence by id.
    pub fn get(&self, id: &GeofenceId) -> Option<&Geofence> {
        self.by_id.get(id).map(|&i| &self.entries[i].fence)
    }

    /// Iterates geofences in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Geofence> {
        self.entries.iter().map(|e| &e.fence)
    }

    /// Returns `true` if `point` is inside the geofence; unknown ids are never containing.
    pub fn contains(&self, id: &GeofenceId, point: &Coordinates) -> bool {
        self.by_id
            .get(id)
            .is_some_and(|&i| self.entries[i].contains(point))
    }

    /// Ids of every geofence containing `point`.
    pub fn all_containing(&self, point: &Coordinates) -> BTreeSet<GeofenceId> {
        self.entries
            .iter()
            .filter(|e| e.contains(point))
            .map(|e| e.fence.id.clone())
            .collect()
    }

    /// Containment of `point` for every geofence, in catalog order.
    pub(crate) fn membership(&self, point: &Coordinates) -> impl Iterator<Item = (&Geofence, bool)> {
        self.entries.iter().map(move |e| (&e.fence, e.contains(point)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence(id: &str, lat: f64, lon: f64, radius_m: f64) -> Geofence {
        Geofence {
            id: GeofenceId::from(id),
            name: id.to_string(),
            kind: GeofenceKind::Station,
            center: Coordinates::new(lat, lon),
            radius_m,
            alerts: GeofenceAlerts {
                on_entry: true,
                on_exit: true,
            },
        }
    }

    #[test]
    fn contains_respects_radius() {
        let idx = GeofenceIndex::new(vec![fence("fort", 6.9344, 79.8500, 100.0)]).unwrap();
        let id = GeofenceId::from("fort");
        assert!(idx.contains(&id, &Coordinates::new(6.9344, 79.8500)));
        // ~89 m north.
        assert!(idx.contains(&id, &Coordinates::new(6.9352, 79.8500)));
        // ~111 m north.
        assert!(!idx.contains(&id, &Coordinates::new(6.9354, 79.8500)));
        assert!(!idx.contains(&GeofenceId::from("nope"), &Coordinates::new(6.9344, 79.85)));
    }

    #[test]
    fn all_containing_returns_overlaps() {
        let idx = GeofenceIndex::new(vec![
            fence("outer", 7.0, 80.0, 2000.0),
            fence("inner", 7.0, 80.0, 50.0),
            fence("far", 8.0, 81.0, 50.0),
        ])
        .unwrap();
        let hits = idx.all_containing(&Coordinates::new(7.0001, 80.0));
        let ids: Vec<&str> = hits.iter().map(GeofenceId::as_str).collect();
        assert_eq!(ids, vec!["inner", "outer"]);
    }

    #[test]
    fn rejects_bad_radius_and_duplicates() {
        let err = GeofenceIndex::new(vec![fence("tiny", 7.0, 80.0, 5.0)]).unwrap_err();
        assert_eq!(err.as_label(), "catalog_invalid_radius");

        let err = GeofenceIndex::new(vec![
            fence("a", 7.0, 80.0, 50.0),
            fence("a", 7.1, 80.0, 50.0),
        ])
        .unwrap_err();
        assert_eq!(err.as_label(), "catalog_duplicate_geofence");
    }

    #[test]
    fn catalog_from_json_validates() {
        let raw = r#"{"geofences":[{"id":"d","name":"Depot","kind":"depot",
            "center":{"latitude":7.0,"longitude":80.0},"radius_m":6000}]}"#;
        assert!(matches!(
            Catalog::from_json(raw),
            Err(CatalogError::InvalidRadius { .. })
        ));
        assert!(matches!(
            Catalog::from_json("{not json"),
            Err(CatalogError::Malformed(_))
        ));
    }
}
