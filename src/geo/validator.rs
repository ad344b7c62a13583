//! # GeoValidator: admission checks for raw location samples.
//!
//! Pure function over `(raw sample, last accepted sample)`. It never touches
//! session state; the state machine decides what to do with the outcome.
//!
//! ## Check order
//! ```text
//! raw ──► 1. bounds      (operating bounding box)      ─► OutOfBounds
//!     ──► 2. monotonic   (timestamp > last.timestamp)  ─► StaleSample
//!     ──► 3. ranges      (speed, heading, accuracy)    ─► InvalidSpeed / InvalidHeading / InvalidAccuracy
//!     ──► 4. plausibility (haversine / elapsed)        ─► flagged only, never rejected
//! ```

use serde::{Deserialize, Serialize};

use super::coords::BoundingBox;
use super::sample::LocationSample;
use crate::error::Rejection;

/// Which measurement tripped the speed ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    Reported,
    Implied,
}

/// Speed above the regional ceiling, handed to the alert engine as a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedFlag {
    pub observed_kmh: f64,
    pub limit_kmh: f64,
    pub source: SpeedSource,
}

impl SpeedFlag {
    /// Fraction above the limit (`0.1` = 10% over).
    pub fn overage(&self) -> f64 {
        (self.observed_kmh - self.limit_kmh) / self.limit_kmh
    }
}

/// A sample that passed validation, with derived kinematics.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedSample {
    pub sample: LocationSample,
    /// Distance from the previous sample in metres (0 for the first sample).
    pub distance_m: f64,
    /// Speed implied by distance over elapsed time, when a previous sample exists.
    pub implied_speed_kmh: Option<f64>,
    /// Set when reported or implied speed exceeds the ceiling.
    pub speed_flag: Option<SpeedFlag>,
}

/// Validates and normalizes raw samples against a fixed operating region.
#[derive(Clone, Debug)]
pub struct GeoValidator {
    bounds: BoundingBox,
    speed_limit_kmh: f64,
    max_reported_speed_kmh: f64,
}

impl GeoValidator {
    /// Creates a validator.
    ///
    /// - `speed_limit_kmh`: regional ceiling; above it a sample is flagged
    /// - `max_reported_speed_kmh`: sensor sanity bound; above it a sample is rejected
    pub fn new(bounds: BoundingBox, speed_limit_kmh: f64, max_reported_speed_kmh: f64) -> Self {
        Self {
            bounds,
            speed_limit_kmh,
            max_reported_speed_kmh: max_reported_speed_kmh.max(speed_limit_kmh),
        }
    }

    /// Operating region this validator enforces.
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Validates `raw` against the previously accepted sample `last`.
    pub fn validate(
        &self,
        raw: &LocationSample,
        last: Option<&LocationSample>,
    ) -> Result<ValidatedSample, Rejection> {
        let point = &raw.coordinates;
        if !self.bounds.contains(point) {
            return Err(Rejection::OutOfBounds {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }

        if let Some(prev) = last
            && raw.timestamp <= prev.timestamp
        {
            return Err(Rejection::StaleSample {
                last: prev.timestamp,
                received: raw.timestamp,
            });
        }

        if !raw.speed_kmh.is_finite()
            || raw.speed_kmh < 0.0
            || raw.speed_kmh > self.max_reported_speed_kmh
        {
            return Err(Rejection::InvalidSpeed {
                speed_kmh: raw.speed_kmh,
            });
        }
        if !raw.heading.is_finite() || !(0.0..360.0).contains(&raw.heading) {
            return Err(Rejection::InvalidHeading {
                heading: raw.heading,
            });
        }
        if !raw.accuracy_m.is_finite() || raw.accuracy_m < 0.0 {
            return Err(Rejection::InvalidAccuracy {
                accuracy_m: raw.accuracy_m,
            });
        }

        let (distance_m, implied_speed_kmh) = match last {
            Some(prev) => {
                let d = prev.coordinates.haversine_m(point);
                // A gap below one microsecond carries no usable speed.
                let implied = match (raw.timestamp - prev.timestamp).num_microseconds() {
                    Some(us) if us > 0 => Some(d / (us as f64 / 1_000_000.0) * 3.6),
                    Some(_) => None,
                    None => Some(0.0),
                };
                (d, implied)
            }
            None => (0.0, None),
        };

        Ok(ValidatedSample {
            sample: raw.clone(),
            distance_m,
            implied_speed_kmh,
            speed_flag: self.speed_flag(raw.speed_kmh, implied_speed_kmh),
        })
    }

    /// Picks the larger of reported and implied speed and flags it if above the ceiling.
    fn speed_flag(&self, reported: f64, implied: Option<f64>) -> Option<SpeedFlag> {
        let (observed_kmh, source) = match implied {
            Some(i) if i > reported => (i, SpeedSource::Implied),
            _ => (reported, SpeedSource::Reported),
        };
        (observed_kmh > self.speed_limit_kmh).then_some(SpeedFlag {
            observed_kmh,
            limit_kmh: self.speed_limit_kmh,
            source,
        })
    }
}
