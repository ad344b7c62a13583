use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::coords::Coordinates;

/// One GPS telemetry sample as reported by the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub coordinates: Coordinates,
    /// Reported ground speed in km/h.
    pub speed_kmh: f64,
    /// Course over ground in degrees, `[0, 360)`.
    pub heading: f64,
    /// Altitude in metres, when the receiver provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    /// Horizontal accuracy radius in metres.
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    /// A stationary sample at `coordinates` with default accuracy.
    pub fn at(coordinates: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinates,
            speed_kmh: 0.0,
            heading: 0.0,
            altitude_m: None,
            accuracy_m: 5.0,
            timestamp,
        }
    }

    /// Returns a copy with the given reported speed.
    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = speed_kmh;
        self
    }

    /// Returns a copy with the given heading.
    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }
}
