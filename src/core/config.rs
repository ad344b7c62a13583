//! # Global runtime configuration.
//!
//! [`Config`] centralizes the tunables of the tracking runtime. The read-only
//! catalog (bounding box, geofences) is separate: see [`Catalog`](crate::Catalog).
//!
//! ## Sentinel values
//! - `terminal_retention = 0s` → terminal sessions are archived immediately
//! - `heartbeat_multiplier = 0` → treated as 1
//! - capacities of `0` → clamped to 1

use std::time::Duration;

/// Global configuration for the tracking runtime.
///
/// ## Field semantics
/// - `speed_limit_kmh`: region ceiling; implied or reported speed above it is flagged
/// - `max_reported_speed_kmh`: sensor maximum; reported speed above it is rejected
/// - `alert_cooldown`: minimum gap between two alerts of one type for one session
/// - `heartbeat_multiplier`: silence of `multiplier × update_interval` → `offline`
/// - `session_queue_capacity`: bounded command queue per session actor
/// - `observer_queue_capacity`: per-observer buffer; overflow drops the oldest event
/// - `bus_capacity`: internal event bus ring buffer size
/// - `terminal_retention`: how long a stopped/completed session keeps answering
/// - `offline_retention`: how long an offline session waits for a sample before reaping
/// - `grace`: maximum wait for session actors on shutdown
///
/// All fields are public. Prefer the clamping accessors over reading the
/// capacities directly.
#[derive(Clone, Debug)]
pub struct Config {
    pub speed_limit_kmh: f64,
    pub max_reported_speed_kmh: f64,
    pub alert_cooldown: Duration,
    pub heartbeat_multiplier: u32,
    pub session_queue_capacity: usize,
    pub observer_queue_capacity: usize,
    pub bus_capacity: usize,
    pub terminal_retention: Duration,
    pub offline_retention: Duration,
    pub grace: Duration,
}

impl Config {
    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Session command queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn session_queue_clamped(&self) -> usize {
        self.session_queue_capacity.max(1)
    }

    /// Observer buffer capacity clamped to a minimum of 1.
    #[inline]
    pub fn observer_queue_clamped(&self) -> usize {
        self.observer_queue_capacity.max(1)
    }

    /// Heartbeat multiplier clamped to a minimum of 1.
    #[inline]
    pub fn heartbeat_multiplier_clamped(&self) -> u32 {
        self.heartbeat_multiplier.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `speed_limit_kmh = 120`, `max_reported_speed_kmh = 250`
    /// - `alert_cooldown = 60s`, `heartbeat_multiplier = 3`
    /// - `session_queue_capacity = 64`, `observer_queue_capacity = 256`, `bus_capacity = 1024`
    /// - `terminal_retention = 5min`, `offline_retention = 30min`
    /// - `grace = 10s`
    fn default() -> Self {
        Self {
            speed_limit_kmh: 120.0,
            max_reported_speed_kmh: 250.0,
            alert_cooldown: Duration::from_secs(60),
            heartbeat_multiplier: 3,
            session_queue_capacity: 64,
            observer_queue_capacity: 256,
            bus_capacity: 1024,
            terminal_retention: Duration::from_secs(5 * 60),
            offline_retention: Duration::from_secs(30 * 60),
            grace: Duration::from_secs(10),
        }
    }
}
