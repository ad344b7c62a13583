//! # Typed topic keys and observer roles.
//!
//! Topics render to (and parse from) their string keys:
//!
//! | Topic                    | Key                 | Who may join                 |
//! |--------------------------|---------------------|------------------------------|
//! | `Tracking(session)`      | `tracking_{id}`     | anyone                       |
//! | `Trip(trip)`             | `trip_{id}`         | anyone                       |
//! | `Route(route)`           | `route_{id}`        | anyone                       |
//! | `Bus(bus)`               | `bus_{id}`          | anyone                       |
//! | `Role(role)`             | `role_{role}`       | that role only               |
//! | `DashboardUpdates`       | `dashboard_updates` | `ntc_admin`, `bus_operator`  |
//! | `EmergencyAlerts`        | `emergency_alerts`  | `ntc_admin`                  |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SubscriptionError;
use crate::ids::{BusId, RouteId, SessionId, TripId};

/// Verified role of an observer, resolved by the identity collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    NtcAdmin,
    BusOperator,
    Driver,
    Commuter,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::NtcAdmin, Role::BusOperator, Role::Driver, Role::Commuter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::NtcAdmin => "ntc_admin",
            Role::BusOperator => "bus_operator",
            Role::Driver => "driver",
            Role::Commuter => "commuter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| SubscriptionError::InvalidTopic { raw: s.to_string() })
    }
}

/// A named broadcast channel observers subscribe to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    Tracking(SessionId),
    Trip(TripId),
    Route(RouteId),
    Bus(BusId),
    Role(Role),
    DashboardUpdates,
    EmergencyAlerts,
}

const DASHBOARD_UPDATES: &str = "dashboard_updates";
const EMERGENCY_ALERTS: &str = "emergency_alerts";

impl Topic {
    /// True for topics that require an elevated role.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Topic::DashboardUpdates | Topic::EmergencyAlerts)
    }

    /// Whether `role` may join this topic.
    pub fn permits(&self, role: Role) -> bool {
        match self {
            Topic::DashboardUpdates => matches!(role, Role::NtcAdmin | Role::BusOperator),
            Topic::EmergencyAlerts => role == Role::NtcAdmin,
            Topic::Role(required) => *required == role,
            Topic::Tracking(_) | Topic::Trip(_) | Topic::Route(_) | Topic::Bus(_) => true,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Tracking(id) => write!(f, "tracking_{id}"),
            Topic::Trip(id) => write!(f, "trip_{id}"),
            Topic::Route(id) => write!(f, "route_{id}"),
            Topic::Bus(id) => write!(f, "bus_{id}"),
            Topic::Role(role) => write!(f, "role_{role}"),
            Topic::DashboardUpdates => f.write_str(DASHBOARD_UPDATES),
            Topic::EmergencyAlerts => f.write_str(EMERGENCY_ALERTS),
        }
    }
}

impl FromStr for Topic {
    type Err = SubscriptionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || SubscriptionError::InvalidTopic {
            raw: raw.to_string(),
        };
        let non_empty = |rest: &str| (!rest.is_empty()).then(|| rest.to_string());

        match raw {
            DASHBOARD_UPDATES => return Ok(Topic::DashboardUpdates),
            EMERGENCY_ALERTS => return Ok(Topic::EmergencyAlerts),
            _ => {}
        }

        let (prefix, rest) = raw.split_once('_').ok_or_else(invalid)?;
        let topic = match prefix {
            "tracking" => Topic::Tracking(rest.parse().map_err(|_| invalid())?),
            "trip" => Topic::Trip(non_empty(rest).ok_or_else(invalid)?.into()),
            "route" => Topic::Route(non_empty(rest).ok_or_else(invalid)?.into()),
            "bus" => Topic::Bus(non_empty(rest).ok_or_else(invalid)?.into()),
            "role" => Topic::Role(rest.parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };
        Ok(topic)
    }
}

impl TryFrom<String> for Topic {
    type Error = SubscriptionError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}
