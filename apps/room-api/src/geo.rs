//! Geofence validation.
//!
//! Pure admit/deny checks. A missing device position against a mandatory
//! constraint is an ordinary deny, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A device's last-known position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

/// Restricts joining and voting to devices inside a circle, optionally
/// within a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PositionConstraint {
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl PositionConstraint {
    pub fn center(&self) -> Position {
        Position {
            lat: self.lat,
            lng: self.lng,
        }
    }

    /// Whether a device at `position` is admitted at time `now`.
    pub fn admits(&self, position: Option<Position>, now: DateTime<Utc>) -> bool {
        if let Some(starts_at) = self.starts_at {
            if now < starts_at {
                return false;
            }
        }
        if let Some(ends_at) = self.ends_at {
            if now > ends_at {
                return false;
            }
        }
        let Some(position) = position else {
            return false;
        };
        haversine_meters(self.center(), position) <= self.radius_meters
    }
}

/// Great-circle distance between two positions, in meters.
pub fn haversine_meters(a: Position, b: Position) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}
