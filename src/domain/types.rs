//! Shared types for the geofence tracker

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mean Earth radius used for great-circle distances
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Default trigger zone radius in meters
pub const DEFAULT_RADIUS_M: f32 = 180.0;

/// Identifier every re-centered zone is registered under
pub const FIXED_ZONE_ID: &str = "geo_id";

/// A resolved position, as produced by a location fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_accuracy_m: Option<f32>,
}

impl GeographicPoint {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, vertical_accuracy_m: None }
    }

    pub fn with_vertical_accuracy(mut self, accuracy_m: f32) -> Self {
        self.vertical_accuracy_m = Some(accuracy_m);
        self
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_m(&self, other: &GeographicPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Point reached by travelling `distance_m` along `bearing_deg` (0 = north)
    pub fn offset(&self, bearing_deg: f64, distance_m: f64) -> GeographicPoint {
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();
        let bearing = bearing_deg.to_radians();
        let angular = distance_m / EARTH_RADIUS_M;

        let lat2 =
            (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
        let lon2 = lon1
            + (bearing.sin() * angular.sin() * lat1.cos())
                .atan2(angular.cos() - lat1.sin() * lat2.sin());

        GeographicPoint::new(lat2.to_degrees(), lon2.to_degrees())
    }
}

impl std::fmt::Display for GeographicPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Newtype wrapper for zone identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn fixed() -> Self {
        ZoneId(FIXED_ZONE_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        ZoneId(s.to_string())
    }
}

/// Geofence transition kinds, carrying the platform integer codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Enter,
    Exit,
    Dwell,
}

impl TransitionKind {
    pub fn code(self) -> u8 {
        match self {
            TransitionKind::Enter => 1,
            TransitionKind::Exit => 2,
            TransitionKind::Dwell => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TransitionKind::Enter),
            2 => Some(TransitionKind::Exit),
            4 => Some(TransitionKind::Dwell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Enter => "enter",
            TransitionKind::Exit => "exit",
            TransitionKind::Dwell => "dwell",
        }
    }
}

/// Set of transitions a zone reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionMask(u8);

impl TransitionMask {
    pub const ENTER_EXIT: TransitionMask = TransitionMask(1 | 2);

    pub fn contains(&self, kind: TransitionKind) -> bool {
        self.0 & kind.code() != 0
    }
}

/// Transition reported at registration time if it already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialTrigger {
    Enter,
    Exit,
}

/// A circular zone registered with the platform
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerZone {
    pub id: ZoneId,
    pub center: GeographicPoint,
    pub radius_m: f32,
    pub transitions: TransitionMask,
    pub initial_trigger: InitialTrigger,
    /// None = never expires
    pub expires_after: Option<Duration>,
    /// 0 = report immediately
    pub responsiveness: Duration,
}

impl TriggerZone {
    /// The zone the controller installs after every fix
    pub fn centered_at(id: ZoneId, center: GeographicPoint, radius_m: f32) -> Self {
        Self {
            id,
            center,
            radius_m,
            transitions: TransitionMask::ENTER_EXIT,
            initial_trigger: InitialTrigger::Enter,
            expires_after: None,
            responsiveness: Duration::ZERO,
        }
    }

    #[inline]
    pub fn contains(&self, point: &GeographicPoint) -> bool {
        self.center.distance_m(point) <= f64::from(self.radius_m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixPriority {
    HighAccuracy,
    Balanced,
    LowPower,
    Passive,
}

impl FixPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixPriority::HighAccuracy => "high_accuracy",
            FixPriority::Balanced => "balanced",
            FixPriority::LowPower => "low_power",
            FixPriority::Passive => "passive",
        }
    }
}

/// Precision and frequency policy for a fix request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixRequestPolicy {
    pub interval: Duration,
    pub min_interval: Duration,
    pub priority: FixPriority,
    /// Hold delivery until the fix meets accuracy expectations
    pub wait_for_accurate: bool,
}

impl Default for FixRequestPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            min_interval: Duration::from_secs(5),
            priority: FixPriority::HighAccuracy,
            wait_for_accurate: true,
        }
    }
}

/// Geofencing event payload as delivered by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofencingEvent {
    #[serde(default)]
    pub error_code: Option<i32>,
    pub transition: u8,
    #[serde(default)]
    pub triggering_geofences: Vec<ZoneId>,
    #[serde(default)]
    pub triggering_location: Option<GeographicPoint>,
}

impl GeofencingEvent {
    pub fn has_error(&self) -> bool {
        matches!(self.error_code, Some(code) if code != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_known_value() {
        // One degree of latitude is roughly 111.2 km
        let a = GeographicPoint::new(0.0, 0.0);
        let b = GeographicPoint::new(1.0, 0.0);
        let d = a.distance_m(&b);
        assert!((d - 111_195.0).abs() < 100.0, "distance was {d}");
    }

    #[test]
    fn test_offset_moves_expected_distance() {
        let start = GeographicPoint::new(-23.55, -46.63);
        let moved = start.offset(90.0, 250.0);
        let d = start.distance_m(&moved);
        assert!((d - 250.0).abs() < 0.5, "distance was {d}");
        assert!(moved.longitude > start.longitude);
    }

    #[test]
    fn test_zone_contains() {
        let center = GeographicPoint::new(10.0, 20.0);
        let zone = TriggerZone::centered_at(ZoneId::fixed(), center, DEFAULT_RADIUS_M);

        assert!(zone.contains(&center));
        assert!(zone.contains(&center.offset(0.0, 150.0)));
        assert!(!zone.contains(&center.offset(0.0, 200.0)));
    }

    #[test]
    fn test_standard_zone_shape() {
        let zone = TriggerZone::centered_at(ZoneId::fixed(), GeographicPoint::new(1.0, 2.0), 180.0);
        assert_eq!(zone.id.as_str(), "geo_id");
        assert!(zone.transitions.contains(TransitionKind::Enter));
        assert!(zone.transitions.contains(TransitionKind::Exit));
        assert!(!zone.transitions.contains(TransitionKind::Dwell));
        assert_eq!(zone.initial_trigger, InitialTrigger::Enter);
        assert_eq!(zone.expires_after, None);
        assert_eq!(zone.responsiveness, Duration::ZERO);
    }

    #[test]
    fn test_transition_codes() {
        for kind in [TransitionKind::Enter, TransitionKind::Exit, TransitionKind::Dwell] {
            assert_eq!(TransitionKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(TransitionKind::from_code(3), None);
    }

    #[test]
    fn test_event_error_code() {
        let ok: GeofencingEvent =
            serde_json::from_str(r#"{"transition": 2, "error_code": 0}"#).unwrap();
        assert!(!ok.has_error());
        let failed: GeofencingEvent =
            serde_json::from_str(r#"{"transition": 2, "error_code": 1000}"#).unwrap();
        assert!(failed.has_error());
    }
}
