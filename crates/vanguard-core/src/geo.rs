use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geofence radius for check-in gating, in meters. Call sites may widen
/// it, e.g. nearby-customer discovery uses 1000m.
pub const CHECK_IN_RADIUS_M: f64 = 10.0;

/// A validated coordinate pair. Construction rejects NaN, infinite and
/// out-of-range values so distance math can never produce a spurious zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, WorkflowError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(WorkflowError::validation(
                "latitude and longitude must be finite numbers",
            ));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(WorkflowError::validation(format!(
                "latitude {latitude} is out of range"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(WorkflowError::validation(format!(
                "longitude {longitude} is out of range"
            )));
        }

        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(self) -> f64 {
        self.latitude
    }

    pub fn longitude(self) -> f64 {
        self.longitude
    }
}

/// Great-circle distance between two points, in meters. Haversine on a
/// mean-radius sphere; handles the antimeridian without special cases.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Qualitative fix quality, derived from reported accuracy alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GpsConfidence {
    High,
    Medium,
    Low,
    VeryLow,
}

impl GpsConfidence {
    pub fn from_accuracy(accuracy_m: Option<f64>) -> Self {
        match accuracy_m {
            Some(accuracy) if accuracy.is_finite() && accuracy >= 0.0 => {
                if accuracy <= 10.0 {
                    Self::High
                } else if accuracy <= 30.0 {
                    Self::Medium
                } else if accuracy <= 100.0 {
                    Self::Low
                } else {
                    Self::VeryLow
                }
            }
            _ => Self::VeryLow,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::VeryLow => "VERY_LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProximityCheck {
    pub within_radius: bool,
    pub distance_m: f64,
    pub confidence: GpsConfidence,
}

/// Scores an agent fix against a target location. Pure; the caller decides
/// whether `within_radius == false` is a hard gate or advisory.
pub fn validate_proximity(
    agent: GeoPoint,
    target: GeoPoint,
    radius_m: f64,
    accuracy_m: Option<f64>,
) -> ProximityCheck {
    let distance_m = haversine_meters(agent, target);

    ProximityCheck {
        within_radius: distance_m <= radius_m,
        distance_m,
        confidence: GpsConfidence::from_accuracy(accuracy_m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One degree of latitude on the mean-radius sphere.
    const DEGREE_M: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn offset_north(base: GeoPoint, meters: f64) -> GeoPoint {
        point(base.latitude() + meters / DEGREE_M, base.longitude())
    }

    #[test]
    fn rejects_nan_and_infinite_coordinates() {
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::new(0.0, f64::NAN).is_err());
        assert!(GeoPoint::new(f64::INFINITY, 0.0).is_err());
        assert!(GeoPoint::new(0.0, f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(GeoPoint::new(90.1, 0.0).is_err());
        assert!(GeoPoint::new(-90.1, 0.0).is_err());
        assert!(GeoPoint::new(0.0, 180.5).is_err());
        assert!(GeoPoint::new(0.0, -181.0).is_err());
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = point(40.7128, -74.006);
        assert!(haversine_meters(a, a).abs() < 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (point(40.7128, -74.006), point(51.5074, -0.1278)),
            (point(-33.8688, 151.2093), point(35.6762, 139.6503)),
            (point(0.0, 0.0), point(0.0, 0.001)),
        ];
        for (a, b) in pairs {
            let ab = haversine_meters(a, b);
            let ba = haversine_meters(b, a);
            assert!((ab - ba).abs() < 1e-9);
        }
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = haversine_meters(point(0.0, 0.0), point(1.0, 0.0));
        assert!((d - DEGREE_M).abs() < 1.0, "got {d}");
    }

    #[test]
    fn antimeridian_crossing_is_a_short_hop() {
        // 0.2 degrees of longitude apart across the date line at 10N.
        let d = haversine_meters(point(10.0, 179.9), point(10.0, -179.9));
        let expected = 0.2 * DEGREE_M * 10.0_f64.to_radians().cos();
        assert!((d - expected).abs() < 25.0, "got {d}, expected {expected}");
    }

    #[test]
    fn within_radius_is_monotone_in_radius() {
        let base = point(40.0, -74.0);
        let agent = offset_north(base, 7.0);
        for radius in [8.0, 10.0, 50.0, 1_000.0] {
            assert!(validate_proximity(agent, base, radius, None).within_radius);
        }
        assert!(!validate_proximity(agent, base, 5.0, None).within_radius);
    }

    #[test]
    fn agent_seven_meters_out_is_admitted_with_high_confidence() {
        let customer = point(40.0, -74.0);
        let agent = offset_north(customer, 7.0);

        let check = validate_proximity(agent, customer, CHECK_IN_RADIUS_M, Some(5.0));
        assert!(check.within_radius);
        assert!((check.distance_m - 7.0).abs() < 0.1, "got {}", check.distance_m);
        assert_eq!(check.confidence, GpsConfidence::High);
    }

    #[test]
    fn agent_fifteen_meters_out_is_rejected_with_distance_reported() {
        let customer = point(40.0, -74.0);
        let agent = offset_north(customer, 15.0);

        let check = validate_proximity(agent, customer, CHECK_IN_RADIUS_M, Some(5.0));
        assert!(!check.within_radius);
        assert!((check.distance_m - 15.0).abs() < 0.1, "got {}", check.distance_m);
    }

    #[test]
    fn confidence_buckets_follow_accuracy() {
        assert_eq!(GpsConfidence::from_accuracy(Some(5.0)), GpsConfidence::High);
        assert_eq!(GpsConfidence::from_accuracy(Some(10.0)), GpsConfidence::High);
        assert_eq!(GpsConfidence::from_accuracy(Some(10.01)), GpsConfidence::Medium);
        assert_eq!(GpsConfidence::from_accuracy(Some(30.0)), GpsConfidence::Medium);
        assert_eq!(GpsConfidence::from_accuracy(Some(100.0)), GpsConfidence::Low);
        assert_eq!(GpsConfidence::from_accuracy(Some(100.5)), GpsConfidence::VeryLow);
    }

    #[test]
    fn absent_or_garbage_accuracy_means_very_low() {
        assert_eq!(GpsConfidence::from_accuracy(None), GpsConfidence::VeryLow);
        assert_eq!(GpsConfidence::from_accuracy(Some(f64::NAN)), GpsConfidence::VeryLow);
        assert_eq!(GpsConfidence::from_accuracy(Some(-1.0)), GpsConfidence::VeryLow);
    }

    #[test]
    fn confidence_is_independent_of_distance() {
        let customer = point(40.0, -74.0);
        let far = offset_north(customer, 5_000.0);

        let check = validate_proximity(far, customer, CHECK_IN_RADIUS_M, Some(3.0));
        assert!(!check.within_radius);
        assert_eq!(check.confidence, GpsConfidence::High);
    }
}
