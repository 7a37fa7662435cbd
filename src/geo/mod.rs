use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6_371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Whole minutes needed to cover `distance_km` at a constant average speed.
pub fn estimated_duration_minutes(distance_km: f64, average_speed_kmh: f64) -> u32 {
    if distance_km <= 0.0 || average_speed_kmh <= 0.0 {
        return 0;
    }

    (distance_km / average_speed_kmh * 60.0).ceil() as u32
}

/// Fuzzy point equality: both axes must differ by no more than `tolerance_deg`.
/// Absorbs binary rounding of decimal degrees so a gap of exactly the tolerance matches.
const DEGREE_EPSILON: f64 = 1e-9;

pub fn within_tolerance(a: &GeoPoint, b: &GeoPoint, tolerance_deg: f64) -> bool {
    let limit = tolerance_deg + DEGREE_EPSILON;
    (a.lat - b.lat).abs() <= limit && (a.lng - b.lng).abs() <= limit
}
