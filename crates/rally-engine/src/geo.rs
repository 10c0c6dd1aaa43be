use rally_types::models::{Location, TravelMode};

use crate::travel::Estimate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Street distance over great-circle distance.
const DETOUR_FACTOR: f64 = 1.4;

/// Great-circle distance in metres.
pub fn haversine(from: Location, to: Location) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Rough travel estimate from the straight-line distance and a nominal speed
/// per mode.
pub fn straight_line(from: Location, to: Location, mode: TravelMode) -> Estimate {
    let distance = haversine(from, to) * DETOUR_FACTOR;
    let metres_per_sec = mode.fallback_speed_kmh() * 1000.0 / 3600.0;
    Estimate {
        distance: distance.round() as u32,
        duration: (distance / metres_per_sec).round() as u32,
    }
}
