//! Small geodesy helpers shared by the airspace index, route resolver and
//! enrichment matching.

use geo::{Bearing, Destination, Distance, Haversine, Point};

/// Meters per nautical mile.
pub const METERS_PER_NM: f64 = 1852.0;

/// Cheap equirectangular squared-distance approximation, in squared degrees
/// with the longitude axis scaled by cos(latitude). Only useful for ranking
/// nearby candidates against an anchor; never returned to callers as a
/// distance.
pub fn equirectangular_sq(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1) * ((lat1 + lat2) / 2.0).to_radians().cos();
    dlat * dlat + dlon * dlon
}

/// Great-circle distance in nautical miles.
pub fn distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Haversine.distance(Point::new(lon1, lat1), Point::new(lon2, lat2)) / METERS_PER_NM
}

/// Project a point along a great circle. Bearing is true degrees, distance in
/// nautical miles. Returns (lat, lon).
pub fn project(lat: f64, lon: f64, bearing_deg: f64, distance_nm: f64) -> (f64, f64) {
    let dest = Haversine.destination(
        Point::new(lon, lat),
        bearing_deg,
        distance_nm * METERS_PER_NM,
    );
    (dest.y(), dest.x())
}

/// True bearing in degrees from the first point to the second, normalized to
/// [0, 360).
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let b = Haversine.bearing(Point::new(lon1, lat1), Point::new(lon2, lat2));
    (b + 360.0) % 360.0
}
