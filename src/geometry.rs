use geo::{Bearing, Distance, Haversine, Point};

use crate::model::Coordinate;

/// Meters spanned by one degree of latitude.
pub(crate) const METERS_PER_DEGREE: f64 = 110_567.0;

/// Squared planar distance in meters² under the equirectangular
/// approximation. The longitude scale is fixed once, from the reference
/// latitude, so repeated distance checks against the same origin stay free of
/// trigonometry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DistanceApproximator {
    lon: f64,
    lat: f64,
    meters_per_lon_degree: f64,
}

impl DistanceApproximator {
    pub fn new(origin: Coordinate) -> Self {
        Self {
            lon: origin.lon,
            lat: origin.lat,
            meters_per_lon_degree: origin.lat.to_radians().cos() * METERS_PER_DEGREE,
        }
    }

    pub fn distance_squared(&self, p: Coordinate) -> f64 {
        let dx = (self.lon - p.lon) * self.meters_per_lon_degree;
        let dy = (self.lat - p.lat) * METERS_PER_DEGREE;
        dx * dx + dy * dy
    }
}

fn point(c: Coordinate) -> Point {
    Point::new(c.lon, c.lat)
}

/// Haversine distance in meters.
pub(crate) fn distance(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.distance(point(a), point(b))
}

/// Heading from `a` to `b` in degrees [0, 360), clockwise from north.
pub(crate) fn heading(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.bearing(point(a), point(b)).rem_euclid(360.0)
}

/// Linear interpolation between two coordinates, `t` in [0, 1].
pub(crate) fn interpolate(a: Coordinate, b: Coordinate, t: f64) -> Coordinate {
    Coordinate::new(a.lon + (b.lon - a.lon) * t, a.lat + (b.lat - a.lat) * t)
}

/// Circular distance between two angles in degrees, never more than 180.
pub(crate) fn angle_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    diff.min(360.0 - diff)
}
