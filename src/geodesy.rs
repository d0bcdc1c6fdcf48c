//! Straight-line distances and the Web-Mercator reprojection.
//!
//! Distances are chord lengths between earth-centred, earth-fixed (ECEF)
//! positions on the WGS84 ellipsoid. Over the few hundred metres between a
//! point and its snapped vertex this matches the geodesic closely.

use std::f64::consts::PI;

use crate::error::ProjectionError;
use crate::model::{Crs, Point};
use crate::traits::CoordinateTransform;

/// WGS84 semi-major axis in metres.
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 flattening.
const FLATTENING: f64 = 1.0 / 298.257_223_563;

/// Largest latitude representable in Web Mercator.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

fn ecef(lat: f64, lng: f64) -> [f64; 3] {
    let e2 = FLATTENING * (2.0 - FLATTENING);
    let lat = lat.to_radians();
    let lng = lng.to_radians();
    let n = SEMI_MAJOR_AXIS / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    [
        n * lat.cos() * lng.cos(),
        n * lat.cos() * lng.sin(),
        n * (1.0 - e2) * lat.sin(),
    ]
}

/// Straight-line distance in metres between two `(lat, lng)` positions in
/// WGS84 degrees.
pub fn euclidean_distance(from: (f64, f64), to: (f64, f64)) -> f64 {
    let a = ecef(from.0, from.1);
    let b = ecef(to.0, to.1);
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Time to cover `distance` at `speed`; zero when either is zero.
pub fn calculate_time(distance: f64, speed: f64) -> f64 {
    if distance == 0.0 || speed == 0.0 {
        return 0.0;
    }
    distance / speed
}

/// Reprojection between WGS84 (`EPSG:4326`) and spherical Web Mercator
/// (`EPSG:3857`). Equal source and target CRS pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl WebMercator {
    fn forward(lat: f64, lng: f64) -> (f64, f64) {
        let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
        let x = SEMI_MAJOR_AXIS * lng.to_radians();
        let y = SEMI_MAJOR_AXIS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
        (x, y)
    }

    fn inverse(x: f64, y: f64) -> (f64, f64) {
        let lng = (x / SEMI_MAJOR_AXIS).to_degrees();
        let lat = (2.0 * (y / SEMI_MAJOR_AXIS).exp().atan() - PI / 2.0).to_degrees();
        (lat, lng)
    }
}

impl CoordinateTransform for WebMercator {
    fn transform(&self, point: &Point, target: &Crs) -> Result<Point, ProjectionError> {
        if point.crs() == target {
            return Ok(point.clone());
        }
        match (point.crs().code(), target.code()) {
            (Some(4326), Some(3857)) => {
                let (x, y) = Self::forward(point.lat(), point.lng());
                Ok(Point::new(y, x, target.clone()))
            }
            (Some(3857), Some(4326)) => {
                let (lat, lng) = Self::inverse(point.lng(), point.lat());
                Ok(Point::new(lat, lng, target.clone()))
            }
            _ => Err(ProjectionError::Unsupported {
                from: point.crs().to_string(),
                to: target.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_position_is_zero_distance() {
        assert_eq!(euclidean_distance((60.18, 24.93), (60.18, 24.93)), 0.0);
    }

    #[test]
    fn test_distance_along_meridian() {
        // One arc-minute of latitude at 60N is about 1857 m.
        let d = euclidean_distance((60.0, 25.0), (60.0 + 1.0 / 60.0, 25.0));
        assert!((d - 1855.0).abs() < 10.0, "distance was {d}");
    }

    #[test]
    fn test_calculate_time_zero_guards() {
        assert_eq!(calculate_time(0.0, 70.0), 0.0);
        assert_eq!(calculate_time(180.0, 0.0), 0.0);
        assert_eq!(calculate_time(140.0, 70.0), 2.0);
    }

    #[test]
    fn test_mercator_round_trip() {
        let helsinki = Point::new(60.18, 24.93, Crs::wgs84());
        let projected = WebMercator.transform(&helsinki, &Crs::web_mercator()).unwrap();
        assert!((projected.lng() - 2_775_195.0).abs() < 5.0);
        let back = WebMercator.transform(&projected, &Crs::wgs84()).unwrap();
        assert!((back.lat() - 60.18).abs() < 1e-9);
        assert!((back.lng() - 24.93).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_crs_pair_is_rejected() {
        let point = Point::new(6_672_000.0, 385_000.0, Crs::epsg(3067));
        let err = WebMercator.transform(&point, &Crs::wgs84()).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::Unsupported {
                from: "EPSG:3067".to_string(),
                to: "EPSG:4326".to_string(),
            }
        );
    }

    #[test]
    fn test_identity_for_equal_crs() {
        let point = Point::new(6_672_000.0, 385_000.0, Crs::epsg(3067));
        assert_eq!(WebMercator.transform(&point, &Crs::epsg(3067)).unwrap(), point);
    }
}
