pub mod index;

use std::f64::consts::FRAC_PI_2;

use crate::error::AppError;
use crate::models::location::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * central_angle
}

pub fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !point.lat.is_finite() || !(-90.0..=90.0).contains(&point.lat) {
        return Err(AppError::InvalidArgument(format!(
            "latitude out of range: {}",
            point.lat
        )));
    }
    if !point.lng.is_finite() || !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::InvalidArgument(format!(
            "longitude out of range: {}",
            point.lng
        )));
    }
    Ok(())
}

pub fn validate_radius(radius_m: f64) -> Result<(), AppError> {
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(AppError::InvalidArgument(format!(
            "radius must be a positive number of meters, got {radius_m}"
        )));
    }
    Ok(())
}

/// Equirectangular pre-filter around a centre point. Cheap to test and never
/// excludes a point that is within the radius.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    center: GeoPoint,
    lat_delta: f64,
    lng_delta: Option<f64>,
}

impl BoundingBox {
    pub fn around(center: &GeoPoint, radius_m: f64) -> Self {
        let angular = radius_m / EARTH_RADIUS_M;
        let lat_delta = angular.to_degrees();
        let cos_lat = center.lat.to_radians().cos();

        // Widest longitude reached on the circle; once it covers a pole every
        // longitude is in range.
        let ratio = angular.sin() / cos_lat;
        let lng_delta = if angular < FRAC_PI_2 && cos_lat > 1e-9 && ratio < 1.0 {
            Some(ratio.asin().to_degrees())
        } else {
            None
        };

        Self {
            center: *center,
            lat_delta,
            lng_delta,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        if (point.lat - self.center.lat).abs() > self.lat_delta {
            return false;
        }

        match self.lng_delta {
            Some(delta) => {
                let mut diff = (point.lng - self.center.lng).abs() % 360.0;
                if diff > 180.0 {
                    diff = 360.0 - diff;
                }
                diff <= delta
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
        let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (b.lng - a.lng).to_radians();
        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        EARTH_RADIUS_M * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint::new(12.9716, 77.5946);
        assert!(haversine_m(&p, &p) < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let distance = haversine_m(&london, &paris);
        assert!((distance - 343_000.0).abs() < 5_000.0);
    }

    #[test]
    fn agrees_with_atan2_formulation() {
        let pairs = [
            (GeoPoint::new(12.9716, 77.5946), GeoPoint::new(12.9816, 77.5846)),
            (GeoPoint::new(-33.8688, 151.2093), GeoPoint::new(51.5074, -0.1278)),
            (GeoPoint::new(0.0, 179.9), GeoPoint::new(0.0, -179.9)),
        ];
        for (a, b) in pairs {
            let ours = haversine_m(&a, &b);
            let reference = reference_distance(&a, &b);
            assert!(((ours - reference) / reference).abs() < 1e-6);
        }
    }

    #[test]
    fn bounding_box_never_drops_points_inside_radius() {
        let center = GeoPoint::new(12.9716, 77.5946);
        let bbox = BoundingBox::around(&center, 5_000.0);
        for step in 0..36 {
            let bearing = (step as f64 * 10.0).to_radians();
            let point = GeoPoint::new(
                center.lat + 0.04 * bearing.cos(),
                center.lng + 0.04 * bearing.sin(),
            );
            if haversine_m(&center, &point) <= 5_000.0 {
                assert!(bbox.contains(&point));
            }
        }
        assert!(!bbox.contains(&GeoPoint::new(13.5, 77.5946)));
    }

    #[test]
    fn bounding_box_keeps_the_widest_point_at_high_latitude() {
        let center = GeoPoint::new(80.0, 10.0);
        let bbox = BoundingBox::around(&center, 100_000.0);

        // Furthest east the circle reaches lies poleward of the centre.
        let edge = GeoPoint::new(80.084, 15.179);
        assert!(haversine_m(&center, &edge) <= 100_000.0);
        assert!(bbox.contains(&edge));

        let angular = 99_900.0 / EARTH_RADIUS_M;
        let lat1 = center.lat.to_radians();
        for step in 0..72 {
            let bearing = (step as f64 * 5.0).to_radians();
            let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
            let dlng = (bearing.sin() * angular.sin() * lat1.cos())
                .atan2(angular.cos() - lat1.sin() * lat2.sin());
            let point = GeoPoint::new(lat2.to_degrees(), center.lng + dlng.to_degrees());
            assert!(bbox.contains(&point), "bearing {step} dropped");
        }
    }

    #[test]
    fn bounding_box_wraps_the_antimeridian() {
        let bbox = BoundingBox::around(&GeoPoint::new(0.0, 179.99), 5_000.0);
        assert!(bbox.contains(&GeoPoint::new(0.0, -179.99)));
    }

    #[test]
    fn rejects_out_of_range_input() {
        assert!(validate_point(&GeoPoint::new(91.0, 0.0)).is_err());
        assert!(validate_point(&GeoPoint::new(0.0, f64::NAN)).is_err());
        assert!(validate_radius(0.0).is_err());
        assert!(validate_radius(1_500.0).is_ok());
    }
}
