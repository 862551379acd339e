//! Bounding boxes for the coarse pre-filter.
//!
//! A box derived from a search circle is a conservative over-approximation:
//! every point within the radius lies inside it. The longitude half-width
//! uses the tangent-meridian bound `asin(sin(d) / cos(lat))`, which is exact
//! on the sphere, plus a tiny margin for floating point error.
//!
//! ## Wrap policy
//!
//! - A box crossing the antimeridian keeps `min_lon > max_lon` (the
//!   RFC 7946 convention). [`BoundingBox::parts`] splits it into the two
//!   non-wrapping boxes that engines actually query.
//! - When the circle reaches a pole, latitude is clamped to ±90 and the box
//!   spans every longitude.

use std::f64::consts::{FRAC_PI_2, PI};

use crate::models::types::Result;
use crate::spatial::coordinate::{Coordinate, DistanceUnit, MEAN_EARTH_RADIUS_M};
use crate::spatial::queries::validate_radius;

/// Extra degrees added on every side of a derived box.
const MARGIN_DEGREES: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// The whole globe.
    pub const WORLD: BoundingBox = BoundingBox {
        min_lat: -90.0,
        min_lon: -180.0,
        max_lat: 90.0,
        max_lon: 180.0,
    };

    /// True when the box crosses the antimeridian.
    pub fn wraps(&self) -> bool {
        self.min_lon > self.max_lon
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        if point.lat() < self.min_lat || point.lat() > self.max_lat {
            return false;
        }
        let lon = point.lon();
        // -180 and 180 are the same meridian
        self.contains_lon(lon) || (lon.abs() == 180.0 && self.contains_lon(-lon))
    }

    fn contains_lon(&self, lon: f64) -> bool {
        if self.wraps() {
            lon >= self.min_lon || lon <= self.max_lon
        } else {
            lon >= self.min_lon && lon <= self.max_lon
        }
    }

    /// Non-wrapping pieces of this box: one, or two when it crosses ±180.
    pub fn parts(&self) -> Vec<BoundingBox> {
        if !self.wraps() {
            return vec![*self];
        }
        vec![
            BoundingBox {
                min_lon: self.min_lon,
                max_lon: 180.0,
                ..*self
            },
            BoundingBox {
                min_lon: -180.0,
                max_lon: self.max_lon,
                ..*self
            },
        ]
    }
}

/// Derive the pre-filter box for a search circle.
///
/// Fails with `InvalidParameter` unless `radius` is positive and finite.
pub fn bounding_box(center: Coordinate, radius: f64, unit: DistanceUnit) -> Result<BoundingBox> {
    validate_radius(radius)?;

    // Angular radius on the unit sphere
    let angular = unit.to_meters(radius) / MEAN_EARTH_RADIUS_M;
    if angular >= PI {
        return Ok(BoundingBox::WORLD);
    }

    let lat = center.lat().to_radians();
    let min_lat = lat - angular;
    let max_lat = lat + angular;

    if min_lat <= -FRAC_PI_2 || max_lat >= FRAC_PI_2 {
        return Ok(BoundingBox {
            min_lat: (min_lat.to_degrees() - MARGIN_DEGREES).max(-90.0),
            min_lon: -180.0,
            max_lat: (max_lat.to_degrees() + MARGIN_DEGREES).min(90.0),
            max_lon: 180.0,
        });
    }

    let half_width = (angular.sin() / lat.cos()).asin().to_degrees() + MARGIN_DEGREES;
    if half_width >= 180.0 {
        return Ok(BoundingBox {
            min_lat: min_lat.to_degrees() - MARGIN_DEGREES,
            min_lon: -180.0,
            max_lat: max_lat.to_degrees() + MARGIN_DEGREES,
            max_lon: 180.0,
        });
    }

    let mut min_lon = center.lon() - half_width;
    let mut max_lon = center.lon() + half_width;
    if min_lon < -180.0 {
        min_lon += 360.0;
    }
    if max_lon > 180.0 {
        max_lon -= 360.0;
    }

    Ok(BoundingBox {
        min_lat: min_lat.to_degrees() - MARGIN_DEGREES,
        min_lon,
        max_lat: max_lat.to_degrees() + MARGIN_DEGREES,
        max_lon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::QueryError;
    use crate::spatial::queries::distance;
    use geo::HaversineDestination;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    /// Sample points on and inside the circle and check the box keeps them all.
    fn assert_circle_contained(center: Coordinate, radius: f64, unit: DistanceUnit) {
        let bbox = bounding_box(center, radius, unit).unwrap();
        let radius_m = unit.to_meters(radius);
        for step in 0..72 {
            let bearing = step as f64 * 5.0;
            for fraction in [0.25, 0.5, 0.9, 0.999_999] {
                let p = center
                    .to_point()
                    .haversine_destination(bearing, radius_m * fraction);
                let lon = match p.x() {
                    x if x > 180.0 => x - 360.0,
                    x if x < -180.0 => x + 360.0,
                    x => x,
                };
                let Ok(candidate) = Coordinate::new(p.y(), lon) else {
                    continue;
                };
                if distance(candidate, center, unit) <= radius {
                    assert!(
                        bbox.contains(candidate),
                        "{candidate} at bearing {bearing} escaped {bbox:?} around {center}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_bounding_box_contains_circle() {
        assert_circle_contained(coord(40.7128, -74.0060), 1.0, DistanceUnit::Miles);
        assert_circle_contained(coord(-33.8688, 151.2093), 25.0, DistanceUnit::Kilometers);
        assert_circle_contained(coord(0.0, 0.0), 500.0, DistanceUnit::Meters);
        assert_circle_contained(coord(64.1466, -21.9426), 50.0, DistanceUnit::Miles);
    }

    #[test]
    fn test_bounding_box_wraps_antimeridian() {
        let center = coord(-17.7134, 179.95);
        let bbox = bounding_box(center, 20.0, DistanceUnit::Kilometers).unwrap();

        assert!(bbox.wraps());
        assert!(bbox.min_lon > 179.0 && bbox.max_lon < -179.0);
        assert!(bbox.contains(coord(-17.7134, -179.99)));
        assert!(bbox.contains(coord(-17.7134, 180.0)));
        assert!(!bbox.contains(coord(-17.7134, 0.0)));

        let parts = bbox.parts();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| !p.wraps()));
        assert_eq!(parts[0].max_lon, 180.0);
        assert_eq!(parts[1].min_lon, -180.0);

        assert_circle_contained(center, 20.0, DistanceUnit::Kilometers);
    }

    #[test]
    fn test_bounding_box_near_pole_spans_all_longitudes() {
        let center = coord(89.95, 30.0);
        let bbox = bounding_box(center, 20.0, DistanceUnit::Kilometers).unwrap();

        assert_eq!(bbox.max_lat, 90.0);
        assert_eq!(bbox.min_lon, -180.0);
        assert_eq!(bbox.max_lon, 180.0);
        assert!(!bbox.wraps());
        assert_eq!(bbox.parts().len(), 1);

        assert_circle_contained(center, 20.0, DistanceUnit::Kilometers);
    }

    #[test]
    fn test_bounding_box_huge_radius_is_world() {
        let bbox = bounding_box(coord(10.0, 10.0), 30_000.0, DistanceUnit::Kilometers).unwrap();
        assert_eq!(bbox, BoundingBox::WORLD);
    }

    #[test]
    fn test_bounding_box_rejects_non_positive_radius() {
        let center = coord(0.0, 0.0);
        assert!(matches!(
            bounding_box(center, 0.0, DistanceUnit::Meters),
            Err(QueryError::InvalidParameter(_))
        ));
        assert!(matches!(
            bounding_box(center, -3.0, DistanceUnit::Miles),
            Err(QueryError::InvalidParameter(_))
        ));
    }
}
