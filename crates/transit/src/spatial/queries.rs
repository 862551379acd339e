//! Spatial query utilities for distance calculations.
//!
//! Uses Haversine formula for accurate distances on Earth's surface.

use geo::{Contains, HaversineDistance, Polygon};

use crate::models::types::{QueryError, Result};
use crate::spatial::coordinate::{Coordinate, DistanceUnit};

/// Great-circle distance between two coordinates in `unit`.
///
/// Symmetric, and zero exactly when the coordinates denote the same point.
pub fn distance(a: Coordinate, b: Coordinate, unit: DistanceUnit) -> f64 {
    if a == b {
        return 0.0;
    }
    let d = unit.from_meters(a.to_point().haversine_distance(&b.to_point()));
    // Separations below f64 resolution must not read as the same point
    if d == 0.0 {
        f64::MIN_POSITIVE
    } else {
        d
    }
}

/// Exact radius test, used after the bounding-box pre-filter.
pub fn within_radius(
    point: Coordinate,
    center: Coordinate,
    radius: f64,
    unit: DistanceUnit,
) -> Result<bool> {
    validate_radius(radius)?;
    Ok(distance(point, center, unit) <= radius)
}

/// Point-in-polygon test on a polygon in (lon, lat) order.
///
/// Points on the boundary are not contained.
pub fn within_polygon(point: Coordinate, polygon: &Polygon) -> bool {
    polygon.contains(&point.to_point())
}

pub(crate) fn validate_radius(radius: f64) -> Result<()> {
    if radius > 0.0 && radius.is_finite() {
        Ok(())
    } else {
        Err(QueryError::InvalidParameter(format!(
            "radius must be a positive finite number, got {radius}"
        )))
    }
}
