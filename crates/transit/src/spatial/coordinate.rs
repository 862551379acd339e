//! Validated coordinates and distance units.

use std::fmt;

use geo::Point;

use crate::models::types::{QueryError, Result};

/// Mean Earth radius in meters (IUGG), the same sphere `geo` uses for Haversine.
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

pub const METERS_PER_KILOMETER: f64 = 1_000.0;
pub const METERS_PER_MILE: f64 = 1_609.344;

// ============================================================================
// Distance Units
// ============================================================================

/// Unit attached to every distance-producing or distance-accepting call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DistanceUnit {
    Meters,
    Kilometers,
    Miles,
}

impl DistanceUnit {
    pub fn meters_per_unit(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Kilometers => METERS_PER_KILOMETER,
            Self::Miles => METERS_PER_MILE,
        }
    }

    pub fn to_meters(self, value: f64) -> f64 {
        value * self.meters_per_unit()
    }

    pub fn from_meters(self, meters: f64) -> f64 {
        meters / self.meters_per_unit()
    }

    /// Convert `value` expressed in `from` into this unit.
    pub fn convert(self, value: f64, from: DistanceUnit) -> f64 {
        if self == from {
            return value;
        }
        self.from_meters(from.to_meters(value))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meters => "meters",
            Self::Kilometers => "kilometers",
            Self::Miles => "miles",
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Coordinate
// ============================================================================

/// A latitude/longitude pair in decimal degrees that is known to be in range.
///
/// Equality is physical: every longitude at a pole is the same point, and
/// longitudes -180 and 180 are the same meridian.
#[derive(Clone, Copy, Debug)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

impl Coordinate {
    /// Validate and build a coordinate. Out-of-range or non-finite values are
    /// rejected, never clamped.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(QueryError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Clamp into range; only for values derived from an already valid coordinate.
    pub(crate) fn clamped(lat: f64, lon: f64) -> Self {
        Self {
            lat: lat.clamp(-90.0, 90.0),
            lon: lon.clamp(-180.0, 180.0),
        }
    }

    /// Build from a `geo::Point` (x = longitude, y = latitude).
    pub fn from_point(point: Point) -> Result<Self> {
        Self::new(point.y(), point.x())
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn to_point(self) -> Point {
        Point::new(self.lon, self.lat)
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        if self.lat != other.lat {
            return false;
        }
        self.lat.abs() == 90.0
            || self.lon == other.lon
            || (self.lon.abs() == 180.0 && other.lon.abs() == 180.0)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// Validate raw latitude/longitude input.
pub fn validate_coordinate(lat: f64, lon: f64) -> Result<Coordinate> {
    Coordinate::new(lat, lon)
}
