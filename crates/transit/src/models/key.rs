//! Cache keys for nearby queries.
//!
//! A [`QueryKey`] captures every parameter that affects a result set. The
//! center is rounded to [`COORDINATE_DECIMALS`] places and the radius to
//! [`RADIUS_DECIMALS`] places, so two requests that differ only below that
//! precision share one cache entry.
//!
//! The text form is `name=value` pairs joined by `;` in sorted name order.
//! Parsing accepts the pairs in any order.

use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;

use twox_hash::XxHash64;

use crate::models::types::{EntityFilter, QueryError, Result};
use crate::spatial::coordinate::{Coordinate, DistanceUnit};

pub const COORDINATE_DECIMALS: u32 = 5;
pub const RADIUS_DECIMALS: u32 = 6;

const COORDINATE_SCALE: f64 = 100_000.0;
const RADIUS_SCALE: f64 = 1_000_000.0;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    lat_e5: i32,
    lon_e5: i32,
    radius_e6: u64,
    unit: DistanceUnit,
    filter: EntityFilter,
    limit: usize,
}

impl QueryKey {
    /// Build a key. Inputs are assumed validated by the planner; the radius
    /// is only checked for being representable.
    pub fn new(
        center: Coordinate,
        radius: f64,
        unit: DistanceUnit,
        filter: EntityFilter,
        limit: usize,
    ) -> Result<Self> {
        let radius_e6 = (radius * RADIUS_SCALE).round();
        if !(radius_e6 >= 1.0 && radius_e6 < u64::MAX as f64) {
            return Err(QueryError::InvalidParameter(format!(
                "radius {radius} is not representable at {RADIUS_DECIMALS} decimal places"
            )));
        }

        Ok(Self {
            lat_e5: (center.lat() * COORDINATE_SCALE).round() as i32,
            lon_e5: (center.lon() * COORDINATE_SCALE).round() as i32,
            radius_e6: radius_e6 as u64,
            unit,
            filter,
            limit,
        })
    }

    /// The rounded center the result set is computed for.
    pub fn center(&self) -> Coordinate {
        Coordinate::clamped(
            self.lat_e5 as f64 / COORDINATE_SCALE,
            self.lon_e5 as f64 / COORDINATE_SCALE,
        )
    }

    pub fn radius(&self) -> f64 {
        self.radius_e6 as f64 / RADIUS_SCALE
    }

    pub fn unit(&self) -> DistanceUnit {
        self.unit
    }

    pub fn filter(&self) -> EntityFilter {
        self.filter
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Stable 64-bit digest of the canonical form, used to tag cursors.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(self.to_string().as_bytes());
        hasher.finish()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let center = self.center();
        write!(
            f,
            "entity={};lat={:.5};limit={};lon={:.5};radius={:.6};unit={}",
            self.filter,
            center.lat(),
            self.limit,
            center.lon(),
            self.radius(),
            self.unit,
        )
    }
}

impl FromStr for QueryKey {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let mut entity = None;
        let mut lat = None;
        let mut lon = None;
        let mut radius = None;
        let mut unit = None;
        let mut limit = None;

        for pair in s.split(';').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                QueryError::InvalidParameter(format!("malformed key component: {pair}"))
            })?;
            let parsed_f64 = || {
                value.parse::<f64>().map_err(|_| {
                    QueryError::InvalidParameter(format!("{name} is not a number: {value}"))
                })
            };
            match name {
                "entity" => entity = Some(value.parse::<EntityFilter>()?),
                "lat" => lat = Some(parsed_f64()?),
                "lon" => lon = Some(parsed_f64()?),
                "radius" => radius = Some(parsed_f64()?),
                "unit" => unit = Some(parse_unit(value)?),
                "limit" => {
                    limit = Some(value.parse::<usize>().map_err(|_| {
                        QueryError::InvalidParameter(format!("limit is not an integer: {value}"))
                    })?)
                }
                other => {
                    return Err(QueryError::InvalidParameter(format!(
                        "unknown key component: {other}"
                    )))
                }
            }
        }

        let missing = |name: &str| QueryError::InvalidParameter(format!("key is missing {name}"));
        let center = Coordinate::new(lat.ok_or_else(|| missing("lat"))?, lon.ok_or_else(|| missing("lon"))?)?;
        Self::new(
            center,
            radius.ok_or_else(|| missing("radius"))?,
            unit.ok_or_else(|| missing("unit"))?,
            entity.ok_or_else(|| missing("entity"))?,
            limit.ok_or_else(|| missing("limit"))?,
        )
    }
}

fn parse_unit(value: &str) -> Result<DistanceUnit> {
    match value {
        "meters" => Ok(DistanceUnit::Meters),
        "kilometers" => Ok(DistanceUnit::Kilometers),
        "miles" => Ok(DistanceUnit::Miles),
        other => Err(QueryError::InvalidParameter(format!("unknown unit: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::RouteType;
    use std::collections::HashSet;

    fn nyc_key(lat: f64, lon: f64) -> QueryKey {
        QueryKey::new(
            Coordinate::new(lat, lon).unwrap(),
            1.0,
            DistanceUnit::Miles,
            EntityFilter::Stops,
            50,
        )
        .unwrap()
    }

    #[test]
    fn test_center_is_rounded_to_fixed_precision() {
        let a = nyc_key(40.712_801, -74.006_004);
        let b = nyc_key(40.712_799, -74.005_996);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.center(), Coordinate::new(40.7128, -74.006).unwrap());

        assert_ne!(a, nyc_key(40.7129, -74.0060));
    }

    #[test]
    fn test_every_parameter_distinguishes_keys() {
        let center = Coordinate::new(40.7128, -74.0060).unwrap();
        let base = QueryKey::new(center, 1.0, DistanceUnit::Miles, EntityFilter::Stops, 50).unwrap();
        let variants = [
            QueryKey::new(center, 2.0, DistanceUnit::Miles, EntityFilter::Stops, 50).unwrap(),
            QueryKey::new(center, 1.0, DistanceUnit::Kilometers, EntityFilter::Stops, 50).unwrap(),
            QueryKey::new(center, 1.0, DistanceUnit::Miles, EntityFilter::all_routes(), 50).unwrap(),
            QueryKey::new(
                center,
                1.0,
                DistanceUnit::Miles,
                EntityFilter::Routes {
                    route_type: Some(RouteType::Bus),
                },
                50,
            )
            .unwrap(),
            QueryKey::new(center, 1.0, DistanceUnit::Miles, EntityFilter::Stops, 51).unwrap(),
        ];

        let mut seen = HashSet::new();
        seen.insert(base.clone());
        for variant in variants {
            assert_ne!(variant, base);
            assert!(seen.insert(variant));
        }
    }

    #[test]
    fn test_text_form_is_order_independent() {
        let key = nyc_key(40.7128, -74.0060);
        let canonical = key.to_string();
        assert_eq!(
            canonical,
            "entity=stops;lat=40.71280;limit=50;lon=-74.00600;radius=1.000000;unit=miles"
        );

        let shuffled = "unit=miles;radius=1;lon=-74.006;limit=50;entity=stops;lat=40.7128";
        let parsed: QueryKey = shuffled.parse().unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.fingerprint(), key.fingerprint());
    }

    #[test]
    fn test_text_form_rejects_bad_input() {
        assert!("lat=1;lon=2".parse::<QueryKey>().is_err());
        assert!("entity=stops;lat=91;limit=1;lon=0;radius=1;unit=miles"
            .parse::<QueryKey>()
            .is_err());
        assert!("entity=stops;lat=1;limit=1;lon=0;radius=1;unit=parsecs"
            .parse::<QueryKey>()
            .is_err());
        assert!("entity=stops;lat=1;limit=1;lon=0;radius=1;unit=miles;colour=red"
            .parse::<QueryKey>()
            .is_err());
    }

    #[test]
    fn test_sub_precision_radius_is_rejected() {
        let center = Coordinate::new(0.0, 0.0).unwrap();
        assert!(QueryKey::new(center, 1e-9, DistanceUnit::Meters, EntityFilter::Stops, 1).is_err());
    }
}
