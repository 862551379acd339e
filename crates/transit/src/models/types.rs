//! Core data types and enums for nearby queries.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::identifiers::*;
use crate::spatial::coordinate::Coordinate;

// ============================================================================
// Enums
// ============================================================================

/// GTFS route types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum RouteType {
    Tram = 0,
    Subway = 1,
    Rail = 2,
    Bus = 3,
    Ferry = 4,
    CableTram = 5,
    AerialLift = 6,
    Funicular = 7,
}

impl RouteType {
    pub fn from_gtfs(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Tram),
            1 => Some(Self::Subway),
            2 => Some(Self::Rail),
            3 => Some(Self::Bus),
            4 => Some(Self::Ferry),
            5 => Some(Self::CableTram),
            6 => Some(Self::AerialLift),
            7 => Some(Self::Funicular),
            _ => None,
        }
    }

    pub fn to_gtfs(self) -> u16 {
        self as u16
    }
}

/// Which kind of entity a result set is made of
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EntityKind {
    Stop,
    Route,
}

/// Entity selection passed through to the spatial engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityFilter {
    Stops,
    Routes { route_type: Option<RouteType> },
}

impl EntityFilter {
    pub fn all_routes() -> Self {
        Self::Routes { route_type: None }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Stops => EntityKind::Stop,
            Self::Routes { .. } => EntityKind::Route,
        }
    }
}

impl fmt::Display for EntityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stops => f.write_str("stops"),
            Self::Routes { route_type: None } => f.write_str("routes"),
            Self::Routes {
                route_type: Some(route_type),
            } => write!(f, "routes:{}", route_type.to_gtfs()),
        }
    }
}

impl std::str::FromStr for EntityFilter {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s == "stops" => Ok(Self::Stops),
            None if s == "routes" => Ok(Self::all_routes()),
            Some(("routes", code)) => code
                .parse::<u16>()
                .ok()
                .and_then(RouteType::from_gtfs)
                .map(|route_type| Self::Routes {
                    route_type: Some(route_type),
                })
                .ok_or_else(|| {
                    QueryError::InvalidParameter(format!("unknown route type: {code}"))
                }),
            _ => Err(QueryError::InvalidParameter(format!(
                "unknown entity filter: {s}"
            ))),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Entity data carried alongside a result; not interpreted by cache or paging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Stop {
        name: Arc<str>,
    },
    Route {
        short_name: Arc<str>,
        long_name: Arc<str>,
        route_type: RouteType,
    },
}

/// One row returned by a spatial engine for a bounding-box query.
///
/// Routes produce one candidate per shape vertex inside the box.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub entity_id: EntityIdentifier,
    pub coordinate: Coordinate,
    pub payload: Payload,
}

/// A ranked result: payload plus the distance it was ordered by.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultItem {
    pub entity_id: EntityIdentifier,
    pub coordinate: Coordinate,
    /// Distance from the query center, in the query's unit
    pub distance: f64,
    pub payload: Payload,
}

impl ResultItem {
    /// Ascending distance, ties broken by entity id.
    pub fn rank(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.entity_id.cmp(&other.entity_id))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Clone, Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid coordinate: latitude {lat} must be in [-90, 90] and longitude {lon} in [-180, 180]")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Spatial engine unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Cursor is stale: the result set was refreshed, restart pagination")]
    StaleCursor,

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Computation failed: {0}")]
    ComputationFailed(String),

    #[error("Timed out waiting for an in-flight computation")]
    Timeout,
}

impl QueryError {
    /// Whether repeating the request (or restarting pagination) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::StaleCursor | Self::ComputationFailed(_) | Self::Timeout
        )
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
