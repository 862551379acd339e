//! R-tree nodes for spatial indexing.
//!
//! Wraps transit entities with geometric data for bounding-box queries.
//!
//! ## Two-Stage Filtering
//!
//! Spatial queries use a two-stage filtering approach:
//! 1. **R-tree filter**: envelope intersection against the query's bounding
//!    box parts, in plain (lon, lat) degrees
//! 2. **Haversine filter**: the planner applies the exact geodesic distance
//!    to the candidates and discards the box's false positives

use std::sync::Arc;

use geo::{Coord, Line};
use rstar::{Envelope, RTreeObject, AABB};

use crate::provider::static_provider::{RouteImpl, StopImpl};
use crate::spatial::bbox::BoundingBox;

/// Envelope of a non-wrapping box part.
pub fn envelope(part: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([part.min_lon, part.min_lat], [part.max_lon, part.max_lat])
}

// ============================================================================
// Stop Spatial Node
// ============================================================================

#[derive(Clone)]
pub struct StopNode {
    pub stop: Arc<StopImpl>,
    point: [f64; 2],
}

impl StopNode {
    pub fn new(stop: Arc<StopImpl>) -> Self {
        let location = stop.location;
        Self {
            stop,
            point: [location.lon(), location.lat()],
        }
    }
}

impl RTreeObject for StopNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

// ============================================================================
// Route Segment Spatial Node
// ============================================================================

#[derive(Clone)]
pub struct RouteSegmentNode {
    pub route: Arc<RouteImpl>,
    pub segment: Line,
    aabb: AABB<[f64; 2]>,
}

impl RouteSegmentNode {
    pub fn new(segment: Line, route: Arc<RouteImpl>) -> Self {
        let start = [segment.start.x, segment.start.y];
        let end = [segment.end.x, segment.end.y];

        let aabb = AABB::from_corners(start, end);

        Self {
            route,
            segment,
            aabb,
        }
    }

    /// Segment endpoints that fall inside `envelope`.
    pub fn vertices_within<'a>(
        &'a self,
        envelope: &'a AABB<[f64; 2]>,
    ) -> impl Iterator<Item = Coord> + 'a {
        [self.segment.start, self.segment.end]
            .into_iter()
            .filter(move |c| envelope.contains_point(&[c.x, c.y]))
    }
}

impl RTreeObject for RouteSegmentNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}
