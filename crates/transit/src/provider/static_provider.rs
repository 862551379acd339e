//! In-memory spatial engine backed by R-trees.
//!
//! Stores stops and route shapes in memory with spatial indices for fast
//! bounding-box queries.

use std::future::{ready, Future};
use std::pin::Pin;
use std::sync::Arc;

use geo::{LineString, Point};
use rstar::RTree;

use crate::engine::traits::SpatialEngine;
use crate::identifiers::*;
use crate::models::types::*;
use crate::spatial::bbox::BoundingBox;
use crate::spatial::coordinate::Coordinate;
use crate::spatial::index::{envelope, RouteSegmentNode, StopNode};

// ============================================================================
// Entities
// ============================================================================

#[derive(Clone, Debug)]
pub struct StopImpl {
    pub id: StopIdentifier,
    pub name: Arc<str>,
    pub location: Coordinate,
}

#[derive(Clone, Debug)]
pub struct RouteImpl {
    pub id: RouteIdentifier,
    pub route_type: RouteType,
    pub short_name: Arc<str>,
    pub long_name: Arc<str>,
    /// Shape in (lon, lat) order; routes without a shape are never found
    pub geometry: Option<LineString>,
}

impl StopImpl {
    fn candidate(&self) -> Candidate {
        Candidate {
            entity_id: self.id.clone().into_entity(),
            coordinate: self.location,
            payload: Payload::Stop {
                name: self.name.clone(),
            },
        }
    }
}

impl RouteImpl {
    fn payload(&self) -> Payload {
        Payload::Route {
            short_name: self.short_name.clone(),
            long_name: self.long_name.clone(),
            route_type: self.route_type,
        }
    }
}

// ============================================================================
// Static Provider
// ============================================================================

/// In-memory transit provider with spatial indexing
///
/// This type is cheap to clone since all data is stored in `Arc`s.
#[derive(Clone)]
pub struct StaticTransitProvider {
    stop_tree: Arc<RTree<StopNode>>,
    route_tree: Arc<RTree<RouteSegmentNode>>,
}

impl StaticTransitProvider {
    /// Create a new empty provider
    pub fn new() -> Self {
        Self {
            stop_tree: Arc::new(RTree::new()),
            route_tree: Arc::new(RTree::new()),
        }
    }

    /// Build provider from raw data.
    ///
    /// Fails with `InvalidCoordinate` if a route shape has a vertex out of range.
    pub fn from_data(stops: Vec<StopImpl>, routes: Vec<RouteImpl>) -> Result<Self> {
        for route in &routes {
            if let Some(geom) = &route.geometry {
                for coord in geom.coords() {
                    Coordinate::from_point(Point::from(*coord))?;
                }
            }
        }

        let stops: Vec<Arc<StopImpl>> = stops.into_iter().map(Arc::new).collect();
        let routes: Vec<Arc<RouteImpl>> = routes.into_iter().map(Arc::new).collect();

        let stop_tree = RTree::bulk_load(stops.into_iter().map(StopNode::new).collect());

        let mut route_segments = Vec::new();
        for route in &routes {
            if let Some(geom) = &route.geometry {
                for segment in geom.lines() {
                    route_segments.push(RouteSegmentNode::new(segment, route.clone()));
                }
            }
        }
        let route_tree = RTree::bulk_load(route_segments);

        Ok(Self {
            stop_tree: Arc::new(stop_tree),
            route_tree: Arc::new(route_tree),
        })
    }

    /// Synchronous form of the bounding-box query.
    pub fn candidates_in(&self, bbox: &BoundingBox, filter: &EntityFilter) -> Vec<Candidate> {
        let mut out = Vec::new();
        for part in bbox.parts() {
            let env = envelope(&part);
            match filter {
                EntityFilter::Stops => {
                    out.extend(
                        self.stop_tree
                            .locate_in_envelope(&env)
                            .map(|node| node.stop.candidate()),
                    );
                }
                EntityFilter::Routes { route_type } => {
                    for node in self.route_tree.locate_in_envelope_intersecting(&env) {
                        if matches!(route_type, Some(t) if *t != node.route.route_type) {
                            continue;
                        }
                        for vertex in node.vertices_within(&env) {
                            // Shapes were validated in from_data
                            let Ok(coordinate) = Coordinate::from_point(Point::from(vertex)) else {
                                continue;
                            };
                            out.push(Candidate {
                                entity_id: node.route.id.clone().into_entity(),
                                coordinate,
                                payload: node.route.payload(),
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

impl Default for StaticTransitProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialEngine for StaticTransitProvider {
    fn query_bounding_box<'a>(
        &'a self,
        bbox: &'a BoundingBox,
        filter: &'a EntityFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + 'a>> {
        Box::pin(ready(Ok(self.candidates_in(bbox, filter))))
    }
}
