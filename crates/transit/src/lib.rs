//! # nearstop-transit
//!
//! Nearby stop and route queries with a single-flight TTL result cache.
//!
//! ## Features
//!
//! - **Geodesic math**: Haversine distance, conservative bounding boxes with
//!   antimeridian and pole handling, radius and polygon tests
//! - **Pluggable engines**: anything answering bounding-box queries; an
//!   in-memory R-tree engine and a SQLite engine are included
//! - **Result cache**: one computation per key in flight, TTL expiry,
//!   capacity eviction and an optional background sweep
//! - **Pagination**: offset pages and opaque cursors bound to a snapshot
//!
//! ## Example
//!
//! ```
//! use nearstop_transit::prelude::*;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let stop = StopImpl {
//!     id: StopIdentifier::new("city_hall"),
//!     name: "City Hall".into(),
//!     location: Coordinate::new(40.7127, -74.0059).unwrap(),
//! };
//! let provider = StaticTransitProvider::from_data(vec![stop], vec![]).unwrap();
//! let service = NearbyService::new(Arc::new(provider), ServiceConfig::default()).unwrap();
//!
//! let query = NearbyQuery {
//!     lat: 40.7128,
//!     lon: -74.0060,
//!     radius: 1.0,
//!     unit: DistanceUnit::Miles,
//!     filter: EntityFilter::Stops,
//!     limit: 10,
//! };
//! let page = service.nearby_page(&query, PageRequest::new(1, 10).unwrap()).await.unwrap();
//! assert_eq!(page.total_count, 1);
//! assert_eq!(page.items[0].entity_id.as_str(), "city_hall");
//! # });
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod identifiers;
pub mod models;
pub mod paging;
pub mod planner;
pub mod provider;
pub mod service;
pub mod spatial;

// Re-exports for convenience
pub mod prelude {
    pub use crate::cache::{CacheStats, ResultCache, Snapshot};
    pub use crate::config::{CacheConfig, QueryLimits, ServiceConfig};
    pub use crate::engine::SpatialEngine;
    pub use crate::identifiers::*;
    pub use crate::models::{key::QueryKey, types::*};
    pub use crate::paging::{page, page_by_cursor, CursorPage, Page, PageCursor, PageLinks, PageRequest};
    pub use crate::planner::{QueryPlan, SpatialQueryPlanner};
    pub use crate::provider::{RouteImpl, SqliteSpatialEngine, StaticTransitProvider, StopImpl};
    pub use crate::service::{NearbyQuery, NearbyService};
    pub use crate::spatial::*;
}

pub use prelude::*;
