//! Spatial engine implementations.
pub mod sqlite_provider;
pub mod static_provider;

pub use sqlite_provider::SqliteSpatialEngine;
pub use static_provider::{RouteImpl, StaticTransitProvider, StopImpl};
