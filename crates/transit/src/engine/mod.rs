//! Spatial engine boundary.

pub mod traits;

pub use traits::SpatialEngine;
