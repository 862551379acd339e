//! Spatial primitives: coordinates, distances, bounding boxes and R-tree nodes.

pub mod bbox;
pub mod coordinate;
pub mod index;
pub mod queries;

pub use bbox::{bounding_box, BoundingBox};
pub use coordinate::{validate_coordinate, Coordinate, DistanceUnit};
pub use queries::{distance, within_polygon, within_radius};
