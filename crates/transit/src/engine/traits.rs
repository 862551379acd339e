//! Pluggable spatial engine trait.
//!
//! The query core never owns the data store. Anything that can answer a
//! bounding-box query implements [`SpatialEngine`]; failures to reach or read
//! the store are reported as [`QueryError::UpstreamUnavailable`].
//!
//! [`QueryError::UpstreamUnavailable`]: crate::models::types::QueryError::UpstreamUnavailable

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::models::types::{Candidate, EntityFilter, Result};
use crate::spatial::bbox::BoundingBox;

/// Answer coarse bounding-box queries.
///
/// Implementations must handle wrapping boxes, typically by querying each of
/// [`BoundingBox::parts`]. Returned candidates may include points outside the
/// search circle; the planner re-filters them.
pub trait SpatialEngine: Send + Sync {
    fn query_bounding_box<'a>(
        &'a self,
        bbox: &'a BoundingBox,
        filter: &'a EntityFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + 'a>>;
}

impl<T: SpatialEngine + ?Sized> SpatialEngine for Arc<T> {
    fn query_bounding_box<'a>(
        &'a self,
        bbox: &'a BoundingBox,
        filter: &'a EntityFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + 'a>> {
        (**self).query_bounding_box(bbox, filter)
    }
}
