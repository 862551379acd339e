//! Nearby query planning and execution.
//!
//! A plan pairs the [`QueryKey`] with the pre-filter box for the key's
//! rounded center. Execution asks the engine for the box, drops candidates
//! outside the exact radius, keeps the nearest candidate per entity, then
//! orders and truncates.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::QueryLimits;
use crate::engine::traits::SpatialEngine;
use crate::identifiers::EntityIdentifier;
use crate::models::key::QueryKey;
use crate::models::types::{EntityFilter, QueryError, Result, ResultItem};
use crate::spatial::bbox::{bounding_box, BoundingBox};
use crate::spatial::coordinate::{Coordinate, DistanceUnit};
use crate::spatial::queries::{distance, validate_radius};

#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    key: QueryKey,
    bbox: BoundingBox,
}

impl QueryPlan {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }
}

/// Builds and runs nearby queries against an injected engine.
///
/// Performs no retries; engine failures are returned as they are.
#[derive(Clone)]
pub struct SpatialQueryPlanner {
    engine: Arc<dyn SpatialEngine>,
    limits: QueryLimits,
}

impl SpatialQueryPlanner {
    pub fn new(engine: Arc<dyn SpatialEngine>, limits: QueryLimits) -> Self {
        Self { engine, limits }
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Validate parameters and derive the key and pre-filter box. Pure.
    pub fn plan(
        &self,
        center: Coordinate,
        radius: f64,
        unit: DistanceUnit,
        filter: EntityFilter,
        limit: usize,
    ) -> Result<QueryPlan> {
        validate_radius(radius)?;
        let radius_meters = unit.to_meters(radius);
        if radius_meters > self.limits.max_radius_meters {
            return Err(QueryError::InvalidParameter(format!(
                "radius {radius} {unit} exceeds the maximum of {} meters",
                self.limits.max_radius_meters
            )));
        }
        if limit == 0 || limit > self.limits.max_limit {
            return Err(QueryError::InvalidParameter(format!(
                "limit must be between 1 and {}, got {limit}",
                self.limits.max_limit
            )));
        }

        let key = QueryKey::new(center, radius, unit, filter, limit)?;
        let bbox = bounding_box(key.center(), key.radius(), unit)?;
        Ok(QueryPlan { key, bbox })
    }

    /// Run a plan: engine box query, exact radius filter, nearest per
    /// entity, ascending by distance then id, truncated to the limit.
    pub async fn execute(&self, plan: &QueryPlan) -> Result<Vec<ResultItem>> {
        let key = &plan.key;
        let filter = key.filter();
        let candidates = self.engine.query_bounding_box(&plan.bbox, &filter).await?;
        let candidate_count = candidates.len();

        let center = key.center();
        let radius = key.radius();
        let unit = key.unit();

        let mut nearest: HashMap<EntityIdentifier, ResultItem> = HashMap::new();
        for candidate in candidates {
            let d = distance(candidate.coordinate, center, unit);
            if d > radius {
                continue;
            }
            match nearest.get(&candidate.entity_id) {
                Some(existing) if existing.distance <= d => {}
                _ => {
                    nearest.insert(
                        candidate.entity_id.clone(),
                        ResultItem {
                            entity_id: candidate.entity_id,
                            coordinate: candidate.coordinate,
                            distance: d,
                            payload: candidate.payload,
                        },
                    );
                }
            }
        }
        let matched = nearest.len();

        let mut items: Vec<ResultItem> = nearest.into_values().collect();
        items.sort_by(ResultItem::rank);
        items.truncate(key.limit());

        debug!(
            %key,
            candidates = candidate_count,
            matched,
            returned = items.len(),
            "executed nearby query"
        );
        Ok(items)
    }
}
