//! Request path: validate, plan, cache, paginate.

use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{CacheStats, ResultCache, Snapshot};
use crate::config::ServiceConfig;
use crate::engine::traits::SpatialEngine;
use crate::models::types::{EntityFilter, EntityKind, QueryError, Result, ResultItem};
use crate::paging::{page, page_by_cursor, CursorPage, Page, PageCursor, PageRequest};
use crate::planner::{QueryPlan, SpatialQueryPlanner};
use crate::spatial::coordinate::{validate_coordinate, DistanceUnit};

/// Raw parameters of a nearby request, as received from a caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lon: f64,
    pub radius: f64,
    pub unit: DistanceUnit,
    pub filter: EntityFilter,
    pub limit: usize,
}

/// Background expiry sweep, started once and aborted with the last
/// service clone.
#[derive(Default)]
struct Sweeper {
    handle: OnceLock<Option<JoinHandle<()>>>,
}

impl Sweeper {
    fn start(&self, cache: &ResultCache) {
        self.handle.get_or_init(|| cache.spawn_sweeper());
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(Some(handle)) = self.handle.get() {
            handle.abort();
        }
    }
}

/// Nearby lookups served through the result cache.
///
/// Invalid input is rejected before the cache or the engine sees it.
#[derive(Clone)]
pub struct NearbyService {
    planner: SpatialQueryPlanner,
    cache: ResultCache,
    sweeper: Arc<Sweeper>,
}

impl NearbyService {
    /// The expiry sweep configured by `sweep_interval_seconds` starts with
    /// the first query, on that query's runtime.
    pub fn new(engine: Arc<dyn SpatialEngine>, config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            planner: SpatialQueryPlanner::new(engine, config.limits),
            cache: ResultCache::new(config.cache)?,
            sweeper: Arc::default(),
        })
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn planner(&self) -> &SpatialQueryPlanner {
        &self.planner
    }

    fn plan(&self, query: &NearbyQuery) -> Result<QueryPlan> {
        let center = validate_coordinate(query.lat, query.lon)?;
        self.planner
            .plan(center, query.radius, query.unit, query.filter, query.limit)
    }

    async fn snapshot(&self, plan: QueryPlan) -> Result<Arc<Snapshot>> {
        self.sweeper.start(&self.cache);
        let key = plan.key().clone();
        let planner = self.planner.clone();
        self.cache
            .get_default(key, move || async move { planner.execute(&plan).await })
            .await
    }

    /// The full ordered result set for `query`.
    pub async fn nearby(&self, query: &NearbyQuery) -> Result<Arc<Snapshot>> {
        let plan = self.plan(query)?;
        self.snapshot(plan).await
    }

    pub async fn nearby_page(&self, query: &NearbyQuery, request: PageRequest) -> Result<Page<ResultItem>> {
        request.validate(self.planner.limits())?;
        let plan = self.plan(query)?;
        let snapshot = self.snapshot(plan).await?;
        page(snapshot.items(), request.page(), request.per_page())
    }

    /// Cursor mode. `cursor` is a token from a previous page's
    /// `next_cursor`, or `None` for the first page.
    pub async fn nearby_by_cursor(
        &self,
        query: &NearbyQuery,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<CursorPage<ResultItem>> {
        let max_page_size = self.planner.limits().max_page_size;
        if limit == 0 || limit > max_page_size {
            return Err(QueryError::InvalidParameter(format!(
                "page limit must be between 1 and {max_page_size}, got {limit}"
            )));
        }
        let cursor = cursor.map(PageCursor::decode).transpose()?;
        let plan = self.plan(query)?;
        let snapshot = self.snapshot(plan).await?;
        page_by_cursor(&snapshot, cursor.as_ref(), limit)
    }

    /// Drop every cached result set built from `kind` entities, e.g. after
    /// stop data was reloaded.
    pub fn invalidate_entity_kind(&self, kind: EntityKind) -> usize {
        let removed = self
            .cache
            .invalidate_matching(|key| key.filter().kind() == kind);
        debug!(?kind, removed, "invalidated result sets");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, QueryLimits};
    use crate::identifiers::StopIdentifier;
    use crate::models::key::QueryKey;
    use crate::models::types::Candidate;
    use crate::provider::static_provider::{StaticTransitProvider, StopImpl};
    use crate::spatial::bbox::BoundingBox;
    use crate::spatial::coordinate::Coordinate;
    use std::future::{ready, Future};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingEngine {
        inner: StaticTransitProvider,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl SpatialEngine for CountingEngine {
        fn query_bounding_box<'a>(
            &'a self,
            bbox: &'a BoundingBox,
            filter: &'a EntityFilter,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.inner.query_bounding_box(bbox, filter).await
            })
        }
    }

    struct OfflineEngine;

    impl SpatialEngine for OfflineEngine {
        fn query_bounding_box<'a>(
            &'a self,
            _bbox: &'a BoundingBox,
            _filter: &'a EntityFilter,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Candidate>>> + Send + 'a>> {
            Box::pin(ready(Err(QueryError::UpstreamUnavailable(
                "connection refused".into(),
            ))))
        }
    }

    /// `n` stops due north of lower Manhattan, 55 m apart.
    fn engine(n: usize, delay: Duration) -> Arc<CountingEngine> {
        let stops = (0..n)
            .map(|i| StopImpl {
                id: StopIdentifier::new(format!("stop_{i:02}")),
                name: format!("Stop {i}").into(),
                location: Coordinate::new(40.7128 + i as f64 * 0.0005, -74.0060).unwrap(),
            })
            .collect();
        Arc::new(CountingEngine {
            inner: StaticTransitProvider::from_data(stops, vec![]).unwrap(),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn service(engine: Arc<dyn SpatialEngine>) -> NearbyService {
        NearbyService::new(engine, ServiceConfig::default()).unwrap()
    }

    fn query() -> NearbyQuery {
        NearbyQuery {
            lat: 40.7128,
            lon: -74.0060,
            radius: 1.0,
            unit: DistanceUnit::Miles,
            filter: EntityFilter::Stops,
            limit: 50,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_queries_hit_engine_once() {
        let engine = engine(12, Duration::from_millis(50));
        let service = service(engine.clone());

        let (q1, q2) = (query(), query());
        let (a, b) = tokio::join!(service.nearby(&q1), service.nearby(&q2));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.items(), b.items());
        assert_eq!(format!("{:?}", a.items()), format!("{:?}", b.items()));
        assert_eq!(a.len(), 12);
        assert_eq!(a.items()[0].entity_id.as_str(), "stop_00");
        assert_eq!(a.items()[0].distance, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_cache_or_engine() {
        let engine = engine(3, Duration::ZERO);
        let service = service(engine.clone());

        let bad_lat = NearbyQuery { lat: 91.0, ..query() };
        assert!(matches!(
            service.nearby(&bad_lat).await,
            Err(QueryError::InvalidCoordinate { .. })
        ));

        let bad_radius = NearbyQuery { radius: 0.0, ..query() };
        assert!(matches!(
            service.nearby(&bad_radius).await,
            Err(QueryError::InvalidParameter(_))
        ));

        let bad_page = PageRequest::new(1, 500).unwrap();
        assert!(service.nearby_page(&query(), bad_page).await.is_err());
        assert!(service.nearby_by_cursor(&query(), None, 0).await.is_err());
        assert!(matches!(
            service.nearby_by_cursor(&query(), Some("zz"), 10).await,
            Err(QueryError::InvalidCursor(_))
        ));

        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.stats().lookups(), 0);
    }

    #[tokio::test]
    async fn test_offset_pages_from_cache() {
        let engine = engine(17, Duration::ZERO);
        let service = service(engine.clone());

        let fourth = service
            .nearby_page(&query(), PageRequest::new(4, 5).unwrap())
            .await
            .unwrap();
        assert_eq!(fourth.total_count, 17);
        assert_eq!(fourth.total_pages, 4);
        assert_eq!(fourth.items.len(), 2);
        assert!(!fourth.has_next);

        let fifth = service
            .nearby_page(&query(), PageRequest::new(5, 5).unwrap())
            .await
            .unwrap();
        assert!(fifth.items.is_empty());
        assert!(!fifth.has_next);

        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cursor_pages_and_stale_cursor_after_invalidation() {
        let engine = engine(23, Duration::ZERO);
        let service = service(engine.clone());

        let p1 = service.nearby_by_cursor(&query(), None, 10).await.unwrap();
        let t1 = p1.next_cursor.unwrap().encode();
        let p2 = service.nearby_by_cursor(&query(), Some(&t1), 10).await.unwrap();
        let t2 = p2.next_cursor.unwrap().encode();
        let p3 = service.nearby_by_cursor(&query(), Some(&t2), 10).await.unwrap();

        assert_eq!(
            (p1.items.len(), p2.items.len(), p3.items.len()),
            (10, 10, 3)
        );
        assert!(p3.next_cursor.is_none());

        assert_eq!(service.invalidate_entity_kind(EntityKind::Stop), 1);
        assert!(matches!(
            service.nearby_by_cursor(&query(), Some(&t1), 10).await,
            Err(QueryError::StaleCursor)
        ));

        let restarted = service.nearby_by_cursor(&query(), None, 10).await.unwrap();
        assert_eq!(restarted.items, p1.items);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cursor_from_other_query_is_rejected() {
        let engine = engine(23, Duration::ZERO);
        let service = service(engine);

        let token = service
            .nearby_by_cursor(&query(), None, 10)
            .await
            .unwrap()
            .next_cursor
            .unwrap()
            .encode();
        let wider = NearbyQuery { radius: 2.0, ..query() };
        assert!(matches!(
            service.nearby_by_cursor(&wider, Some(&token), 10).await,
            Err(QueryError::InvalidCursor(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_failure_propagates_and_is_retried() {
        let service = service(Arc::new(OfflineEngine));

        let err = service.nearby(&query()).await.unwrap_err();
        assert!(matches!(err, QueryError::UpstreamUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(service.stats().current_size, 0);

        assert!(service.nearby(&query()).await.is_err());
        assert_eq!(service.stats().misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_refresh_after_default_ttl() {
        let engine = engine(3, Duration::ZERO);
        let service = NearbyService::new(
            engine.clone(),
            ServiceConfig {
                cache: CacheConfig {
                    default_ttl_seconds: 30,
                    ..CacheConfig::default()
                },
                limits: QueryLimits::default(),
            },
        )
        .unwrap();

        let first = service.nearby(&query()).await.unwrap();
        tokio::time::advance(Duration::from_secs(29)).await;
        service.nearby(&query()).await.unwrap();
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        let refreshed = service.nearby(&query()).await.unwrap();
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert!(refreshed.version() > first.version());
    }

    fn short_lived(engine: Arc<dyn SpatialEngine>) -> NearbyService {
        NearbyService::new(
            engine,
            ServiceConfig {
                cache: CacheConfig {
                    default_ttl_seconds: 1,
                    sweep_interval_seconds: 1,
                    ..CacheConfig::default()
                },
                limits: QueryLimits::default(),
            },
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_results_are_swept_in_background() {
        let service = short_lived(engine(3, Duration::ZERO));

        service.nearby(&query()).await.unwrap();
        assert_eq!(service.stats().current_size, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let stats = service.stats();
        assert_eq!(stats.current_size, 0);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_with_last_service_clone() {
        let service = short_lived(engine(3, Duration::ZERO));
        let cache = service.cache().clone();

        service.nearby(&query()).await.unwrap();
        let clone = service.clone();
        drop(service);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(cache.stats().current_size, 0);

        clone.nearby(&query()).await.unwrap();
        drop(clone);
        tokio::time::sleep(Duration::from_secs(10)).await;
        // Expired but never swept
        assert_eq!(cache.stats().current_size, 1);
        assert!(cache.peek(&query_key()).is_none());
    }

    fn query_key() -> QueryKey {
        let q = query();
        QueryKey::new(
            Coordinate::new(q.lat, q.lon).unwrap(),
            q.radius,
            q.unit,
            q.filter,
            q.limit,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalidate_entity_kind_keeps_other_kinds() {
        let engine = engine(3, Duration::ZERO);
        let service = service(engine);

        service.nearby(&query()).await.unwrap();
        let routes = NearbyQuery {
            filter: EntityFilter::all_routes(),
            ..query()
        };
        service.nearby(&routes).await.unwrap();
        assert_eq!(service.stats().current_size, 2);

        assert_eq!(service.invalidate_entity_kind(EntityKind::Route), 1);
        assert_eq!(service.stats().current_size, 1);
    }
}
