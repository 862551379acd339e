//! Immutable cached result sets.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::key::QueryKey;
use crate::models::types::ResultItem;

/// One computed result set for a [`QueryKey`].
///
/// Never mutated after creation. A refresh replaces the snapshot with a new
/// one carrying a higher `version`.
#[derive(Debug)]
pub struct Snapshot {
    key: QueryKey,
    version: u64,
    created_at: Instant,
    ttl: Duration,
    items: Arc<[ResultItem]>,
}

impl Snapshot {
    pub(crate) fn new(key: QueryKey, version: u64, ttl: Duration, items: Vec<ResultItem>) -> Self {
        Self {
            key,
            version,
            created_at: Instant::now(),
            ttl,
            items: items.into(),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn items(&self) -> &[ResultItem] {
        &self.items
    }

    /// Shared handle to the items, for callers that outlive the snapshot.
    pub fn shared_items(&self) -> Arc<[ResultItem]> {
        Arc::clone(&self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}
