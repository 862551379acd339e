//! The result cache.
//!
//! Entries live in a fixed set of lock stripes picked by key hash. Stripe
//! locks guard map bookkeeping only and are never held across a computation
//! or an await point, so a slow key never stalls any other key.
//!
//! A missing or expired key is replaced by a pending slot under the stripe's
//! write lock, which makes exactly one caller the computing owner. The
//! computation runs as its own task and publishes its outcome on a watch
//! channel; every caller for that key, owner included, waits on the channel.
//! Dropping a waiter therefore never cancels the computation.
//!
//! Invalidating a key while its computation runs marks the flight discarded
//! instead of removing it. The slot stays pending until the flight settles,
//! and later callers wait for that before starting their own computation.

use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

use crate::cache::snapshot::Snapshot;
use crate::cache::stats::{CacheStats, Counters};
use crate::config::CacheConfig;
use crate::models::key::QueryKey;
use crate::models::types::{QueryError, Result, ResultItem};

const SHARD_COUNT: usize = 16;

type Outcome = Option<Result<Arc<Snapshot>>>;
type Entries = HashMap<QueryKey, Slot>;
type Shard = RwLock<Entries>;

enum Slot {
    Ready(Arc<Snapshot>),
    Pending(Flight),
}

struct Flight {
    id: u64,
    rx: watch::Receiver<Outcome>,
    /// Set by invalidation; the outcome still reaches current waiters but
    /// is not stored.
    discarded: bool,
}

enum Lookup {
    Hit(Arc<Snapshot>),
    Wait(watch::Receiver<Outcome>),
    /// A discarded flight still holds the key. Wait for it, then look again.
    Settle(watch::Receiver<Outcome>),
    Own(FlightGuard, watch::Receiver<Outcome>),
}

fn read(shard: &Shard) -> RwLockReadGuard<'_, Entries> {
    shard.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(shard: &Shard) -> RwLockWriteGuard<'_, Entries> {
    shard.write().unwrap_or_else(PoisonError::into_inner)
}

fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(QueryError::InvalidParameter(
            "ttl must be greater than zero".into(),
        ));
    }
    Ok(())
}

async fn wait(mut rx: watch::Receiver<Outcome>) -> Result<Arc<Snapshot>> {
    let outcome = rx
        .wait_for(Option::is_some)
        .await
        .map(|outcome| outcome.clone());
    match outcome {
        Ok(Some(result)) => result,
        // Sender dropped without publishing: the task panicked or was aborted
        _ => Err(QueryError::ComputationFailed(
            "computation aborted before producing a result".into(),
        )),
    }
}

struct CacheInner {
    shards: Box<[Shard]>,
    config: CacheConfig,
    next_version: AtomicU64,
    next_flight: AtomicU64,
    /// Ready slots across all stripes. Changed only under a stripe write lock.
    ready: AtomicUsize,
    counters: Counters,
}

impl CacheInner {
    fn shard(&self, key: &QueryKey) -> &Shard {
        let mut hasher = XxHash64::with_seed(0);
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    /// Classify an existing slot. `None` means the caller must compute.
    fn existing(&self, slot: Option<&Slot>, key: &QueryKey, now: Instant) -> Option<Lookup> {
        match slot? {
            Slot::Ready(snapshot) if !snapshot.is_expired_at(now) => {
                Counters::bump(&self.counters.hits, 1);
                debug!(%key, version = snapshot.version(), "cache hit");
                Some(Lookup::Hit(Arc::clone(snapshot)))
            }
            Slot::Pending(flight) if flight.discarded => {
                debug!(%key, flight = flight.id, "waiting for discarded computation to settle");
                Some(Lookup::Settle(flight.rx.clone()))
            }
            Slot::Pending(flight) => {
                Counters::bump(&self.counters.coalesced, 1);
                debug!(%key, flight = flight.id, "joining in-flight computation");
                Some(Lookup::Wait(flight.rx.clone()))
            }
            Slot::Ready(_) => None,
        }
    }

    fn store(&self, key: &QueryKey, id: u64, ttl: Duration, items: Vec<ResultItem>) -> Arc<Snapshot> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(Snapshot::new(key.clone(), version, ttl, items));

        let stored = {
            let mut map = write(self.shard(key));
            let discarded = match map.get(key) {
                Some(Slot::Pending(flight)) if flight.id == id => Some(flight.discarded),
                _ => None,
            };
            match discarded {
                Some(false) => {
                    map.insert(key.clone(), Slot::Ready(Arc::clone(&snapshot)));
                    self.ready.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Some(true) => {
                    map.remove(key);
                    false
                }
                None => false,
            }
        };

        if stored {
            debug!(%key, version, items = snapshot.len(), "stored result");
            self.enforce_capacity();
        } else {
            debug!(%key, version, "key invalidated during computation, result not stored");
        }
        snapshot
    }

    /// Drop our pending slot, if it is still ours.
    fn abandon(&self, key: &QueryKey, id: u64) {
        let mut map = write(self.shard(key));
        if matches!(map.get(key), Some(Slot::Pending(flight)) if flight.id == id) {
            map.remove(key);
        }
    }

    /// Evict down to `max_entries`: expired entries first, then live ones,
    /// oldest-created first within each group.
    fn enforce_capacity(&self) {
        let max_entries = self.config.max_entries;
        if self.ready.load(Ordering::Relaxed) <= max_entries {
            return;
        }
        let now = Instant::now();

        let mut ready = Vec::new();
        for shard in self.shards.iter() {
            for (key, slot) in read(shard).iter() {
                if let Slot::Ready(snapshot) = slot {
                    ready.push((
                        !snapshot.is_expired_at(now),
                        snapshot.created_at(),
                        key.clone(),
                        snapshot.version(),
                    ));
                }
            }
        }
        if ready.len() <= max_entries {
            return;
        }

        ready.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        let excess = ready.len() - max_entries;

        let mut evicted = 0;
        for (_, _, key, version) in ready.into_iter().take(excess) {
            let mut map = write(self.shard(&key));
            // Skip entries refreshed since the scan
            if matches!(map.get(&key), Some(Slot::Ready(s)) if s.version() == version) {
                map.remove(&key);
                self.ready.fetch_sub(1, Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            Counters::bump(&self.counters.evictions, evicted);
            info!(evicted, max_entries, "evicted entries over capacity");
        }
    }

    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut map = write(shard);
            let before = map.len();
            map.retain(|_, slot| !matches!(slot, Slot::Ready(s) if s.is_expired_at(now)));
            let swept = before - map.len();
            self.ready.fetch_sub(swept, Ordering::Relaxed);
            removed += swept;
        }

        if removed > 0 {
            Counters::bump(&self.counters.evictions, removed as u64);
            info!(removed, "swept expired entries");
        }
        removed
    }

    /// Remove matching ready entries and discard matching flights. Returns
    /// the number of entries removed.
    fn invalidate_where(&self, predicate: impl Fn(&QueryKey) -> bool) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut map = write(shard);
            let before = map.len();
            map.retain(|key, slot| {
                if !predicate(key) {
                    return true;
                }
                match slot {
                    Slot::Ready(_) => false,
                    Slot::Pending(flight) => {
                        flight.discarded = true;
                        true
                    }
                }
            });
            let dropped = before - map.len();
            self.ready.fetch_sub(dropped, Ordering::Relaxed);
            removed += dropped;
        }
        Counters::bump(&self.counters.invalidations, removed as u64);
        removed
    }

    fn current_size(&self) -> usize {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Owns the sending half of one computation.
///
/// If the task ends without publishing (panic, runtime shutdown) the drop
/// clears the pending slot, so the next lookup computes afresh, and closes
/// the channel, so waiters fail with `ComputationFailed`.
struct FlightGuard {
    inner: Arc<CacheInner>,
    key: QueryKey,
    id: u64,
    tx: Option<watch::Sender<Outcome>>,
}

impl FlightGuard {
    async fn run<F, Fut>(mut self, ttl: Duration, compute: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ResultItem>>>,
    {
        let outcome = match compute().await {
            Ok(items) => Ok(self.inner.store(&self.key, self.id, ttl, items)),
            Err(error) => {
                warn!(key = %self.key, %error, "computation failed, result not cached");
                self.inner.abandon(&self.key, self.id);
                Err(error)
            }
        };
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(key = %self.key, "computation aborted");
            self.inner.abandon(&self.key, self.id);
        }
    }
}

/// Key-addressed TTL cache of ordered result sets.
///
/// At most one computation per key is in flight at any time; concurrent
/// callers for that key share its outcome. Failures are delivered to every
/// waiter and never stored. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        Ok(Self {
            inner: Arc::new(CacheInner {
                shards,
                config,
                next_version: AtomicU64::new(0),
                next_flight: AtomicU64::new(0),
                ready: AtomicUsize::new(0),
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the live snapshot for `key`, computing it if needed.
    ///
    /// `compute` is invoked only when this caller becomes the computing
    /// owner; it runs to completion even if every caller stops waiting.
    pub async fn get<F, Fut>(&self, key: QueryKey, ttl: Duration, compute: F) -> Result<Arc<Snapshot>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<ResultItem>>> + Send + 'static,
    {
        validate_ttl(ttl)?;
        self.resolve(&key, ttl, compute).await
    }

    /// [`get`](Self::get) with the configured default TTL.
    pub async fn get_default<F, Fut>(&self, key: QueryKey, compute: F) -> Result<Arc<Snapshot>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<ResultItem>>> + Send + 'static,
    {
        self.get(key, self.inner.config.default_ttl(), compute).await
    }

    /// [`get`](Self::get), giving up with `Timeout` after `timeout`.
    ///
    /// Only this caller stops waiting; the computation carries on and its
    /// result is still stored for later lookups.
    pub async fn get_with_timeout<F, Fut>(
        &self,
        key: QueryKey,
        ttl: Duration,
        timeout: Duration,
        compute: F,
    ) -> Result<Arc<Snapshot>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<ResultItem>>> + Send + 'static,
    {
        validate_ttl(ttl)?;
        tokio::time::timeout(timeout, self.resolve(&key, ttl, compute))
            .await
            .map_err(|_| QueryError::Timeout)?
    }

    async fn resolve<F, Fut>(&self, key: &QueryKey, ttl: Duration, compute: F) -> Result<Arc<Snapshot>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<ResultItem>>> + Send + 'static,
    {
        loop {
            match self.claim(key) {
                Lookup::Hit(snapshot) => return Ok(snapshot),
                Lookup::Wait(rx) => return wait(rx).await,
                Lookup::Settle(mut rx) => {
                    // An outcome or a closed channel both mean the slot is gone
                    let _ = rx.wait_for(Option::is_some).await;
                }
                Lookup::Own(guard, rx) => {
                    tokio::spawn(guard.run(ttl, compute));
                    return wait(rx).await;
                }
            }
        }
    }

    /// Classify `key`, installing a pending slot owned by the caller when
    /// nothing usable is there.
    fn claim(&self, key: &QueryKey) -> Lookup {
        let inner = &self.inner;
        let shard = inner.shard(key);
        let now = Instant::now();

        {
            let map = read(shard);
            if let Some(found) = inner.existing(map.get(key), key, now) {
                return found;
            }
        }

        let mut map = write(shard);
        // Another caller may have won the race for the write lock
        if let Some(found) = inner.existing(map.get(key), key, now) {
            return found;
        }
        if map.remove(key).is_some() {
            inner.ready.fetch_sub(1, Ordering::Relaxed);
            Counters::bump(&inner.counters.evictions, 1);
            debug!(%key, "evicted expired entry");
        }

        let id = inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        map.insert(
            key.clone(),
            Slot::Pending(Flight {
                id,
                rx: rx.clone(),
                discarded: false,
            }),
        );
        drop(map);

        Counters::bump(&inner.counters.misses, 1);
        debug!(%key, flight = id, "cache miss, computing");

        let guard = FlightGuard {
            inner: Arc::clone(inner),
            key: key.clone(),
            id,
            tx: Some(tx),
        };
        Lookup::Own(guard, rx)
    }

    /// The live snapshot for `key`, without computing or touching counters.
    pub fn peek(&self, key: &QueryKey) -> Option<Arc<Snapshot>> {
        let now = Instant::now();
        match read(self.inner.shard(key)).get(key) {
            Some(Slot::Ready(snapshot)) if !snapshot.is_expired_at(now) => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    /// Remove `key` regardless of TTL. Returns whether an entry was removed.
    ///
    /// A computation in flight for `key` is discarded: it still answers its
    /// current waiters, its result is not stored, and the next lookup
    /// computes again once it has finished.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let removed = {
            let mut map = write(self.inner.shard(key));
            if let Some(Slot::Pending(flight)) = map.get_mut(key) {
                flight.discarded = true;
                debug!(%key, flight = flight.id, "discarded in-flight computation");
                return false;
            }
            let removed = map.remove(key).is_some();
            if removed {
                self.inner.ready.fetch_sub(1, Ordering::Relaxed);
            }
            removed
        };
        if removed {
            Counters::bump(&self.inner.counters.invalidations, 1);
            debug!(%key, "invalidated");
        }
        removed
    }

    /// Remove every key for which `predicate` returns true.
    pub fn invalidate_matching(&self, predicate: impl Fn(&QueryKey) -> bool) -> usize {
        let removed = self.inner.invalidate_where(predicate);
        debug!(removed, "invalidated matching keys");
        removed
    }

    pub fn clear(&self) -> usize {
        self.inner.invalidate_where(|_| true)
    }

    /// Remove every expired entry now.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Start the periodic expiry sweep, if `sweep_interval_seconds` is set.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.sweep_interval()?;
        let cache = Arc::downgrade(&self.inner);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = cache.upgrade() else {
                    break;
                };
                inner.sweep_expired();
            }
            debug!("cache dropped, sweeper exiting");
        }))
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot(self.inner.current_size())
    }
}
