//! Generic TTL cache with single-flight loading.
//!
//! A read that finds no fresh entry starts exactly one load for its key;
//! every concurrent reader of that key awaits the same load and receives the
//! same value or the same error. Loads run as spawned tasks, so a caller that
//! times out or is dropped abandons only its own wait.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use knk_core::error::{KnkError, Result};

use crate::metrics::CacheMetrics;

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Cache entry with absolute expiry.
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

/// A cached value tagged with its freshness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cached<V> {
    /// Within its TTL
    Fresh(V),
    /// Past its TTL, served because a reload was not possible
    Stale(V),
}

impl<V> Cached<V> {
    /// Returns true for values past their TTL.
    pub fn is_stale(&self) -> bool {
        matches!(self, Cached::Stale(_))
    }

    /// Borrows the value.
    pub fn value(&self) -> &V {
        match self {
            Cached::Fresh(v) | Cached::Stale(v) => v,
        }
    }

    /// Unwraps the value, discarding freshness.
    pub fn into_inner(self) -> V {
        match self {
            Cached::Fresh(v) | Cached::Stale(v) => v,
        }
    }

    /// Maps the value, keeping freshness.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Cached<U> {
        match self {
            Cached::Fresh(v) => Cached::Fresh(f(v)),
            Cached::Stale(v) => Cached::Stale(f(v)),
        }
    }
}

enum Flight<V> {
    Ready(V),
    Pending(SharedLoad<V>),
}

/// A running load and the id that lets its task tell whether it still owns
/// the key.
struct InFlight<V> {
    id: u64,
    load: SharedLoad<V>,
}

struct Inner<K, V> {
    name: String,
    ttl: Duration,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<K, InFlight<V>>>,
    next_flight: AtomicU64,
    metrics: CacheMetrics,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fresh(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.is_fresh(now))
            .map(|e| e.value.clone())
    }

    fn lookup(&self, key: &K) -> Option<Cached<V>> {
        let now = Instant::now();
        self.entries.read().get(key).map(|e| {
            if e.is_fresh(now) {
                Cached::Fresh(e.value.clone())
            } else {
                Cached::Stale(e.value.clone())
            }
        })
    }

    fn store(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(key, entry);
        self.metrics.record_puts(1);
    }
}

/// Removes the in-flight marker for a key however its load task ends.
struct FlightGuard<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
    key: Option<K>,
    id: u64,
}

impl<K, V> FlightGuard<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Publishes the load result. The entry is written before the marker is
    /// removed, under the in-flight lock, so no reader can slip between them
    /// and start a second load.
    ///
    /// A load whose marker was dropped by `invalidate` or `clear` stores
    /// nothing: its waiters still get the value, the cache does not.
    fn finish(&mut self, result: &Result<V>) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut in_flight = self.inner.in_flight.lock();
        let current = in_flight.get(&key).is_some_and(|f| f.id == self.id);
        match result {
            Ok(value) if current => self.inner.store(key.clone(), value.clone()),
            Ok(_) => {
                debug!(cache = %self.inner.name, key = ?key, "Discarding load superseded by invalidation");
            }
            Err(err) => {
                self.inner.metrics.record_load_failure();
                warn!(cache = %self.inner.name, key = ?key, error = %err, "Load failed");
            }
        }
        if current {
            in_flight.remove(&key);
        }
    }
}

impl<K, V> Drop for FlightGuard<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Task panicked or was torn down before finishing
        if let Some(key) = self.key.take() {
            self.inner.metrics.record_load_failure();
            let mut in_flight = self.inner.in_flight.lock();
            if in_flight.get(&key).is_some_and(|f| f.id == self.id) {
                in_flight.remove(&key);
            }
        }
    }
}

/// Thread-safe TTL cache with single-flight loading.
///
/// Cloning is cheap and yields a handle to the same store.
///
/// # Expiry
///
/// An entry is fresh while `now <= inserted + ttl`. Expired entries are not
/// removed; they stay until a reload replaces them, or until `invalidate` or
/// `clear`, so they remain available for stale-serving.
///
/// # Metrics
///
/// A read answered by a fresh entry is a hit. A read that starts a load is a
/// miss. A read that joins a load already in flight is counted as a hit: it
/// is served without invoking the loader.
pub struct ExpiringCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ExpiringCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an unnamed cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self::named("cache", ttl)
    }

    /// Creates a cache whose name appears in log events.
    pub fn named(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                ttl,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
                metrics: CacheMetrics::new(),
            }),
        }
    }

    /// Returns the value for `key`, loading it on a miss.
    ///
    /// Concurrent calls for the same key share one `loader` invocation.
    pub async fn get<F, Fut>(&self, key: K, loader: F) -> Result<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.get_with_timeout(key, None, loader).await
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    ///
    /// On timeout this caller receives [`KnkError::Timeout`]; the load itself
    /// continues and its result is cached for later readers.
    pub async fn get_with_timeout<F, Fut>(
        &self,
        key: K,
        timeout: Option<Duration>,
        loader: F,
    ) -> Result<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let load = match self.begin(key, loader) {
            Flight::Ready(value) => return Ok(value),
            Flight::Pending(load) => load,
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, load).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(cache = %self.inner.name, ?limit, "Gave up waiting for load");
                    Err(KnkError::Timeout {
                        millis: limit.as_millis() as u64,
                    })
                }
            },
            None => load.await,
        }
    }

    /// Loads like [`get_with_timeout`](Self::get_with_timeout), falling back
    /// to an expired entry when the failure is transient.
    ///
    /// Non-transient failures (such as `NotFound`) are never answered with
    /// stale data.
    pub async fn get_or_stale<F, Fut>(
        &self,
        key: K,
        timeout: Option<Duration>,
        loader: F,
    ) -> Result<Cached<V>>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.get_with_timeout(key.clone(), timeout, loader).await {
            Ok(value) => Ok(Cached::Fresh(value)),
            Err(err) if err.is_recoverable() => match self.inner.lookup(&key) {
                Some(Cached::Stale(value)) => {
                    self.inner.metrics.record_stale_hit();
                    warn!(cache = %self.inner.name, key = ?key, error = %err, "Serving stale entry");
                    Ok(Cached::Stale(value))
                }
                // A concurrent reload landed after our wait ended
                Some(fresh) => Ok(fresh),
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    fn begin<F, Fut>(&self, key: K, loader: F) -> Flight<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let inner = &self.inner;
        if let Some(value) = inner.fresh(&key) {
            inner.metrics.record_hit();
            return Flight::Ready(value);
        }

        let mut in_flight = inner.in_flight.lock();

        // A load may have completed while we waited for the lock
        if let Some(value) = inner.fresh(&key) {
            inner.metrics.record_hit();
            return Flight::Ready(value);
        }

        if let Some(flight) = in_flight.get(&key) {
            inner.metrics.record_hit();
            debug!(cache = %inner.name, key = ?key, "Joining in-flight load");
            return Flight::Pending(flight.load.clone());
        }

        inner.metrics.record_miss();
        debug!(cache = %inner.name, key = ?key, "Cache miss, loading");

        let id = inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let load = loader(key.clone());
        let mut guard = FlightGuard {
            inner: Arc::clone(inner),
            key: Some(key.clone()),
            id,
        };
        let task = tokio::spawn(async move {
            let result = load.await;
            guard.finish(&result);
            result
        });
        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(KnkError::LoadCoalescingFailure(err.to_string())),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key,
            InFlight {
                id,
                load: shared.clone(),
            },
        );
        Flight::Pending(shared)
    }

    /// Reads without loading: fresh entries count as hits, expired ones as
    /// stale hits, absent ones as misses.
    pub fn peek(&self, key: &K) -> Option<Cached<V>> {
        let found = self.inner.lookup(key);
        match &found {
            Some(Cached::Fresh(_)) => self.inner.metrics.record_hit(),
            Some(Cached::Stale(_)) => self.inner.metrics.record_stale_hit(),
            None => self.inner.metrics.record_miss(),
        }
        found
    }

    /// Returns the stored value even if expired.
    pub fn peek_stale(&self, key: &K) -> Option<V> {
        let value = self.inner.lookup(key).map(Cached::into_inner);
        if value.is_some() {
            self.inner.metrics.record_stale_hit();
        }
        value
    }

    /// Stores a value directly, starting a fresh TTL.
    pub fn put(&self, key: K, value: V) {
        self.inner.store(key, value);
    }

    /// Stores many values with one shared insertion time.
    pub fn put_all<I>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let expires_at = Instant::now() + self.inner.ttl;
        let mut entries = self.inner.entries.write();
        let mut count = 0u64;
        for (key, value) in values {
            entries.insert(key, CacheEntry { value, expires_at });
            count += 1;
        }
        drop(entries);
        self.inner.metrics.record_puts(count);
    }

    /// Drops one entry so the next read reloads it.
    ///
    /// A load already running for `key` is detached: its current waiters are
    /// still answered, but its result is not stored and later reads start a
    /// new load. Returns true if an entry was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.remove(key);
        let removed = self.inner.entries.write().remove(key).is_some();
        drop(in_flight);
        if removed {
            self.inner.metrics.record_evictions(1);
        }
        removed
    }

    /// Drops every entry and detaches every running load. Metrics are kept.
    pub fn clear(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.clear();
        let mut entries = self.inner.entries.write();
        let count = entries.len() as u64;
        entries.clear();
        drop(entries);
        drop(in_flight);
        self.inner.metrics.record_evictions(count);
    }

    /// Number of stored entries, expired ones included.
    pub fn size(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Number of loads currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// The TTL applied to every entry.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Name used in log events.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// This cache's counters.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }
}
