//! Query Result Cache
//!
//! One bounded store shared by every connection a driver opens, partitioned by
//! [`CacheScope`] so connections with different credentials or provider
//! selections never observe each other's entries.
//!
//! # Entry lifecycle
//! `Absent → put → Fresh → ttl elapses → Expired → (read or purge) → Absent`.
//! An entry is served only while `now < created_at + ttl`, with `now` taken from
//! the store's [`Clock`]. Expired entries are dropped lazily on read, by
//! [`QueryCache::purge_expired`], and by the store's own per-entry timer. When
//! the store is full the least recently used entry goes. There is no manual
//! invalidation.
//!
//! # Failure isolation
//! Internal faults ([`CacheError`]) never reach a query caller. A faulted
//! lookup is a miss and the query runs directly.
//!
//! # Stampede control
//! [`ScopedCache::get_or_load`] lets one caller per key run the fetch while
//! concurrent callers on the same key wait for its result. A failed fetch is
//! not stored; its error goes to every caller that was waiting on it.

pub mod clock;
pub mod key;

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use moka::Expiry;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CachePolicy;
use crate::engine::QueryResult;
use crate::error::{CacheError, CloudOpsError, Result};

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{CacheKey, CacheScope};

/// Default maximum number of entries across all scopes
pub const DEFAULT_CAPACITY: usize = 1024;

/// Log target for debug-mode cache records
pub const DEBUG_TARGET: &str = "cloudops::cache";

/// Upper bound handed to the store's timer; longer TTLs rely on lazy expiry
const MAX_TIMER_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

type StoreKey = (CacheScope, CacheKey);

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Arc<QueryResult>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        // An expiry past the end of representable time never arrives
        self.created_at.checked_add(self.ttl).map_or(true, |expires_at| now < expires_at)
    }
}

/// Per-entry timer; overwriting an entry restarts it
struct EntryTtl;

impl Expiry<StoreKey, CacheEntry> for EntryTtl {
    fn expire_after_create(&self, _key: &StoreKey, entry: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl.min(MAX_TIMER_TTL))
    }

    fn expire_after_update(
        &self,
        _key: &StoreKey,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl.min(MAX_TIMER_TTL))
    }
}

/// Result of a plain lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit { result: Arc<QueryResult>, age: Duration },
    Miss,
}

impl CacheLookup {
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Where a query's rows came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// Served from a fresh entry
    Hit,
    /// Fetched by this caller
    Miss,
    /// Caching disabled for the connection
    Bypass,
    /// Shared from a concurrent caller's fetch
    Coalesced,
}

impl CacheSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
            Self::Coalesced => "coalesced",
        }
    }
}

/// Rows plus where they came from
#[derive(Debug, Clone)]
pub struct Fetched {
    pub result: Arc<QueryResult>,
    pub source: CacheSource,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Outcome of a coalesced load
enum Shared {
    /// This caller ran the fetch
    Loaded(Arc<QueryResult>),
    /// Another caller's fetch supplied the rows
    Joined(Arc<QueryResult>),
}

/// Shared, bounded result store
pub struct QueryCache {
    entries: Cache<StoreKey, CacheEntry>,
    capacity: usize,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
}

impl QueryCache {
    /// Store holding at most `capacity` entries, timed by the system clock
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let counters = Arc::new(Counters::default());
        let removals = Arc::clone(&counters);
        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .eviction_listener(move |_key, _entry, cause| match cause {
                RemovalCause::Size => Counters::bump(&removals.evictions, 1),
                RemovalCause::Expired => Counters::bump(&removals.expirations, 1),
                _ => {}
            })
            .build();

        Self { entries, capacity, clock, counters }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether an entry with this TTL would be kept at all
    fn retains(&self, ttl: Duration) -> bool {
        !ttl.is_zero() && self.capacity > 0
    }

    /// Look up a fresh entry, evicting it if it has expired
    pub fn lookup(&self, scope: &CacheScope, key: &CacheKey) -> CacheLookup {
        let store_key = (scope.clone(), key.clone());
        let now = self.clock.now();

        let lookup = match self.entries.get(&store_key) {
            Some(entry) if entry.is_fresh(now) => CacheLookup::Hit {
                result: entry.result,
                age: now.saturating_duration_since(entry.created_at),
            },
            Some(_) => {
                self.expire(&store_key);
                CacheLookup::Miss
            }
            None => CacheLookup::Miss,
        };

        if lookup.is_hit() {
            Counters::bump(&self.counters.hits, 1);
        } else {
            Counters::bump(&self.counters.misses, 1);
        }
        lookup
    }

    /// Store or overwrite an entry with `created_at = now`
    ///
    /// A zero TTL or zero capacity stores nothing. When the store is full the
    /// least recently used entry is evicted.
    pub fn insert(&self, scope: &CacheScope, key: &CacheKey, result: Arc<QueryResult>, ttl: Duration) {
        if !self.retains(ttl) {
            return;
        }
        let entry = CacheEntry { result, created_at: self.clock.now(), ttl };
        self.entries.insert((scope.clone(), key.clone()), entry);
        self.settle();
        Counters::bump(&self.counters.puts, 1);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<StoreKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in &expired {
            self.expire(key);
        }
        expired.len()
    }

    /// Number of stored entries, fresh or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Fetch once for every concurrent caller on `(scope, key)`
    ///
    /// A fetch error is shared with the callers waiting on it and nothing is
    /// stored. An entry that turns out stale is replaced by a fresh fetch.
    fn load_shared<F>(&self, scope: &CacheScope, key: &CacheKey, ttl: Duration, load: F) -> Result<Shared>
    where
        F: FnOnce() -> Result<QueryResult>,
    {
        let store_key = (scope.clone(), key.clone());
        let mut load = Some(load);

        let entry = self
            .entries
            .entry(store_key.clone())
            .or_try_insert_with(|| -> Result<CacheEntry> {
                let result = match load.take() {
                    Some(load) => load()?,
                    None => return Err(CloudOpsError::query_failed("Query loader already ran")),
                };
                Ok(CacheEntry { result: Arc::new(result), created_at: self.clock.now(), ttl })
            })
            .map_err(|err| Arc::try_unwrap(err).unwrap_or_else(|shared| (*shared).clone()))?;

        if entry.is_fresh() {
            self.settle();
            Counters::bump(&self.counters.puts, 1);
            return Ok(Shared::Loaded(entry.into_value().result));
        }

        let existing = entry.into_value();
        if existing.is_fresh(self.clock.now()) {
            return Ok(Shared::Joined(existing.result));
        }

        self.expire(&store_key);
        let Some(load) = load.take() else {
            return Err(CloudOpsError::query_failed("Query loader already ran"));
        };
        let result = Arc::new(load()?);
        self.insert(scope, key, Arc::clone(&result), ttl);
        Ok(Shared::Loaded(result))
    }

    fn expire(&self, store_key: &StoreKey) {
        self.entries.invalidate(store_key);
        Counters::bump(&self.counters.expirations, 1);
    }

    /// Apply pending writes so the capacity bound holds before returning
    fn settle(&self) {
        self.entries.run_pending_tasks();
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One connection's view of the shared store
///
/// Applies the connection's [`CachePolicy`] and scope. Cloning shares the
/// closed flag.
#[derive(Debug, Clone)]
pub struct ScopedCache {
    store: Arc<QueryCache>,
    scope: CacheScope,
    policy: CachePolicy,
    closed: Arc<AtomicBool>,
}

impl ScopedCache {
    pub fn new(store: Arc<QueryCache>, scope: CacheScope, policy: CachePolicy) -> Self {
        Self { store, scope, policy, closed: Arc::new(AtomicBool::new(false)) }
    }

    #[must_use]
    pub const fn scope(&self) -> &CacheScope {
        &self.scope
    }

    #[must_use]
    pub const fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    #[must_use]
    pub fn store(&self) -> &QueryCache {
        &self.store
    }

    /// Mark the owning connection closed
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// `Hit` only for a fresh entry in this scope; every fault is a `Miss`
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> CacheLookup {
        if !self.policy.enabled {
            return CacheLookup::Miss;
        }
        let lookup = match self.checked_lookup(key) {
            Ok(lookup) => lookup,
            Err(err) => {
                tracing::warn!(error = %err, "Cache lookup failed; treating as miss");
                CacheLookup::Miss
            }
        };
        self.trace_get(key, &lookup);
        lookup
    }

    /// Store `result` under `key` with the policy TTL; no-op when disabled
    pub fn put(&self, key: &CacheKey, result: Arc<QueryResult>) {
        if !self.policy.enabled {
            return;
        }
        if self.is_closed() {
            tracing::warn!(error = %CacheError::Closed, "Cache store failed; result not cached");
            return;
        }
        self.store.insert(&self.scope, key, Arc::clone(&result), self.policy.ttl);
        self.trace_put(key, &result);
    }

    /// Serve `key` from the cache, or run `load` once for all concurrent callers
    ///
    /// Errors from `load` are returned unchanged. Returns
    /// [`CloudOpsError::ConnectionClosed`] when this handle is closed, including
    /// when it closed while waiting on another caller's fetch.
    pub fn get_or_load<F>(&self, key: &CacheKey, load: F) -> Result<Fetched>
    where
        F: FnOnce() -> Result<QueryResult>,
    {
        if self.is_closed() {
            return Err(CloudOpsError::ConnectionClosed);
        }
        if !self.policy.enabled {
            let result = Arc::new(load()?);
            return Ok(Fetched { result, source: CacheSource::Bypass });
        }
        if let CacheLookup::Hit { result, .. } = self.get(key) {
            return Ok(Fetched { result, source: CacheSource::Hit });
        }
        if !self.store.retains(self.policy.ttl) {
            let result = Arc::new(load()?);
            return Ok(Fetched { result, source: CacheSource::Miss });
        }

        match self.store.load_shared(&self.scope, key, self.policy.ttl, load)? {
            Shared::Loaded(result) => {
                self.trace_put(key, &result);
                Ok(Fetched { result, source: CacheSource::Miss })
            }
            Shared::Joined(_) if self.is_closed() => Err(CloudOpsError::ConnectionClosed),
            Shared::Joined(result) => {
                if self.policy.debug_mode {
                    tracing::info!(target: DEBUG_TARGET, key = %key.signature(), "Cache coalesced");
                }
                Ok(Fetched { result, source: CacheSource::Coalesced })
            }
        }
    }

    fn checked_lookup(&self, key: &CacheKey) -> std::result::Result<CacheLookup, CacheError> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        Ok(self.store.lookup(&self.scope, key))
    }

    fn trace_get(&self, key: &CacheKey, lookup: &CacheLookup) {
        if !self.policy.debug_mode {
            return;
        }
        match lookup {
            CacheLookup::Hit { result, age } => tracing::info!(
                target: DEBUG_TARGET,
                key = %key.signature(),
                relation = key.relation(),
                rows = result.row_count(),
                age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
                "Cache hit"
            ),
            CacheLookup::Miss => tracing::info!(
                target: DEBUG_TARGET,
                key = %key.signature(),
                relation = key.relation(),
                "Cache miss"
            ),
        }
    }

    fn trace_put(&self, key: &CacheKey, result: &QueryResult) {
        if self.policy.debug_mode {
            tracing::info!(
                target: DEBUG_TARGET,
                key = %key.signature(),
                relation = key.relation(),
                rows = result.row_count(),
                ttl_minutes = self.policy.ttl_minutes(),
                "Cache put"
            );
        }
    }
}
