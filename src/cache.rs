//! Principal Cache (C5) — TTL-based, DashMap-backed cache of decisions
//! keyed by [`crate::engine::DecisionKey`], with byte accounting and an
//! eviction hook for releasing it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::principal::Principal;

/// Called once per entry, exactly when it is evicted (by TTL sweep or
/// explicit purge) — never on a cache hit or a fresh insert.
pub trait ExpiredHook: Send + Sync {
    /// `bytes` is the accounted cost of the entry as inserted: the
    /// decision key's length plus [`Principal::byte_cost`].
    fn on_expired(&self, key: &str, bytes: usize);
}

struct NoopHook;
impl ExpiredHook for NoopHook {
    fn on_expired(&self, _key: &str, _bytes: usize) {}
}

struct Entry {
    principal: Principal,
    cached_at: Instant,
    ttl: Duration,
    bytes: usize,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Process-wide cache of authorization decisions.
///
/// Reads and writes never block each other across different keys
/// (`DashMap`'s sharded locking); `memory_usage` is a best-effort
/// accounting counter, not a hard cap enforced against inserts.
pub struct PrincipalCache {
    entries: DashMap<String, Entry>,
    memory_usage: AtomicI64,
    expired_hook: Box<dyn ExpiredHook>,
}

impl PrincipalCache {
    /// Construct an empty cache with no eviction hook.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hook(Box::new(NoopHook))
    }

    /// Construct an empty cache with `hook` run on every eviction.
    #[must_use]
    pub fn with_hook(hook: Box<dyn ExpiredHook>) -> Self {
        Self {
            entries: DashMap::new(),
            memory_usage: AtomicI64::new(0),
            expired_hook: hook,
        }
    }

    /// Look up `key`, evicting it first if its TTL has elapsed.
    pub fn get(&self, key: &str) -> Option<Principal> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.evict(key);
                return None;
            }
            return Some(entry.principal.clone());
        }
        None
    }

    /// Insert `principal` under `key` with the given `ttl`, accounting
    /// its byte cost. Replaces any existing entry for `key` without
    /// running the eviction hook (a fresh write is not an expiry).
    pub fn insert(&self, key: String, principal: Principal, ttl: Duration) {
        let bytes = principal.byte_cost() + key.len();
        let entry = Entry { principal, cached_at: Instant::now(), ttl, bytes };
        if let Some(old) = self.entries.insert(key, entry) {
            self.memory_usage.fetch_sub(old.bytes as i64, Ordering::Relaxed);
        }
        self.memory_usage.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    /// Sweep every expired entry, running the eviction hook once per
    /// entry removed. Called on a timer at half the decision TTL (§4.7).
    pub fn sweep(&self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            self.evict(&key);
        }
        #[cfg(feature = "metrics")]
        crate::metrics::set_cache_occupancy(self.len(), self.size());
    }

    fn evict(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.memory_usage.fetch_sub(entry.bytes as i64, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            crate::metrics::record_cache_eviction(entry.bytes);
            self.expired_hook.on_expired(key, entry.bytes);
        }
    }

    /// Number of entries currently cached, including any not yet swept
    /// past their TTL.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry without running the eviction hook (§4.7: used
    /// on supervisor shutdown, not a per-entry expiry).
    pub fn clear(&self) {
        self.entries.clear();
        self.memory_usage.store(0, Ordering::Relaxed);
    }

    /// Best-effort accounted byte size of all cached entries.
    #[must_use]
    pub fn size(&self) -> i64 {
        self.memory_usage.load(Ordering::Relaxed)
    }
}

impl Default for PrincipalCache {
    fn default() -> Self {
        Self::new()
    }
}
