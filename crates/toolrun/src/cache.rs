//! TTL-bounded result cache with owned, cancellable expiry timers.
//!
//! The scheduler consults the cache before dispatching and writes to it on
//! every fresh success, so an identical call (same canonical key) within
//! the TTL succeeds without invoking the tool again.
//!
//! Each entry owns the handle of the task that will expire it. The handle
//! is aborted when the entry is overwritten, on [`shutdown`](ResultCache::shutdown),
//! and on drop — a cancelled timer never fires. A generation counter guards
//! the other direction: a timer that was already past its abort point when
//! its entry was replaced finds a different generation under the key and
//! leaves the replacement alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// A cached tool result awaiting expiry.
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    expiry: tokio::task::JoinHandle<()>,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
}

/// Maps canonical keys to previously computed results, each with a
/// time-to-live.
///
/// Mutation happens only from the scheduler's methods and from the expiry
/// tasks the cache itself spawns; tool implementations never touch it.
/// [`get`](Self::get) double-checks `expires_at`, so a result is never
/// served stale even if its expiry task has not been polled yet.
pub struct ResultCache {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
    generation: AtomicU64,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.lock().entries.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Creates an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a result under `key`, scheduling its expiry.
    ///
    /// Overwriting an existing entry aborts the displaced entry's timer.
    /// Must be called from within a tokio runtime (the expiry is a spawned
    /// task).
    pub fn insert(&self, key: &str, value: Value) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + self.ttl;

        let expiry = tokio::spawn(expire_after(
            Arc::downgrade(&self.inner),
            key.to_string(),
            generation,
            self.ttl,
        ));

        let entry = CacheEntry {
            value,
            expires_at,
            expiry,
            generation,
        };
        if let Some(displaced) = self.lock().entries.insert(key.to_string(), entry) {
            displaced.expiry.abort();
        }
    }

    /// Looks up a live result for `key`.
    ///
    /// An entry whose TTL has elapsed but whose timer has not yet run is
    /// treated as absent and evicted on the spot.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                if let Some(expired) = inner.entries.remove(key) {
                    expired.expiry.abort();
                }
                None
            }
            None => None,
        }
    }

    /// Number of live entries (including any whose timer is pending).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drops every entry and aborts every outstanding expiry timer.
    ///
    /// All handles are cancelled before this returns; none fires afterward.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        for (_, entry) in inner.entries.drain() {
            entry.expiry.abort();
        }
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Expiry task body: sleep out the TTL, then evict the entry if it is
/// still the same generation that scheduled this task.
async fn expire_after(inner: Weak<Mutex<Inner>>, key: String, generation: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
    let matches = guard
        .entries
        .get(&key)
        .is_some_and(|entry| entry.generation == generation);
    if matches {
        guard.entries.remove(&key);
        tracing::debug!(key = %key, "cache entry expired");
    }
}
