//! Response cache
//!
//! In-memory, TTL-bounded cache of serialised workload results keyed by
//! [`cache_key`].
//!
//! - An entry is valid iff `now < written_at + ttl`. Expired entries read as
//!   absent and are removed on that read.
//! - When full, inserting a new key evicts the oldest entry by insertion
//!   order (FIFO, not LRU). Overwriting a key moves it to the back.
//! - `max_entries == 0` disables the size bound.
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use tokio_edge_router::CacheLayer;
//!
//! let cache = CacheLayer::new(1000);
//! cache.set("compute:00ff", "{\"value\":3}".to_string(), Duration::from_secs(60));
//! assert!(cache.get("compute:00ff").is_some());
//! ```

use crate::request::Workload;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry with expiration
#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
    seq: u64,
}

/// FIFO + TTL cache. Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct CacheLayer {
    inner: Arc<MemoryCache>,
}

struct MemoryCache {
    store: DashMap<String, CacheEntry>,
    /// Insertion order. May hold stale `(key, seq)` pairs for keys that were
    /// since overwritten, deleted or expired; those are skipped on eviction.
    order: Mutex<VecDeque<(String, u64)>>,
    next_seq: AtomicU64,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("entries", &self.inner.store.len())
            .field("max_entries", &self.inner.max_entries)
            .finish()
    }
}

impl CacheLayer {
    /// Create a cache holding at most `max_entries` entries (`0` = unbounded).
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(MemoryCache {
                store: DashMap::new(),
                order: Mutex::new(VecDeque::new()),
                next_seq: AtomicU64::new(0),
                max_entries,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Get cached value if it exists and has not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let cache = &self.inner;
        if let Some(entry) = cache.store.get(key) {
            if Instant::now() < entry.expires_at {
                cache.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "cache hit");
                return Some(entry.value.clone());
            }
            // Release the shard guard before removing.
            drop(entry);
            cache
                .store
                .remove_if(key, |_, e| Instant::now() >= e.expires_at);
            debug!(key = key, "cache expired");
        }
        cache.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "cache miss");
        None
    }

    /// Insert or overwrite `key` with a time-to-live of `ttl`.
    pub fn set(&self, key: impl Into<String>, value: String, ttl: Duration) {
        let key = key.into();
        let cache = &self.inner;
        // Writers serialise on the order queue so FIFO order matches the
        // order entries become visible.
        let mut order = cache.order.lock();

        if cache.max_entries > 0
            && !cache.store.contains_key(&key)
            && cache.store.len() >= cache.max_entries
        {
            while let Some((oldest, seq)) = order.pop_front() {
                if cache.store.remove_if(&oldest, |_, e| e.seq == seq).is_some() {
                    cache.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %oldest, "cache evicted oldest entry");
                    break;
                }
            }
        }

        let seq = cache.next_seq.fetch_add(1, Ordering::Relaxed);
        cache.store.insert(
            key.clone(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                seq,
            },
        );
        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "cached");
        order.push_back((key, seq));

        // Drop stale queue entries once they dominate.
        if order.len() > 2 * cache.store.len().max(16) {
            order.retain(|(k, s)| cache.store.get(k).is_some_and(|e| e.seq == *s));
        }
    }

    /// Delete a cached value. Returns `true` if the key was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.inner.store.remove(key).is_some();
        debug!(key = key, removed, "deleted from cache");
        removed
    }

    /// Remove every entry. Hit/miss counters are kept.
    pub fn clear(&self) {
        let mut order = self.inner.order.lock();
        self.inner.store.clear();
        order.clear();
        debug!("cleared cache");
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.store.len();
        self.inner.store.retain(|_, e| now < e.expires_at);
        before.saturating_sub(self.inner.store.len())
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.inner.store.len(),
            max_entries: self.inner.max_entries,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, including expired ones not yet read.
    pub entries: usize,
    /// Size bound (`0` = unbounded).
    pub max_entries: usize,
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that returned nothing.
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before the first lookup.
    pub hit_rate: f64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

/// Generate a cache key for a workload: `{kind}:{hash}`.
///
/// Equal workloads always map to the same key within a build.
pub fn cache_key(workload: &Workload) -> String {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher = DefaultHasher::new();
    match serde_json::to_vec(workload) {
        Ok(bytes) => bytes.hash(&mut hasher),
        Err(_) => format!("{workload:?}").hash(&mut hasher),
    }
    format!("{}:{:016x}", workload.kind(), hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ComputeOp, StorageOp};

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_memory_cache() {
        let cache = CacheLayer::new(10);

        cache.set("key1", "value1".into(), HOUR);
        assert_eq!(cache.get("key1"), Some("value1".to_string()));
        assert_eq!(cache.get("key2"), None);

        assert!(cache.delete("key1"));
        assert_eq!(cache.get("key1"), None);
        assert!(!cache.delete("key1"));
    }

    #[tokio::test]
    async fn test_cache_expiration_removes_on_read() {
        let cache = CacheLayer::new(10);
        cache.set("expire", "value".into(), Duration::from_millis(20));
        assert_eq!(cache.get("expire"), Some("value".to_string()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get("expire"), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_zero_ttl_is_never_valid() {
        let cache = CacheLayer::new(10);
        cache.set("k", "v".into(), Duration::ZERO);
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_fifo_eviction_drops_oldest_insert() {
        let cache = CacheLayer::new(3);
        cache.set("a", "1".into(), HOUR);
        cache.set("b", "2".into(), HOUR);
        cache.set("c", "3".into(), HOUR);
        // Reading "a" does not refresh it: FIFO, not LRU.
        assert!(cache.get("a").is_some());

        cache.set("d", "4".into(), HOUR);
        assert_eq!(cache.stats().entries, 3);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_moves_key_to_back_without_evicting() {
        let cache = CacheLayer::new(2);
        cache.set("a", "1".into(), HOUR);
        cache.set("b", "2".into(), HOUR);
        cache.set("a", "1b".into(), HOUR);
        assert_eq!(cache.stats().evictions, 0);

        cache.set("c", "3".into(), HOUR);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1b".to_string()));
    }

    #[test]
    fn test_deleted_key_is_skipped_by_eviction() {
        let cache = CacheLayer::new(2);
        cache.set("a", "1".into(), HOUR);
        cache.set("b", "2".into(), HOUR);
        cache.delete("a");
        cache.set("c", "3".into(), HOUR);
        // Room was freed by the delete; nothing evicted.
        assert_eq!(cache.stats().evictions, 0);
        cache.set("d", "4".into(), HOUR);
        assert_eq!(cache.get("b"), None);
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_unbounded_when_max_entries_zero() {
        let cache = CacheLayer::new(0);
        for i in 0..100 {
            cache.set(format!("k{i}"), "v".into(), HOUR);
        }
        assert_eq!(cache.stats().entries, 100);
    }

    #[test]
    fn test_order_queue_compacts_under_overwrites() {
        let cache = CacheLayer::new(4);
        for _ in 0..500 {
            cache.set("same", "v".into(), HOUR);
        }
        assert!(cache.inner.order.lock().len() <= 32);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_hit_rate() {
        let cache = CacheLayer::new(10);
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.set("k", "v".into(), HOUR);
        let _ = cache.get("k");
        let _ = cache.get("missing");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_and_purge() {
        let cache = CacheLayer::new(10);
        cache.set("live", "v".into(), HOUR);
        cache.set("dead", "v".into(), Duration::ZERO);
        assert_eq!(cache.purge_expired(), 1);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_concurrent_access_respects_bound() {
        let cache = CacheLayer::new(100);
        let mut handles = Vec::new();
        for i in 0..10 {
            let c = cache.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    c.set(format!("task-{i}-key-{j}"), format!("{i}-{j}"), HOUR);
                    let _ = c.get(&format!("task-{i}-key-{j}"));
                }
            }));
        }
        for h in handles {
            h.await.unwrap_or(());
        }
        assert!(cache.stats().entries <= 100);
    }

    #[test]
    fn test_cache_key_generation() {
        let sum = |operands: Vec<f64>| Workload::Compute {
            operation: ComputeOp::Sum,
            operands,
        };
        let k1 = cache_key(&sum(vec![1.0, 2.0]));
        let k2 = cache_key(&sum(vec![1.0, 2.0]));
        let k3 = cache_key(&sum(vec![2.0, 1.0]));
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert!(k1.starts_with("compute:"));

        let get = cache_key(&Workload::Storage {
            operation: StorageOp::Get,
            key: "a".into(),
            value: None,
        });
        assert!(get.starts_with("storage:"));
    }
}
