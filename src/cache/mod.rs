//! Injected TTL + LRU cache.
//!
//! Used for the adapter-instance cache (keyed by `(provider, model)`) and
//! the validation cache (keyed by a content hash of the graph). Readers
//! share a read lock and get a cloned snapshot; writers take the write
//! lock and the last writer for a key wins. Entries expire after `ttl`;
//! when full, the least recently read entry is evicted. `reset()` clears
//! everything so tests can isolate state.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::warn;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: AtomicU64,
}

/// Concurrency-safe TTL + LRU cache.
pub struct TtlLruCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    capacity: usize,
    ttl: Duration,
    clock: AtomicU64,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Read a snapshot of the value, if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        entry.last_access.store(self.tick(), Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Insert or replace a value.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let ttl = self.ttl;
        entries.retain(|_, e| e.inserted_at.elapsed() < ttl);

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let lru = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(lru) = lru {
                entries.remove(&lru);
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                last_access: AtomicU64::new(self.tick()),
            },
        );
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .values()
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .count()
    }

    /// True when no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn reset(&self) {
        match self.entries.write() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// SHA-256 of a value's canonical JSON, hex-encoded (first 16 bytes).
///
/// Returns `None` when the value cannot be serialized.
pub fn content_hash<T: Serialize>(value: &T) -> Option<String> {
    let bytes = serde_json::to_vec(value).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    Some(hex::encode(&digest[..16]))
}
