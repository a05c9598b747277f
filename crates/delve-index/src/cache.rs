//! Capacity-bounded TTL cache with least-recently-used eviction.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Keyed by hex digests. Expired entries are dropped on lookup and reported
/// as misses; when full, the entry used longest ago is evicted.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: LruCache<String, (Instant, V)>,
}

impl<V: Clone> TtlCache<V> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        let (inserted_at, value) = self.entries.get(key)?;
        if inserted_at.elapsed() < self.ttl {
            return Some(value.clone());
        }
        self.entries.pop(key);
        None
    }

    pub fn insert(&mut self, key: String, value: V) {
        self.entries.put(key, (Instant::now(), value));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hex blake3 digest over length-prefixed parts, so `("ab", "c")` and
/// `("a", "bc")` never collide.
#[must_use]
pub fn digest(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
