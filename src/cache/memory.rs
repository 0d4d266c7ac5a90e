//! In-memory cache tier with per-entry expiry.
//!
//! Entries expire lazily: an entry older than the TTL is evicted by the read
//! that notices it. Nothing in here ever fails a caller; lock poisoning is
//! logged and treated as a miss.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default lifetime of a memory entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Key/value store where every entry lives for a fixed TTL.
#[derive(Debug)]
pub struct TtlCache<V> {
    items: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a value under `key`, stamped with the current time.
    pub fn set(&self, key: &str, value: V) {
        if key.is_empty() {
            tracing::warn!("Attempted to cache a value under an empty key");
            return;
        }

        match self.items.lock() {
            Ok(mut items) => {
                items.insert(
                    key.to_string(),
                    CacheEntry {
                        value,
                        stored_at: Instant::now(),
                    },
                );
            }
            Err(e) => tracing::error!("Error setting cache value: {}", e),
        }
    }

    /// Get the value for `key` if it has not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        if key.is_empty() {
            tracing::warn!("Attempted to read cache with an empty key");
            return None;
        }

        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Error getting cache value: {}", e);
                return None;
            }
        };

        let expired = items.get(key)?.stored_at.elapsed() > self.ttl;
        if expired {
            items.remove(key);
            return None;
        }
        items.get(key).map(|entry| entry.value.clone())
    }

    /// Check whether a live entry exists for `key`.
    pub fn has(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }

        let Ok(mut items) = self.items.lock() else {
            return false;
        };
        match items.get(key) {
            Some(entry) if entry.stored_at.elapsed() > self.ttl => {
                items.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        match self.items.lock() {
            Ok(mut items) => items.clear(),
            Err(e) => tracing::error!("Error clearing cache: {}", e),
        }
    }

    /// Number of entries that have not expired.
    pub fn len(&self) -> usize {
        match self.items.lock() {
            Ok(items) => items
                .values()
                .filter(|entry| entry.stored_at.elapsed() <= self.ttl)
                .count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
