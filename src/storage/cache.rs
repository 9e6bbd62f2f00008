//! Cache Server - Bounded Key/Value Cache
//!
//! Cache-aside layer in front of the database set.
//!
//! # Design
//!
//! - Single `parking_lot::Mutex` around the backing store, never held across an await
//! - Strict insertion-order eviction: when a new key arrives at capacity the
//!   oldest inserted entry goes first. Reads do not refresh position, so this is
//!   LRU-like rather than true LRU.
//! - Overwriting a key keeps its original insertion position

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Default maximum number of entries
pub const DEFAULT_CACHE_MAX_SIZE: usize = 10_000;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_CACHE_MAX_SIZE,
        }
    }
}

#[derive(Default)]
struct CacheStore {
    /// key -> (insertion sequence, value)
    entries: HashMap<String, (u64, String)>,
    /// insertion sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

/// Capacity-bounded cache with hit/miss accounting
pub struct CacheServer {
    name: String,
    config: CacheConfig,
    store: Mutex<CacheStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheServer {
    /// Create a new cache with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CacheConfig::default())
    }

    /// Create a new cache with custom configuration
    pub fn with_config(name: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            config,
            store: Mutex::new(CacheStore::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a key, counting a hit or a miss
    pub fn get(&self, key: &str) -> Option<String> {
        let value = self
            .store
            .lock()
            .entries
            .get(key)
            .map(|(_, v)| v.clone());

        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Store a value unconditionally
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        let mut store = self.store.lock();

        if let Some(slot) = store.entries.get_mut(&key) {
            slot.1 = value;
            return;
        }

        if self.config.max_size == 0 {
            return;
        }

        if store.entries.len() >= self.config.max_size {
            if let Some((_, oldest)) = store.order.pop_first() {
                store.entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(cache = %self.name, key = %oldest, "evicted oldest entry");
            }
        }

        let seq = store.next_seq;
        store.next_seq += 1;
        store.order.insert(seq, key.clone());
        store.entries.insert(key, (seq, value));
    }

    /// Remove a key if present. Returns whether an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut store = self.store.lock();
        match store.entries.remove(key) {
            Some((seq, _)) => {
                store.order.remove(&seq);
                self.invalidations.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Check presence without touching hit/miss counters
    pub fn contains(&self, key: &str) -> bool {
        self.store.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// hits / (hits + misses), zero before any lookup
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut store = self.store.lock();
        store.entries.clear();
        store.order.clear();
    }

    /// Read-only snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            entries: self.len(),
            max_size: self.config.max_size,
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
            evictions: self.evictions(),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
    pub evictions: u64,
    pub invalidations: u64,
}

// =============================================================================
// Tests
// =============================================================================
