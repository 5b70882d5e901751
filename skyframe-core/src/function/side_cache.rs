//! Side Cache
//!
//! Functions are re-invoked from the top after every restart, so work done
//! before the first missing dependency is repeated. A function that does
//! expensive work up front keeps it in a `SideCache` owned by the function
//! and keyed by the node's key:
//!
//! ```rust,ignore
//! let parsed = self.cache.get_or_insert_with(key, || parse(source));
//! let deps = env.get_values(&parsed.imports);
//! if env.values_missing() {
//!     return Ok(env.restart());
//! }
//! self.cache.invalidate(key); // done; free the partial state
//! ```
//!
//! The engine never touches the cache. The owning function drops entries in
//! [`Function::on_node_dirtied`](super::Function::on_node_dirtied) so that a
//! changed input is never answered from stale partial work.
//!
//! # Bounding
//!
//! The cache holds at most `capacity` entries. Inserting past that evicts the
//! oldest insertion. Eviction is always safe: the next restart simply redoes
//! the work.

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::EvaluatorConfig;
use crate::key::Key;

/// Bounded, explicitly invalidated, key-addressed cache for function-local
/// partial results.
#[derive(Debug)]
pub struct SideCache<V> {
    capacity: usize,
    entries: Mutex<IndexMap<Key, V>>,
}

impl<V: Clone> SideCache<V> {
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Create a cache sized by `side_cache_capacity`.
    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self::new(config.side_cache_capacity)
    }

    /// Get a clone of the entry for `key`.
    pub fn get(&self, key: &Key) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert or replace the entry for `key`.
    pub fn insert(&self, key: Key, value: V) {
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        entries.insert(key, value);
        while entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
    }

    /// Return the entry for `key`, computing and storing it if absent.
    ///
    /// `compute` runs without the lock held, so two racing callers may both
    /// compute; the later insert wins.
    pub fn get_or_insert_with<F>(&self, key: &Key, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        self.insert(key.clone(), value.clone());
        value
    }

    /// Drop the entry for `key`, returning it.
    pub fn invalidate(&self, key: &Key) -> Option<V> {
        self.entries.lock().shift_remove(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
