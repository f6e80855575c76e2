//! Keyed free lists for allocation reuse.
//!
//! This module provides [`FreeList<K, V>`], a pool of idle values grouped by a
//! key. Values are parked with [`put`](FreeList::put) when no longer in use and
//! handed out again by [`take`](FreeList::take) to the next request with an
//! equal key, instead of being destroyed and recreated.
//!
//! # Motivation
//!
//! In frame-based rendering, the intermediate resources of a compiled graph are
//! rebuilt whenever the graph changes. Most of the new resources have exactly
//! the same shape as the old ones, so recycling them by descriptor avoids a
//! round trip through the backing allocator.
//!
//! # Example
//!
//! ```
//! use passgraph_core::pool::FreeList;
//!
//! let mut pool = FreeList::<&str, u32>::new();
//! pool.put("rgba8_1080p", 7);
//! pool.put("rgba8_1080p", 9);
//!
//! // Most recently released value first
//! assert_eq!(pool.take(&"rgba8_1080p"), Some(9));
//! assert_eq!(pool.take(&"depth_1080p"), None);
//! assert_eq!(pool.len(), 1);
//! ```

use std::collections::HashMap;
use std::hash::Hash;

/// A pool of idle values grouped by key.
///
/// Lookups are exact: a value parked under `k` is only returned for a request
/// with a key equal to `k`. Within a key, values are returned in LIFO order.
#[derive(Debug)]
pub struct FreeList<K, V> {
    buckets: HashMap<K, Vec<V>>,
    len: usize,
}

impl<K: Eq + Hash, V> FreeList<K, V> {
    /// Create an empty free list.
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            len: 0,
        }
    }

    /// Park an idle value under `key`.
    pub fn put(&mut self, key: K, value: V) {
        self.buckets.entry(key).or_default().push(value);
        self.len += 1;
    }

    /// Take an idle value parked under `key`, if any.
    pub fn take(&mut self, key: &K) -> Option<V> {
        let bucket = self.buckets.get_mut(key)?;
        let value = bucket.pop()?;
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        self.len -= 1;
        Some(value)
    }

    /// Total number of idle values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the free list holds no values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every parked value, returning them with their keys.
    ///
    /// The order of the returned pairs is unspecified.
    pub fn drain(&mut self) -> Vec<(K, V)>
    where
        K: Clone,
    {
        let mut drained = Vec::with_capacity(self.len);
        for (key, values) in self.buckets.drain() {
            for value in values {
                drained.push((key.clone(), value));
            }
        }
        self.len = 0;
        drained
    }
}

impl<K: Eq + Hash, V> Default for FreeList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
