//! Bounded key/value cache with shared-value eviction protection.
//!
//! Values are handed out as `Arc` clones, so a renderer and the cache can
//! hold the same loaded object at the same time. Eviction is
//! least-recently-used-first, but an entry whose value still has external
//! holders is never removed; the size may therefore legitimately exceed
//! the capacity until those holders are dropped.
//!
//! The cache itself is not thread safe; owners wrap it in a lock.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

/// Fixed-capacity cache with LRU eviction.
pub struct BoundedCache<K, V> {
    entries: HashMap<K, Arc<V>>,
    /// Recency order, front = least recently used.
    recency: VecDeque<K>,
    capacity: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> BoundedCache<K, V> {
        BoundedCache {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            capacity,
        }
    }

    /// Look up a value, refreshing its recency on hit. A miss is not an
    /// error; the caller loads and calls `set`.
    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        if !self.entries.contains_key(key) {
            return None;
        }

        self.touch(key);
        self.entries.get(key).cloned()
    }

    /// Insert or replace a value, returning a shared handle to it.
    /// Inserting over capacity evicts the least recently used entries
    /// that have no external holders.
    pub fn set(&mut self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);

        if self.entries.insert(key.clone(), Arc::clone(&value)).is_some() {
            self.touch(&key);
        } else {
            self.recency.push_back(key);
        }

        self.strip();
        value
    }

    /// Change the capacity. Shrinking evicts immediately until the size
    /// fits or only externally-held entries remain.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.strip();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn touch(&mut self, key: &K) {
        self.recency.retain(|k| k != key);
        self.recency.push_back(key.clone());
    }

    /// Evict least-recently-used entries until the size fits the
    /// capacity. Entries whose value is shared with an external holder
    /// are skipped; if only such entries remain, the pass stops.
    fn strip(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self.recency.iter().position(|key| {
                self.entries
                    .get(key)
                    .map(|value| Arc::strong_count(value) == 1)
                    .unwrap_or(false)
            });

            match victim {
                Some(index) => {
                    let key = self.recency.remove(index).expect("victim index in range");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
