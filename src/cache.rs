//! LRU map with an optional entry-count bound

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// LRU cache with count-based eviction. `None` capacity never evicts.
pub struct LruCache<K: Hash + Eq + Clone, V: Clone> {
    capacity: Option<usize>,
    cache: HashMap<K, V>,
    order: VecDeque<K>,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity: capacity.map(|c| c.max(1)),
            cache: HashMap::new(),
            order: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(value) = self.cache.get(key).cloned() {
            self.move_to_front(key);
            self.stats.hits += 1;
            Some(value)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Insert `value`, evicting least recently used entries past capacity.
    /// Returns the evicted values.
    pub fn put(&mut self, key: K, value: V) -> Vec<V> {
        if self.cache.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
        }

        let mut evicted = Vec::new();
        if let Some(capacity) = self.capacity {
            while self.cache.len() >= capacity {
                match self.evict_lru() {
                    Some(value) => evicted.push(value),
                    None => break,
                }
            }
        }

        self.cache.insert(key.clone(), value);
        self.order.push_front(key);
        evicted
    }

    /// Drop every entry, returning the values.
    pub fn clear(&mut self) -> Vec<V> {
        self.order.clear();
        self.cache.drain().map(|(_, value)| value).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            ..self.stats.clone()
        }
    }

    fn evict_lru(&mut self) -> Option<V> {
        let key = self.order.pop_back()?;
        self.stats.evictions += 1;
        self.cache.remove(&key)
    }

    fn move_to_front(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_front(k);
            }
        }
    }
}

/// Cache statistics
#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}
