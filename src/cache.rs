//! Memoization of generated audio by compiled-prompt cache key.
//!
//! Bounded FIFO cache with batch eviction: at capacity the oldest 20% (by
//! insertion order) are dropped before the new entry goes in. No per-access
//! bookkeeping. Not thread-safe by contract: all access happens on the
//! session-owning control thread.

use std::collections::{HashMap, VecDeque};

use crate::audio::AudioHandle;

/// Default capacity in entries.
pub const DEFAULT_CAPACITY: usize = 100;

/// Fraction of entries dropped in one eviction batch.
const EVICTION_FRACTION: usize = 5; // 1/5 = oldest 20%

#[derive(Debug)]
pub struct GenerationCache {
    capacity: usize,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    entries: HashMap<String, AudioHandle>,
}

impl Default for GenerationCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl GenerationCache {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AudioHandle> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a handle. Re-putting an existing key replaces the value and
    /// keeps its original insertion-order position.
    pub fn put(&mut self, key: &str, handle: AudioHandle) {
        if let Some(existing) = self.entries.get_mut(key) {
            *existing = handle;
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_batch();
        }
        self.order.push_back(key.to_string());
        self.entries.insert(key.to_string(), handle);
    }

    fn evict_batch(&mut self) {
        let batch = (self.capacity / EVICTION_FRACTION).max(1);
        for _ in 0..batch {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        tracing::debug!(evicted = batch, remaining = self.entries.len(), "cache eviction batch");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(uri: &str) -> AudioHandle {
        AudioHandle {
            uri: uri.to_string(),
            duration_s: 20.0,
        }
    }

    #[test]
    fn get_put_roundtrip() {
        let mut cache = GenerationCache::with_capacity(10);
        assert!(cache.get("k").is_none());
        cache.put("k", handle("a"));
        assert_eq!(cache.get("k").unwrap().uri, "a");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn at_capacity_evicts_oldest_twenty_percent() {
        let mut cache = GenerationCache::with_capacity(10);
        for i in 0..10 {
            cache.put(&format!("k{i}"), handle(&format!("u{i}")));
        }
        assert_eq!(cache.len(), 10);

        cache.put("k10", handle("u10"));
        // Batch of 2 (10/5) evicted, then one inserted.
        assert_eq!(cache.len(), 9);
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k1").is_none());
        assert!(cache.get("k2").is_some());
        assert!(cache.get("k10").is_some());
    }

    #[test]
    fn tiny_capacity_evicts_at_least_one() {
        let mut cache = GenerationCache::with_capacity(2);
        cache.put("a", handle("a"));
        cache.put("b", handle("b"));
        cache.put("c", handle("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn reput_replaces_without_new_order_entry() {
        let mut cache = GenerationCache::with_capacity(3);
        cache.put("a", handle("a1"));
        cache.put("b", handle("b"));
        cache.put("a", handle("a2"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().uri, "a2");
        // "a" kept its original (oldest) position: next eviction drops it.
        cache.put("c", handle("c"));
        cache.put("d", handle("d"));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = GenerationCache::default();
        cache.put("a", handle("a"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }
}
