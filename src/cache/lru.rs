//! Bounded LRU/TTL Store
//!
//! The in-process L1 tier. Entries live in an `IndexMap` for lookup and are
//! threaded on a doubly-linked recency list by slot index (head = least
//! recently used, tail = most recently used). Removal swaps the last slot
//! into the hole and relinks it, so get, set, delete and eviction are O(1).
//! Map and list are one structure guarded by one mutex, so lookup, recency
//! refresh and eviction are atomic together.

use crate::cache::entry::CacheEntry;
use crate::cache::metrics::CacheMetrics;
use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Store State
// =============================================================================

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    /// Next older slot
    prev: Option<usize>,
    /// Next newer slot
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct LruState {
    /// Entries by key; map order is not recency order
    entries: IndexMap<String, Slot>,
    /// Least recently used slot
    head: Option<usize>,
    /// Most recently used slot
    tail: Option<usize>,
    /// Sum of estimated entry sizes
    total_bytes: u64,
}

impl LruState {
    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = &self.entries[index];
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
    }

    fn link_newest(&mut self, index: usize) {
        let old_tail = self.tail;
        {
            let slot = &mut self.entries[index];
            slot.prev = old_tail;
            slot.next = None;
        }
        match old_tail {
            Some(t) => self.entries[t].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    /// Mark a slot most recently used
    fn touch(&mut self, index: usize) {
        if self.tail != Some(index) {
            self.unlink(index);
            self.link_newest(index);
        }
    }

    fn remove_index(&mut self, index: usize) -> Option<CacheEntry> {
        if index >= self.entries.len() {
            return None;
        }
        self.unlink(index);

        let (_, slot) = self.entries.swap_remove_index(index)?;

        // the former last slot now lives at `index`; repoint its neighbours
        if index < self.entries.len() {
            let (prev, next) = {
                let moved = &self.entries[index];
                (moved.prev, moved.next)
            };
            match prev {
                Some(p) => self.entries[p].next = Some(index),
                None => self.head = Some(index),
            }
            match next {
                Some(n) => self.entries[n].prev = Some(index),
                None => self.tail = Some(index),
            }
        }

        self.total_bytes = self.total_bytes.saturating_sub(slot.entry.estimated_size());
        Some(slot.entry)
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let index = self.entries.get_index_of(key)?;
        self.remove_index(index)
    }

    fn pop_oldest(&mut self) -> Option<CacheEntry> {
        let head = self.head?;
        self.remove_index(head)
    }

    /// Insert a key not currently held as the newest entry
    fn push_newest(&mut self, entry: CacheEntry) {
        self.total_bytes += entry.estimated_size();
        let slot = Slot {
            entry,
            prev: None,
            next: None,
        };
        let (index, _) = self.entries.insert_full(slot.entry.key.clone(), slot);
        self.link_newest(index);
    }

    /// Remove every entry for which `doomed` holds, returning them
    fn remove_where(&mut self, mut doomed: impl FnMut(&CacheEntry) -> bool) -> Vec<CacheEntry> {
        let indices: Vec<usize> = self
            .entries
            .values()
            .enumerate()
            .filter_map(|(i, slot)| doomed(&slot.entry).then_some(i))
            .collect();

        // highest first, so a swapped-in slot is never one still pending
        indices
            .into_iter()
            .rev()
            .filter_map(|i| self.remove_index(i))
            .collect()
    }

    fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.head = None;
        self.tail = None;
        self.total_bytes = 0;
        count
    }

    /// Keys from least to most recently used
    fn keys_by_recency(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.entries.len());
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &self.entries[index];
            keys.push(slot.entry.key.clone());
            cursor = slot.next;
        }
        keys
    }
}

// =============================================================================
// LRU/TTL Store
// =============================================================================

/// Fixed-capacity store with strict LRU eviction and per-entry TTL
#[derive(Debug)]
pub struct LruTtlStore {
    state: Mutex<LruState>,
    capacity: usize,
    default_ttl: Duration,
    metrics: Arc<CacheMetrics>,
}

impl LruTtlStore {
    /// Create a store; capacity is validated by `CacheConfig`
    pub fn new(capacity: usize, default_ttl: Duration, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            capacity: capacity.max(1),
            default_ttl,
            metrics,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry, refreshing its recency
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let index = state.entries.get_index_of(key)?;
        if state.entries[index].entry.is_expired_at(now) {
            state.remove_index(index);
            self.metrics.record_expirations(1);
            return None;
        }

        state.touch(index);
        let entry = &mut state.entries[index].entry;
        entry.record_access(now);
        Some(entry.value.clone())
    }

    /// Whether a live entry exists; does not refresh recency
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired_at(now))
    }

    /// Insert or replace an entry, making it the most recently used
    ///
    /// Inserting a new key at capacity evicts exactly one entry, the least
    /// recently used. Returns the evicted key, if any.
    pub fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Option<String> {
        let entry = CacheEntry::new(key, value, ttl.unwrap_or(self.default_ttl));
        let mut state = self.state.lock();

        let mut evicted = None;
        if state.remove(key).is_none() && state.entries.len() >= self.capacity {
            if let Some(oldest) = state.pop_oldest() {
                self.metrics.record_eviction();
                evicted = Some(oldest.key);
            }
        }

        state.push_newest(entry);
        evicted
    }

    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Drop every entry; returns how many were held
    pub fn clear(&self) -> usize {
        self.state.lock().clear()
    }

    /// Drop every entry whose key matches `pattern`
    pub fn clear_matching(&self, pattern: &glob::Pattern) -> usize {
        self.state
            .lock()
            .remove_where(|entry| pattern.matches(&entry.key))
            .len()
    }

    /// Remove every expired entry; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self
            .state
            .lock()
            .remove_where(|entry| entry.is_expired_at(now))
            .len();
        if removed > 0 {
            self.metrics.record_expirations(removed as u64);
        }
        removed
    }

    /// Entry count (may include expired entries not yet swept)
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated memory held (keys + values)
    pub fn estimated_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    /// Keys in recency order, least recent first
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().keys_by_recency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn store(capacity: usize) -> (LruTtlStore, Arc<CacheMetrics>) {
        let metrics = Arc::new(CacheMetrics::new());
        (
            LruTtlStore::new(capacity, Duration::from_secs(60), metrics.clone()),
            metrics,
        )
    }

    fn val(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_eviction_of_first_inserted() {
        let (store, metrics) = store(3);
        store.set("a", val("1"), None);
        store.set("b", val("2"), None);
        store.set("c", val("3"), None);

        let evicted = store.set("d", val("4"), None);
        assert_eq!(evicted.as_deref(), Some("a"));
        assert_eq!(store.len(), 3);
        assert!(store.get("a").is_none());
        assert_eq!(metrics.evictions.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_access_refreshes_recency() {
        let (store, _) = store(3);
        store.set("a", val("1"), None);
        store.set("b", val("2"), None);
        store.set("c", val("3"), None);

        // a becomes hot, b is now the least recently used
        assert_eq!(store.get("a"), Some(val("1")));
        store.set("d", val("4"), None);

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert_eq!(store.keys(), vec!["c", "a", "d"]);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let (store, metrics) = store(2);
        store.set("a", val("1"), None);
        store.set("b", val("2"), None);
        assert!(store.set("a", val("updated"), None).is_none());

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a"), Some(val("updated")));
        assert_eq!(metrics.evictions.load(Ordering::Relaxed), 0);
        // a was refreshed by the overwrite, b is next out
        assert_eq!(store.set("c", val("3"), None).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let (store, _) = store(10);
        for i in 0..100 {
            store.set(&format!("k{}", i), val("v"), None);
            assert!(store.len() <= 10);
        }
        assert_eq!(store.keys().first().map(String::as_str), Some("k90"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_lazy_expiry() {
        let (store, metrics) = store(10);
        store.set("short", val("v"), Some(Duration::from_millis(100)));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(store.get("short"), Some(val("v")));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(store.get("short").is_none());
        assert!(store.is_empty());
        assert_eq!(metrics.expirations.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let (store, _) = store(10);
        store.set("short", val("v"), Some(Duration::from_millis(10)));
        store.set("long", val("v"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.keys(), vec!["long"]);
    }

    #[tokio::test]
    async fn test_recency_order_survives_removals() {
        let (store, _) = store(5);
        for key in ["a", "b", "c", "d", "e"] {
            store.set(key, val("v"), None);
        }

        // removing from the middle swaps the last slot into the hole
        assert!(store.delete("b"));
        assert!(store.get("a").is_some());
        assert!(store.delete("d"));
        assert!(store.get("c").is_some());
        assert_eq!(store.keys(), vec!["e", "a", "c"]);

        store.set("f", val("v"), None);
        store.set("g", val("v"), None);
        assert_eq!(store.set("h", val("v"), None).as_deref(), Some("e"));
        assert_eq!(store.set("i", val("v"), None).as_deref(), Some("a"));
        assert_eq!(store.keys(), vec!["c", "f", "g", "h", "i"]);
        assert_eq!(store.estimated_bytes(), 5 * 2);
    }

    #[tokio::test]
    async fn test_clear_matching_and_bytes() {
        let (store, _) = store(10);
        store.set("alpha:search:x", val("12345"), None);
        store.set("alpha:item:1", val("12345"), None);
        store.set("beta:search:x", val("12345"), None);
        let total = store.estimated_bytes();
        assert_eq!(total, (14 + 5) + (12 + 5) + (13 + 5));

        let pattern = glob::Pattern::new("alpha:*").unwrap();
        assert_eq!(store.clear_matching(&pattern), 2);
        assert_eq!(store.keys(), vec!["beta:search:x"]);
        assert_eq!(store.estimated_bytes(), 13 + 5);

        assert_eq!(store.clear(), 1);
        assert_eq!(store.estimated_bytes(), 0);
        assert!(store.keys().is_empty());

        store.set("alpha:search:y", val("1"), None);
        assert_eq!(store.keys(), vec!["alpha:search:y"]);
    }
}
