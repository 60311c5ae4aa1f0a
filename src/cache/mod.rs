//! Bounded LRU cache with an optional eviction callback.
//!
//! Entries live in a slab of intrusively linked nodes; a `HashMap` maps
//! keys to slab slots, so every operation is O(1). Recency order runs
//! from `lru` (next to evict) to `mru` (most recently touched). `get`,
//! `put` on an existing key, and `touch` move the entry to the MRU end;
//! `peek` and `contains_key` never disturb the order.
//!
//! When an insert pushes the cache past capacity the LRU entry is
//! unlinked under the lock, then the eviction callback runs with the
//! evicted pair *after* the lock is released. A callback may therefore
//! re-enter the cache without deadlocking; how its effects interleave
//! with concurrent writers is unspecified.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;

use serde::Deserialize;

const NIL: usize = usize::MAX;

/// Called with each entry evicted for capacity. Not invoked by `remove`
/// or `clear`.
pub type EvictionCallback<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

/// Cache sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries. Must be at least 1.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1_024 }
    }
}

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    /// Key -> slab slot.
    index: HashMap<K, usize>,
    /// Slot storage; `None` slots are on the free list.
    slab: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Next to evict. NIL when empty.
    lru: usize,
    /// Most recently used. NIL when empty.
    mru: usize,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slab: Vec::with_capacity(capacity),
            free: Vec::new(),
            lru: NIL,
            mru: NIL,
        }
    }

    fn entry(&self, slot: usize) -> &Entry<K, V> {
        self.slab[slot].as_ref().expect("occupied slot")
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry<K, V> {
        self.slab[slot].as_mut().expect("occupied slot")
    }

    /// Detaches `slot` from the recency list without freeing it.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = self.entry(slot);
            (entry.prev, entry.next)
        };
        if prev == NIL {
            self.lru = next;
        } else {
            self.entry_mut(prev).next = next;
        }
        if next == NIL {
            self.mru = prev;
        } else {
            self.entry_mut(next).prev = prev;
        }
    }

    /// Appends `slot` at the MRU end.
    fn push_mru(&mut self, slot: usize) {
        let old_mru = self.mru;
        {
            let entry = self.entry_mut(slot);
            entry.prev = old_mru;
            entry.next = NIL;
        }
        if old_mru == NIL {
            self.lru = slot;
        } else {
            self.entry_mut(old_mru).next = slot;
        }
        self.mru = slot;
    }

    fn touch(&mut self, slot: usize) {
        if self.mru != slot {
            self.unlink(slot);
            self.push_mru(slot);
        }
    }

    fn allocate(&mut self, entry: Entry<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slab[slot] = Some(entry);
                slot
            }
            None => {
                self.slab.push(Some(entry));
                self.slab.len() - 1
            }
        }
    }

    /// Removes the LRU entry entirely, returning its pair.
    fn pop_lru(&mut self) -> Option<(K, V)> {
        let slot = self.lru;
        if slot == NIL {
            return None;
        }
        self.unlink(slot);
        let entry = self.slab[slot].take().expect("occupied slot");
        self.free.push(slot);
        self.index.remove(&entry.key);
        Some((entry.key, entry.value))
    }

    fn remove_slot(&mut self, slot: usize) -> (K, V) {
        self.unlink(slot);
        let entry = self.slab[slot].take().expect("occupied slot");
        self.free.push(slot);
        self.index.remove(&entry.key);
        (entry.key, entry.value)
    }
}

/// Thread-safe bounded map with least-recently-used eviction.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
    on_evict: Option<EvictionCallback<K, V>>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Builds a cache holding at most `capacity` entries.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be >= 1");
        Self {
            capacity,
            inner: Mutex::new(Inner::with_capacity(capacity)),
            on_evict: None,
        }
    }

    /// Like [`new`](LruCache::new), with a callback receiving each entry
    /// evicted for capacity.
    pub fn with_eviction_callback(
        capacity: usize,
        on_evict: impl Fn(K, V) + Send + Sync + 'static,
    ) -> Self {
        assert!(capacity > 0, "cache capacity must be >= 1");
        Self {
            capacity,
            inner: Mutex::new(Inner::with_capacity(capacity)),
            on_evict: Some(Box::new(on_evict)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts or replaces. Returns the previous value for the key, if
    /// any. May evict the LRU entry; the callback runs after the cache
    /// lock is released.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let (previous, evicted) = {
            let mut inner = self.lock();
            if let Some(&slot) = inner.index.get(&key) {
                let old = std::mem::replace(&mut inner.entry_mut(slot).value, value);
                inner.touch(slot);
                (Some(old), None)
            } else {
                let slot = inner.allocate(Entry {
                    key: key.clone(),
                    value,
                    prev: NIL,
                    next: NIL,
                });
                inner.index.insert(key, slot);
                inner.push_mru(slot);
                let evicted = if inner.index.len() > self.capacity {
                    inner.pop_lru()
                } else {
                    None
                };
                (None, evicted)
            }
        };
        if let (Some((key, value)), Some(callback)) = (evicted, self.on_evict.as_ref()) {
            callback(key, value);
        }
        previous
    }

    /// Looks up and marks the entry most recently used.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.lock();
        let slot = *inner.index.get(key)?;
        inner.touch(slot);
        Some(inner.entry(slot).value.clone())
    }

    /// Looks up without disturbing recency order.
    pub fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.lock();
        let slot = *inner.index.get(key)?;
        Some(inner.entry(slot).value.clone())
    }

    /// Marks the entry most recently used without cloning the value.
    /// Returns whether the key was present.
    pub fn touch(&self, key: &K) -> bool {
        let mut inner = self.lock();
        match inner.index.get(key) {
            Some(&slot) => {
                inner.touch(slot);
                true
            }
            None => false,
        }
    }

    /// Recency order is untouched.
    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().index.contains_key(key)
    }

    /// Removes and returns the entry. The eviction callback does not run.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let slot = *inner.index.get(key)?;
        let (_key, value) = inner.remove_slot(slot);
        Some(value)
    }

    /// Drops every entry. The eviction callback does not run.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.index.clear();
        inner.slab.clear();
        inner.free.clear();
        inner.lru = NIL;
        inner.mru = NIL;
    }

    /// Keys from least to most recently used. Snapshot for diagnostics
    /// and tests; O(len).
    pub fn keys_by_recency(&self) -> Vec<K> {
        let inner = self.lock();
        let mut keys = Vec::with_capacity(inner.index.len());
        let mut slot = inner.lru;
        while slot != NIL {
            let entry = inner.entry(slot);
            keys.push(entry.key.clone());
            slot = entry.next;
        }
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: Eq + Hash + Clone, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn put_get_peek_roundtrip() {
        let cache = LruCache::new(4);
        assert_eq!(cache.put("a", 1), None);
        assert_eq!(cache.put("a", 2), Some(1));
        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.peek(&"a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        // put a, put b, get a, put c with capacity 2 => b evicted.
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&evicted);
        let cache = LruCache::with_eviction_callback(2, move |k: &'static str, v: i32| {
            log.lock().unwrap().push((k, v));
        });
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);

        assert_eq!(*evicted.lock().unwrap(), vec![("b", 2)]);
        assert!(cache.contains_key(&"a"));
        assert!(!cache.contains_key(&"b"));
        assert!(cache.contains_key(&"c"));
        assert_eq!(cache.keys_by_recency(), vec!["a", "c"]);
    }

    #[test]
    fn peek_and_contains_do_not_disturb_order() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.peek(&"a"), Some(1));
        assert!(cache.contains_key(&"a"));
        cache.put("c", 3);
        // "a" was only peeked, so it is still the eviction victim.
        assert!(!cache.contains_key(&"a"));
    }

    #[test]
    fn replacing_a_value_never_evicts() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&evictions);
        let cache = LruCache::with_eviction_callback(2, move |_: u32, _: u32| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        cache.put(1, 10);
        cache.put(2, 20);
        cache.put(1, 11);
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some(11));
    }

    #[test]
    fn remove_and_clear_skip_the_callback() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&evictions);
        let cache = LruCache::with_eviction_callback(4, move |_: u32, _: u32| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        cache.put(1, 10);
        cache.put(2, 20);
        assert_eq!(cache.remove(&1), Some(10));
        cache.clear();
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_callback_may_reenter_the_cache() {
        struct Hook(std::sync::OnceLock<Arc<LruCache<u32, u32>>>);
        let hook = Arc::new(Hook(std::sync::OnceLock::new()));
        let hook2 = Arc::clone(&hook);
        let reentered = Arc::new(AtomicUsize::new(0));
        let gate = Arc::clone(&reentered);
        let cache = Arc::new(LruCache::with_eviction_callback(2, move |k: u32, v: u32| {
            // Re-enter exactly once; cascading evictions just count.
            if gate.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(cache) = hook2.0.get() {
                    // Re-entry must not deadlock.
                    let _ = cache.peek(&k);
                    let _ = cache.put(k + 100, v);
                }
            }
        }));
        hook.0.set(Arc::clone(&cache)).ok();

        cache.put(1, 10);
        cache.put(2, 20);
        cache.put(3, 30);
        assert!(cache.contains_key(&101));
        assert!(reentered.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn slots_are_recycled_after_removal() {
        let cache = LruCache::new(2);
        for round in 0..100u32 {
            cache.put(round, round);
        }
        assert_eq!(cache.len(), 2);
        // Slab never grows past capacity + 1 in-flight insert.
        assert!(cache.lock().slab.len() <= 3);
    }

    // Model check: drive the cache and a naive Vec-based LRU with the
    // same operations and compare observable state.
    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, u16),
        Get(u8),
        Peek(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<u16>()).prop_map(|(k, v)| Op::Put(k % 16, v)),
            any::<u8>().prop_map(|k| Op::Get(k % 16)),
            any::<u8>().prop_map(|k| Op::Peek(k % 16)),
            any::<u8>().prop_map(|k| Op::Remove(k % 16)),
        ]
    }

    struct Model {
        capacity: usize,
        // LRU first, MRU last.
        entries: Vec<(u8, u16)>,
    }

    impl Model {
        fn apply(&mut self, op: &Op) -> Option<u16> {
            match *op {
                Op::Put(k, v) => {
                    if let Some(pos) = self.entries.iter().position(|e| e.0 == k) {
                        let old = self.entries.remove(pos);
                        self.entries.push((k, v));
                        Some(old.1)
                    } else {
                        self.entries.push((k, v));
                        if self.entries.len() > self.capacity {
                            self.entries.remove(0);
                        }
                        None
                    }
                }
                Op::Get(k) => {
                    let pos = self.entries.iter().position(|e| e.0 == k)?;
                    let entry = self.entries.remove(pos);
                    self.entries.push(entry);
                    Some(entry.1)
                }
                Op::Peek(k) => self.entries.iter().find(|e| e.0 == k).map(|e| e.1),
                Op::Remove(k) => {
                    let pos = self.entries.iter().position(|e| e.0 == k)?;
                    Some(self.entries.remove(pos).1)
                }
            }
        }
    }

    proptest! {
        #[test]
        fn matches_naive_model(ops in proptest::collection::vec(op_strategy(), 1..200)) {
            let cache = LruCache::new(4);
            let mut model = Model { capacity: 4, entries: Vec::new() };
            for op in &ops {
                let expected = model.apply(op);
                let actual = match *op {
                    Op::Put(k, v) => cache.put(k, v),
                    Op::Get(k) => cache.get(&k),
                    Op::Peek(k) => cache.peek(&k),
                    Op::Remove(k) => cache.remove(&k),
                };
                prop_assert_eq!(actual, expected);
                prop_assert_eq!(cache.len(), model.entries.len());
                let expected_order: Vec<u8> = model.entries.iter().map(|e| e.0).collect();
                prop_assert_eq!(cache.keys_by_recency(), expected_order);
            }
        }
    }
}
