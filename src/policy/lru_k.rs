//! # LRU-K admission store (K=2 by default)
//!
//! Ordered associative store with a two-queue admission policy: keys start
//! in a **history** queue and are promoted to the **resident** queue once
//! they have been accessed K times. Eviction prefers the history queue, so
//! a one-shot scan competes only with other one-shot keys and cannot
//! displace the resident working set.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           LrukStore                                  │
//!   │                                                                      │
//!   │   FxHashMap<String, NonNull<Node>>  (index; each key in ONE queue)   │
//!   │                                                                      │
//!   │   History (seen < K times, MRU at front)                             │
//!   │   front ──► [k_f] ──► [k_e] ──► [k_d] ──► back   ◄── evicted first   │
//!   │                                                                      │
//!   │   Resident (seen ≥ K times, MRU at front)                            │
//!   │   front ──► [k_a] ──► [k_b] ──► [k_c] ──► back   ◄── evicted last    │
//!   │                                                                      │
//!   │   Node: { prev, next, tier, count, key, value }                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Promotion:  count reaches K  ──►  unlink from History, push Resident
//!   Bounds:     |History| ≤ max(1, max_entries / 2)
//!               |History| + |Resident| ≤ max_entries   (when max_entries > 0)
//!   Eviction:   History back first; Resident back only when History empty
//! ```
//!
//! ## Scan resistance
//!
//! A warm key with K accesses sits in the resident queue. A sequential scan
//! inserts each of its keys once, so every scan key lands in history and
//! falls off history's bounded back; the resident working set is untouched
//! until history is completely empty.
//!
//! ## Concurrency
//!
//! `LrukStore` is **not** thread-safe; it is always owned by a
//! [`CacheShard`](crate::shard::CacheShard) and accessed under its mutex.
//! The eviction callback runs while that lock is held and must not block.

use std::ptr::NonNull;

use rustc_hash::FxHashMap;

use crate::byteview::ByteView;

/// Callback invoked with `(key, value)` whenever an entry is removed for
/// any reason other than an in-place value replacement.
pub type EvictionCallback = Box<dyn FnMut(&str, &ByteView) + Send>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Tier {
    History,
    Resident,
}

/// Node in one of the two intrusive lists.
///
/// Linked-list pointers first for traversal locality; each node lives in
/// exactly one list at a time.
#[repr(C)]
struct Node {
    prev: Option<NonNull<Node>>,
    next: Option<NonNull<Node>>,
    tier: Tier,
    count: u32,
    key: String,
    value: ByteView,
}

/// LRU-K store over string keys and [`ByteView`] values.
///
/// A key must be observed `k` times (default 2) before it is treated as
/// resident. Entries with fewer than `k` accesses live in the history queue
/// and are evicted before any resident entry.
///
/// # Example
///
/// ```
/// use meshcache::policy::lru_k::LrukStore;
/// use meshcache::ByteView;
///
/// let mut store = LrukStore::new(8);
///
/// store.add("page", ByteView::from("contents"));
/// assert_eq!(store.history_len(), 1);
///
/// // The second access promotes the key to the resident queue.
/// assert!(store.get("page").is_some());
/// assert_eq!(store.resident_len(), 1);
/// assert_eq!(store.history_len(), 0);
/// ```
pub struct LrukStore {
    max_entries: usize,
    k: u32,
    map: FxHashMap<String, NonNull<Node>>,
    history_head: Option<NonNull<Node>>,
    history_tail: Option<NonNull<Node>>,
    history_len: usize,
    resident_head: Option<NonNull<Node>>,
    resident_tail: Option<NonNull<Node>>,
    resident_len: usize,
    on_evicted: Option<EvictionCallback>,
}

// SAFETY: all nodes are uniquely owned by the store; the raw pointers never
// escape, so the store can move between threads.
unsafe impl Send for LrukStore {}

impl LrukStore {
    /// Creates a store with the default K=2.
    ///
    /// `max_entries == 0` disables the entry bound; the owning shard's byte
    /// budget bounds the store instead.
    #[inline]
    pub fn new(max_entries: usize) -> Self {
        Self::with_k(max_entries, 2)
    }

    /// Creates a store tracking `k` accesses before promotion.
    ///
    /// `k` is clamped to a minimum of 1 (K=1 degenerates to plain LRU).
    pub fn with_k(max_entries: usize, k: u32) -> Self {
        LrukStore {
            max_entries,
            k: k.max(1),
            map: FxHashMap::default(),
            history_head: None,
            history_tail: None,
            history_len: 0,
            resident_head: None,
            resident_tail: None,
            resident_len: 0,
            on_evicted: None,
        }
    }

    /// Installs the eviction callback.
    ///
    /// The callback runs under the owning shard's lock and must not block.
    pub fn set_eviction_callback(&mut self, cb: EvictionCallback) {
        self.on_evicted = Some(cb);
    }

    /// Inserts or updates `key`, returning the previous value when the key
    /// was already present.
    ///
    /// A key already resident is refreshed to the resident front. A key in
    /// history gains an access; reaching K promotes it. A new key enters
    /// the history front with a count of 1, after which the size bounds are
    /// enforced.
    pub fn add(&mut self, key: &str, value: ByteView) -> Option<ByteView> {
        if let Some(&node_ptr) = self.map.get(key) {
            let old = unsafe {
                let node = &mut *node_ptr.as_ptr();
                std::mem::replace(&mut node.value, value)
            };
            self.touch_entry(node_ptr);
            return Some(old);
        }

        let node = Box::new(Node {
            prev: None,
            next: None,
            tier: Tier::History,
            count: 1,
            key: key.to_string(),
            value,
        });
        let node_ptr = NonNull::from(Box::leak(node));
        self.map.insert(key.to_string(), node_ptr);
        self.attach_history_front(node_ptr);

        self.enforce_bounds();
        None
    }

    /// Looks up `key`, applying the same promotion rules as
    /// [`add`](LrukStore::add) without changing the value.
    ///
    /// A history-tier hit is still a hit.
    pub fn get(&mut self, key: &str) -> Option<ByteView> {
        let node_ptr = *self.map.get(key)?;
        self.touch_entry(node_ptr);
        Some(unsafe { (*node_ptr.as_ptr()).value.clone() })
    }

    /// Removes `key` from whichever queue holds it.
    pub fn remove(&mut self, key: &str) {
        if let Some(node_ptr) = self.map.remove(key) {
            self.detach(node_ptr);
            let node = unsafe { Box::from_raw(node_ptr.as_ptr()) };
            self.notify_evicted(&node.key, &node.value);
        }
    }

    /// Evicts the oldest entry: the history back when history is non-empty,
    /// otherwise the resident back. No-op on an empty store.
    pub fn remove_oldest(&mut self) {
        let node = if self.history_len > 0 {
            self.pop_history_tail()
        } else {
            self.pop_resident_tail()
        };
        if let Some(node) = node {
            self.map.remove(&node.key);
            self.notify_evicted(&node.key, &node.value);
        }
    }

    /// Total number of entries across both queues.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the store holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of entries in the history queue.
    #[inline]
    pub fn history_len(&self) -> usize {
        self.history_len
    }

    /// Number of entries in the resident queue.
    #[inline]
    pub fn resident_len(&self) -> usize {
        self.resident_len
    }

    /// Returns `true` if `key` is present, without touching access state.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Drops every entry, invoking the eviction callback for each first.
    pub fn clear(&mut self) {
        while let Some(node) = self.pop_history_tail() {
            self.notify_evicted(&node.key, &node.value);
        }
        while let Some(node) = self.pop_resident_tail() {
            self.notify_evicted(&node.key, &node.value);
        }
        self.map.clear();
    }

    // -- internal -----------------------------------------------------------

    /// Records an access: refreshes recency and promotes a history entry
    /// whose cumulative count reaches K.
    fn touch_entry(&mut self, node_ptr: NonNull<Node>) {
        let (tier, count) = unsafe {
            let node = &mut *node_ptr.as_ptr();
            if node.tier == Tier::History {
                node.count = node.count.saturating_add(1);
            }
            (node.tier, node.count)
        };

        self.detach(node_ptr);
        match tier {
            Tier::Resident => self.attach_resident_front(node_ptr),
            Tier::History if count >= self.k => self.attach_resident_front(node_ptr),
            Tier::History => self.attach_history_front(node_ptr),
        }
    }

    fn notify_evicted(&mut self, key: &str, value: &ByteView) {
        if let Some(cb) = self.on_evicted.as_mut() {
            cb(key, value);
        }
    }

    /// Enforces the history bound and the total bound after an insert.
    fn enforce_bounds(&mut self) {
        if self.max_entries == 0 {
            return;
        }

        let max_history = (self.max_entries / 2).max(1);
        while self.history_len > max_history {
            if let Some(node) = self.pop_history_tail() {
                self.map.remove(&node.key);
                self.notify_evicted(&node.key, &node.value);
            }
        }

        while self.len() > self.max_entries {
            self.remove_oldest();
        }
    }

    /// Detaches a node from whichever list currently holds it.
    #[inline(always)]
    fn detach(&mut self, node_ptr: NonNull<Node>) {
        unsafe {
            let node = node_ptr.as_ref();
            let prev = node.prev;
            let next = node.next;

            let (head, tail, len) = match node.tier {
                Tier::History => (
                    &mut self.history_head,
                    &mut self.history_tail,
                    &mut self.history_len,
                ),
                Tier::Resident => (
                    &mut self.resident_head,
                    &mut self.resident_tail,
                    &mut self.resident_len,
                ),
            };

            match prev {
                Some(mut p) => p.as_mut().next = next,
                None => *head = next,
            }
            match next {
                Some(mut n) => n.as_mut().prev = prev,
                None => *tail = prev,
            }
            *len -= 1;
        }
    }

    /// Attaches a node at the front of the history queue.
    #[inline(always)]
    fn attach_history_front(&mut self, mut node_ptr: NonNull<Node>) {
        unsafe {
            let node = node_ptr.as_mut();
            node.prev = None;
            node.next = self.history_head;
            node.tier = Tier::History;

            match self.history_head {
                Some(mut h) => h.as_mut().prev = Some(node_ptr),
                None => self.history_tail = Some(node_ptr),
            }
            self.history_head = Some(node_ptr);
            self.history_len += 1;
        }
    }

    /// Attaches a node at the front of the resident queue.
    #[inline(always)]
    fn attach_resident_front(&mut self, mut node_ptr: NonNull<Node>) {
        unsafe {
            let node = node_ptr.as_mut();
            node.prev = None;
            node.next = self.resident_head;
            node.tier = Tier::Resident;

            match self.resident_head {
                Some(mut h) => h.as_mut().prev = Some(node_ptr),
                None => self.resident_tail = Some(node_ptr),
            }
            self.resident_head = Some(node_ptr);
            self.resident_len += 1;
        }
    }

    /// Pops the tail node of the history queue.
    #[inline(always)]
    fn pop_history_tail(&mut self) -> Option<Box<Node>> {
        self.history_tail.map(|tail_ptr| unsafe {
            let node = Box::from_raw(tail_ptr.as_ptr());
            self.history_tail = node.prev;
            match self.history_tail {
                Some(mut t) => t.as_mut().next = None,
                None => self.history_head = None,
            }
            self.history_len -= 1;
            node
        })
    }

    /// Pops the tail node of the resident queue.
    #[inline(always)]
    fn pop_resident_tail(&mut self) -> Option<Box<Node>> {
        self.resident_tail.map(|tail_ptr| unsafe {
            let node = Box::from_raw(tail_ptr.as_ptr());
            self.resident_tail = node.prev;
            match self.resident_tail {
                Some(mut t) => t.as_mut().next = None,
                None => self.resident_head = None,
            }
            self.resident_len -= 1;
            node
        })
    }
}

// Free remaining nodes without firing the callback; dropping the store is
// not an eviction.
impl Drop for LrukStore {
    fn drop(&mut self) {
        while self.pop_history_tail().is_some() {}
        while self.pop_resident_tail().is_some() {}
    }
}

impl std::fmt::Debug for LrukStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LrukStore")
            .field("k", &self.k)
            .field("max_entries", &self.max_entries)
            .field("len", &self.map.len())
            .field("history_len", &self.history_len)
            .field("resident_len", &self.resident_len)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
