//! Byte-budgeted cache shards.
//!
//! A [`CacheShard`] wraps an [`LrukStore`] in a mutex and keeps the byte
//! accounting the group's eviction loop is driven by: every `add` charges
//! `key.len() + value.len()` and the store's eviction callback credits the
//! same amount back, so `bytes()` always equals the exact footprint of the
//! entries currently held. A group owns two shards (one for keys this node
//! owns, one for hot replicas of keys it does not) under a single shared
//! budget.
//!
//! All operations are atomic with respect to concurrent callers; the
//! eviction callback runs under the shard lock and only touches counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::byteview::ByteView;
use crate::policy::lru_k::LrukStore;

/// Point-in-time statistics for one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Total bytes of all keys and values currently held.
    pub bytes: i64,
    /// Number of entries currently held.
    pub items: u64,
    /// Lookups attempted.
    pub gets: u64,
    /// Lookups that found the key.
    pub hits: u64,
    /// Entries evicted or removed since creation.
    pub evictions: u64,
}

/// A thread-safe, byte-accounted LRU-K cache shard.
pub struct CacheShard {
    store: Mutex<LrukStore>,
    nbytes: Arc<AtomicI64>,
    nget: AtomicU64,
    nhit: AtomicU64,
    nevict: Arc<AtomicU64>,
}

impl CacheShard {
    /// Creates an empty shard.
    ///
    /// The underlying store is unbounded by entry count; the owning group
    /// bounds it in bytes via [`remove_oldest`](CacheShard::remove_oldest).
    pub fn new() -> Self {
        let nbytes = Arc::new(AtomicI64::new(0));
        let nevict = Arc::new(AtomicU64::new(0));

        let mut store = LrukStore::new(0);
        let cb_bytes = nbytes.clone();
        let cb_evict = nevict.clone();
        store.set_eviction_callback(Box::new(move |key, value| {
            cb_bytes.fetch_sub((key.len() + value.len()) as i64, Ordering::Relaxed);
            cb_evict.fetch_add(1, Ordering::Relaxed);
        }));

        CacheShard {
            store: Mutex::new(store),
            nbytes,
            nget: AtomicU64::new(0),
            nhit: AtomicU64::new(0),
            nevict,
        }
    }

    /// Adds an entry, charging `key.len() + value.len()` bytes.
    pub fn add(&self, key: &str, value: ByteView) {
        let new_len = value.len();
        let mut store = self.store.lock();
        if let Some(old) = store.add(key, value) {
            // In-place replacement: swap the old value's charge for the new.
            self.nbytes
                .fetch_sub((key.len() + old.len()) as i64, Ordering::Relaxed);
        }
        self.nbytes
            .fetch_add((key.len() + new_len) as i64, Ordering::Relaxed);
    }

    /// Looks up a key, counting the probe and any hit.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.nget.fetch_add(1, Ordering::Relaxed);
        let value = self.store.lock().get(key)?;
        self.nhit.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Removes a key if present. Best-effort; never errors.
    pub fn remove(&self, key: &str) {
        self.store.lock().remove(key);
    }

    /// Evicts the oldest entry per the store's two-queue rule.
    pub fn remove_oldest(&self) {
        self.store.lock().remove_oldest();
    }

    /// Current byte footprint of the shard.
    #[inline]
    pub fn bytes(&self) -> i64 {
        self.nbytes.load(Ordering::Relaxed)
    }

    /// Current number of entries.
    pub fn items(&self) -> u64 {
        self.store.lock().len() as u64
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> ShardStats {
        ShardStats {
            bytes: self.bytes(),
            items: self.items(),
            gets: self.nget.load(Ordering::Relaxed),
            hits: self.nhit.load(Ordering::Relaxed),
            evictions: self.nevict.load(Ordering::Relaxed),
        }
    }
}

impl Default for CacheShard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CacheShard")
            .field("bytes", &stats.bytes)
            .field("items", &stats.items)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
