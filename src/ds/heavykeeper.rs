//! # HeavyKeeper hot-key sketch
//!
//! Streaming top-K frequency estimation with online decay. The sketch
//! answers one question cheaply on every cache hit: *is this key hot enough
//! to deserve a local replica even though another node owns it?*
//!
//! ## Structure
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────────┐
//!   │                        HeavyKeeper                                 │
//!   │                                                                    │
//!   │   depth × width matrix of cells        per-row seeds               │
//!   │   ┌───────────────────────────────┐    [s0, s1, s2, s3]            │
//!   │   │ (fp, count) (fp, count) ...   │                                │
//!   │   │ (fp, count) (fp, count) ...   │    row i position:             │
//!   │   │ (fp, count) (fp, count) ...   │    H(key, s_i) mod width       │
//!   │   │ (fp, count) (fp, count) ...   │                                │
//!   │   └───────────────────────────────┘                                │
//!   │                                                                    │
//!   │   top-K min-heap  [(key, count), ...]  +  key → heap index map     │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Update rule (per record)
//!
//! For each row: if the cell's fingerprint matches the key (or the cell is
//! empty), install the fingerprint and increment. On a collision, decrement
//! with probability `1 / (count + 1)`; a counter that reaches zero hands
//! the cell to the new key with count 1. The estimate is the minimum
//! counter over matching rows. Keys whose estimate reaches `min_count`
//! (default 10) compete for the bounded top-K heap.
//!
//! Exponential bias toward heavy hitters: the hotter an entrenched key, the
//! harder it is for colliding strangers to erode its counter, while
//! one-shot keys are cheap to displace.
//!
//! ## Decay
//!
//! Every `decay_interval` (default 60 s) all counters are multiplied by
//! `decay` (default 0.95); counters that drop below 1 are zeroed and their
//! fingerprint cleared. The top-K is rebuilt by re-querying each held key
//! and dropping those below `min_count`. The pass runs under the sketch's
//! write lock, so it is mutually exclusive with `record` and `top_k`;
//! it is triggered opportunistically by the next `record` after the
//! interval elapses, or explicitly via [`HeavyKeeper::decay`].

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use rustc_hash::FxHashMap;

/// Configuration for a [`HeavyKeeper`] sketch.
///
/// Out-of-range values are clamped back to the defaults at construction.
#[derive(Debug, Clone, Copy)]
pub struct SketchConfig {
    /// Buckets per row. Minimum 100.
    pub width: usize,
    /// Number of hash rows. Minimum 3.
    pub depth: usize,
    /// Capacity of the hot-key set. Minimum 10.
    pub top_k: usize,
    /// Multiplicative decay factor, in (0, 1).
    pub decay: f64,
    /// Minimum estimated frequency for top-K eligibility.
    pub min_count: f64,
    /// Interval between decay passes.
    pub decay_interval: Duration,
}

impl Default for SketchConfig {
    fn default() -> Self {
        SketchConfig {
            width: 1024,
            depth: 4,
            top_k: 100,
            decay: 0.95,
            min_count: 10.0,
            decay_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    fp: u32,
    count: f64,
}

struct HeapEntry {
    key: String,
    count: f64,
}

/// Bounded min-heap of the hottest keys, with a key → index map so an
/// existing entry's count can be fixed up in place.
struct TopK {
    cap: usize,
    heap: Vec<HeapEntry>,
    pos: FxHashMap<String, usize>,
}

impl TopK {
    fn new(cap: usize) -> Self {
        TopK {
            cap,
            heap: Vec::with_capacity(cap),
            pos: FxHashMap::default(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.pos.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.heap.iter().map(|e| e.key.clone()).collect()
    }

    fn entries(&self) -> Vec<(String, f64)> {
        self.heap.iter().map(|e| (e.key.clone(), e.count)).collect()
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.pos.clear();
    }

    /// Offers `(key, count)` for membership: update in place, push while
    /// below capacity, or displace the heap root when strictly hotter.
    fn offer(&mut self, key: &str, count: f64) {
        if let Some(&i) = self.pos.get(key) {
            self.heap[i].count = count;
            let i = self.sift_up(i);
            self.sift_down(i);
        } else if self.heap.len() < self.cap {
            self.heap.push(HeapEntry {
                key: key.to_string(),
                count,
            });
            let i = self.heap.len() - 1;
            self.pos.insert(key.to_string(), i);
            self.sift_up(i);
        } else if count > self.heap[0].count {
            let old = std::mem::replace(
                &mut self.heap[0],
                HeapEntry {
                    key: key.to_string(),
                    count,
                },
            );
            self.pos.remove(&old.key);
            self.pos.insert(key.to_string(), 0);
            self.sift_down(0);
        }
    }

    fn swap_nodes(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        *self.pos.get_mut(&self.heap[i].key).unwrap() = i;
        *self.pos.get_mut(&self.heap[j].key).unwrap() = j;
    }

    fn sift_up(&mut self, mut i: usize) -> usize {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].count < self.heap[parent].count {
                self.swap_nodes(i, parent);
                i = parent;
            } else {
                break;
            }
        }
        i
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < self.heap.len() && self.heap[left].count < self.heap[smallest].count {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].count < self.heap[smallest].count {
                smallest = right;
            }
            if smallest == i {
                return;
            }
            self.swap_nodes(i, smallest);
            i = smallest;
        }
    }
}

struct Inner {
    width: usize,
    depth: usize,
    decay: f64,
    min_count: f64,
    decay_interval: Duration,
    seeds: Vec<u32>,
    cells: Vec<Cell>,
    top: TopK,
    last_decay: Instant,
}

/// FNV-1a over the key bytes followed by the row seed (little-endian).
fn fnv1a_seeded(data: &[u8], seed: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in data.iter().chain(seed.to_le_bytes().iter()) {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// FNV-1a fingerprint of a key.
fn fingerprint(key: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in key.as_bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

impl Inner {
    fn row_position(&self, row: usize, key: &str) -> usize {
        fnv1a_seeded(key.as_bytes(), self.seeds[row]) as usize % self.width
    }

    fn record(&mut self, key: &str) {
        self.maybe_decay();

        let fp = fingerprint(key);
        let width = self.width;
        let mut rng = rand::thread_rng();
        let mut estimate = f64::MAX;
        let mut matched = false;

        for row in 0..self.depth {
            let pos = self.row_position(row, key);
            let cell = &mut self.cells[row * width + pos];

            if cell.fp == fp || cell.fp == 0 {
                cell.fp = fp;
                cell.count += 1.0;
            } else {
                // Collision: probabilistic decay of the incumbent.
                let prob = 1.0 / (cell.count + 1.0);
                if rng.gen::<f64>() < prob {
                    cell.count -= 1.0;
                    if cell.count <= 0.0 {
                        cell.fp = fp;
                        cell.count = 1.0;
                    }
                }
            }

            if cell.fp == fp && cell.count < estimate {
                estimate = cell.count;
                matched = true;
            }
        }

        if matched && estimate >= self.min_count {
            self.top.offer(key, estimate);
        }
    }

    fn estimate(&self, key: &str) -> f64 {
        let fp = fingerprint(key);
        let mut min = f64::MAX;
        let mut matched = false;
        for row in 0..self.depth {
            let cell = &self.cells[row * self.width + self.row_position(row, key)];
            if cell.fp == fp && cell.count < min {
                min = cell.count;
                matched = true;
            }
        }
        if matched {
            min
        } else {
            0.0
        }
    }

    fn maybe_decay(&mut self) {
        if self.last_decay.elapsed() >= self.decay_interval {
            self.decay();
        }
    }

    fn decay(&mut self) {
        for cell in &mut self.cells {
            cell.count *= self.decay;
            if cell.count < 1.0 {
                cell.count = 0.0;
                cell.fp = 0;
            }
        }

        // Re-admit surviving keys with their decayed estimates.
        let held = self.top.keys();
        self.top.clear();
        for key in held {
            let count = self.estimate(&key);
            if count >= self.min_count {
                self.top.offer(&key, count);
            }
        }

        self.last_decay = Instant::now();
        tracing::trace!(top_k = self.top.heap.len(), "hot-key sketch decayed");
    }
}

/// Concurrent HeavyKeeper sketch.
///
/// Reads (`is_hot`, `top_k`, `estimate`) take the read lock; `record` and
/// `decay` take the write lock.
///
/// # Example
///
/// ```
/// use meshcache::ds::heavykeeper::{HeavyKeeper, SketchConfig};
///
/// let sketch = HeavyKeeper::new(SketchConfig::default());
/// for _ in 0..50 {
///     sketch.record("popular");
/// }
/// sketch.record("one-off");
///
/// assert!(sketch.is_hot("popular"));
/// assert!(!sketch.is_hot("one-off"));
/// ```
pub struct HeavyKeeper {
    inner: RwLock<Inner>,
}

impl HeavyKeeper {
    /// Creates a sketch, clamping out-of-range config values back to the
    /// defaults.
    pub fn new(config: SketchConfig) -> Self {
        let defaults = SketchConfig::default();
        let width = if config.width < 100 {
            defaults.width
        } else {
            config.width
        };
        let depth = if config.depth < 3 {
            defaults.depth
        } else {
            config.depth
        };
        let top_k = if config.top_k < 10 {
            defaults.top_k
        } else {
            config.top_k
        };
        let decay = if config.decay <= 0.0 || config.decay >= 1.0 {
            defaults.decay
        } else {
            config.decay
        };
        let min_count = if config.min_count <= 0.0 {
            defaults.min_count
        } else {
            config.min_count
        };

        let mut rng = rand::thread_rng();
        let seeds = (0..depth).map(|_| rng.gen()).collect();

        HeavyKeeper {
            inner: RwLock::new(Inner {
                width,
                depth,
                decay,
                min_count,
                decay_interval: config.decay_interval,
                seeds,
                cells: vec![Cell::default(); depth * width],
                top: TopK::new(top_k),
                last_decay: Instant::now(),
            }),
        }
    }

    /// Records one access of `key`.
    pub fn record(&self, key: &str) {
        self.inner.write().record(key);
    }

    /// Returns the estimated frequency of `key` (0 when unknown).
    pub fn estimate(&self, key: &str) -> f64 {
        self.inner.read().estimate(key)
    }

    /// Returns `true` if `key` is currently in the top-K hot set.
    pub fn is_hot(&self, key: &str) -> bool {
        self.inner.read().top.contains(key)
    }

    /// Returns the hot keys sorted by estimated count, descending.
    pub fn top_k(&self) -> Vec<(String, f64)> {
        let mut entries = self.inner.read().top.entries();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries
    }

    /// Applies one decay pass immediately.
    ///
    /// Normally decay runs by itself once `decay_interval` elapses; this is
    /// for embedders driving their own tick (and for tests).
    pub fn decay(&self) {
        self.inner.write().decay();
    }
}

impl Default for HeavyKeeper {
    fn default() -> Self {
        Self::new(SketchConfig::default())
    }
}

impl std::fmt::Debug for HeavyKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("HeavyKeeper")
            .field("width", &inner.width)
            .field("depth", &inner.depth)
            .field("hot_keys", &inner.top.heap.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
