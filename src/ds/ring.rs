//! Consistent-hash ring mapping keys to peer identifiers.
//!
//! Each peer contributes `replicas` virtual nodes (default 50), hashed from
//! `"{i}{peer}"`. Lookups hash the key and binary-search for the first
//! virtual node at or clockwise of it, wrapping to the front of the ring.
//! More replicas flatten the load distribution at the cost of a larger
//! ring.
//!
//! The ring is a plain data structure with no interior locking; the peer
//! pool guards it with its own mutex.

use std::fmt;

/// Hash function used to place keys and virtual nodes on the ring.
pub type HashFn = fn(&[u8]) -> u32;

/// Default number of virtual nodes per peer.
pub const DEFAULT_REPLICAS: usize = 50;

/// FNV-1a hash (32-bit): the default ring hash.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// A consistent-hash ring over peer identifiers.
///
/// # Example
///
/// ```
/// use meshcache::ds::ring::HashRing;
///
/// let mut ring = HashRing::new(50);
/// ring.add(&["peer-a", "peer-b", "peer-c"]);
///
/// let owner = ring.get("some-key").unwrap();
/// assert!(["peer-a", "peer-b", "peer-c"].contains(&owner));
///
/// // The mapping is stable.
/// assert_eq!(ring.get("some-key"), Some(owner));
/// ```
pub struct HashRing {
    replicas: usize,
    hash: HashFn,
    // Sorted ascending by hash; ties keep insertion order (stable sort).
    entries: Vec<(u32, String)>,
}

impl HashRing {
    /// Creates an empty ring with the default FNV-1a hash.
    ///
    /// `replicas` is clamped to a minimum of 1.
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, fnv1a)
    }

    /// Creates an empty ring with a caller-supplied hash function.
    pub fn with_hasher(replicas: usize, hash: HashFn) -> Self {
        HashRing {
            replicas: replicas.max(1),
            hash,
            entries: Vec::new(),
        }
    }

    /// Appends `replicas` virtual nodes for each peer and re-sorts the ring.
    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let vnode = format!("{i}{peer}");
                self.entries
                    .push(((self.hash)(vnode.as_bytes()), peer.to_string()));
            }
        }
        self.entries.sort_by_key(|(h, _)| *h);
    }

    /// Returns the peer owning `key`, or `None` on an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let h = (self.hash)(key.as_bytes());
        let idx = self.entries.partition_point(|(eh, _)| *eh < h);
        let idx = if idx == self.entries.len() { 0 } else { idx };
        Some(&self.entries[idx].1)
    }

    /// Returns `true` if the ring has no virtual nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of virtual nodes on the ring.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("virtual_nodes", &self.entries.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
