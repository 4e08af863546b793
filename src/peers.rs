//! Peer boundary: who owns a key, and how to ask them for it.
//!
//! The core never talks to the network itself. It consumes two traits:
//! [`PeerPicker`] decides which process owns a key (via consistent
//! hashing), and [`RemotePeer`] fetches a value from that owner. A concrete
//! transport (HTTP, gRPC, a test stub) implements both outside this crate.
//!
//! [`PeerPool`] is the ring-backed picker: it keeps a [`HashRing`] of peer
//! ids plus a client per remote peer, and answers "remote owner" or "you
//! own it" per key. The process-wide registry lets a transport install
//! itself once and have every group pick it up lazily.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::context::Context;
use crate::ds::ring::{HashRing, DEFAULT_REPLICAS};
use crate::error::PeerError;
use crate::wire::{GetRequest, GetResponse};

/// A client for one remote peer.
pub trait RemotePeer: Send + Sync {
    /// Fetches a value from the peer. Implementations must honor `ctx` and
    /// preserve the value byte-for-byte.
    fn get(&self, ctx: &Context, req: &GetRequest) -> Result<GetResponse, PeerError>;
}

/// Locates the owner of a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the remote owner of `key`, or `None` when the local process
    /// is the owner (which includes the no-peers state).
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn RemotePeer>>;
}

/// A picker that never finds a remote peer; every key is owned locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeers;

impl PeerPicker for NoPeers {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn RemotePeer>> {
        None
    }
}

// ---------------------------------------------------------------------------
// Process-wide picker registry
// ---------------------------------------------------------------------------

type PickerFactory = Box<dyn Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync>;

static PICKER_FACTORY: OnceLock<PickerFactory> = OnceLock::new();

/// Registers the picker every group will use.
///
/// # Panics
///
/// Panics if a picker registration already happened in this process.
pub fn register_peer_picker<F>(factory: F)
where
    F: Fn() -> Arc<dyn PeerPicker> + Send + Sync + 'static,
{
    if PICKER_FACTORY.set(Box::new(move |_| factory())).is_err() {
        panic!("meshcache: register_peer_picker called more than once");
    }
}

/// Registers a per-group picker factory, keyed by group name.
///
/// # Panics
///
/// Panics if a picker registration already happened in this process.
pub fn register_per_group_peer_picker<F>(factory: F)
where
    F: Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync + 'static,
{
    if PICKER_FACTORY.set(Box::new(factory)).is_err() {
        panic!("meshcache: register_peer_picker called more than once");
    }
}

/// Resolves the picker for a group, defaulting to [`NoPeers`].
pub(crate) fn picker_for_group(name: &str) -> Arc<dyn PeerPicker> {
    match PICKER_FACTORY.get() {
        Some(factory) => factory(name),
        None => Arc::new(NoPeers),
    }
}

// ---------------------------------------------------------------------------
// PeerPool
// ---------------------------------------------------------------------------

struct PoolState {
    ring: HashRing,
    clients: FxHashMap<String, Arc<dyn RemotePeer>>,
}

/// Ring-backed peer picker.
///
/// Holds the consistent-hash ring and a client per remote peer. The local
/// id is always placed on the ring; a key hashing to it is owned locally
/// and [`pick_peer`](PeerPicker::pick_peer) returns `None`.
pub struct PeerPool {
    self_id: String,
    replicas: usize,
    state: Mutex<PoolState>,
}

impl PeerPool {
    /// Creates a pool for the local peer id with the default replica count.
    pub fn new(self_id: impl Into<String>) -> Self {
        Self::with_replicas(self_id, DEFAULT_REPLICAS)
    }

    /// Creates a pool with an explicit virtual-node count per peer.
    pub fn with_replicas(self_id: impl Into<String>, replicas: usize) -> Self {
        PeerPool {
            self_id: self_id.into(),
            replicas,
            state: Mutex::new(PoolState {
                ring: HashRing::new(replicas),
                clients: FxHashMap::default(),
            }),
        }
    }

    /// Replaces the peer set, rebuilding the ring atomically.
    ///
    /// `peers` holds the remote members and their clients; the local id is
    /// added to the ring implicitly. Passing it explicitly is fine too;
    /// its client is simply never used.
    pub fn set_peers(&self, peers: Vec<(String, Arc<dyn RemotePeer>)>) {
        let mut ids: Vec<String> = peers.iter().map(|(id, _)| id.clone()).collect();
        if !ids.iter().any(|id| *id == self.self_id) {
            ids.push(self.self_id.clone());
        }

        let mut ring = HashRing::new(self.replicas);
        ring.add(&ids);

        let mut state = self.state.lock();
        state.ring = ring;
        state.clients = peers.into_iter().collect();
    }

    /// The local peer id.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }
}

impl PeerPicker for PeerPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn RemotePeer>> {
        let state = self.state.lock();
        if state.ring.is_empty() {
            return None;
        }
        let owner = state.ring.get(key)?;
        if owner == self.self_id {
            return None;
        }
        state.clients.get(owner).cloned()
    }
}

impl std::fmt::Debug for PeerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPool")
            .field("self_id", &self.self_id)
            .field("replicas", &self.replicas)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
