//! # Group: the cache lookup orchestration
//!
//! A [`Group`] is a named cache namespace binding a data loader, two cache
//! shards, a request-coalescing layer, a hot-key sketch, and a peer picker.
//!
//! ## Lookup path
//!
//! ```text
//!   get(ctx, key, sink)
//!       │
//!       ├─► main shard ──hit──► sink (and record the hit in the sketch)
//!       ├─► hot shard  ──hit──►  "
//!       │
//!       └─► miss: singleflight.run(key, ..)
//!               │
//!               ├─► re-probe both shards (two racing misses may both get
//!               │   here; only the first may populate)
//!               │
//!               ├─► peer picker says a remote node owns the key:
//!               │       peer.get ──ok──► maybe admit into HOT shard,
//!               │       gated by the sketch; on error fall through
//!               │
//!               └─► origin Getter ──ok──► admit into MAIN shard
//!                                └─err─► propagate to every waiter
//! ```
//!
//! ## Shared byte budget
//!
//! Both shards draw on one `cache_bytes` budget. After every admission the
//! group evicts oldest entries until the combined footprint fits, taking
//! victims from the hot shard while it exceeds 1/8 of the main shard's
//! bytes (bounding the hot tier to roughly 1/9 of capacity) and from the
//! main shard otherwise.
//!
//! ## Registration
//!
//! Groups live in a process-wide registry: [`new_group`] panics on a
//! duplicate name, [`get_group`] retrieves an existing group (for instance
//! on the serving side of the peer protocol).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::byteview::ByteView;
use crate::context::Context;
use crate::ds::heavykeeper::{HeavyKeeper, SketchConfig};
use crate::ds::singleflight::FlightGroup;
use crate::error::{BoxError, GetError};
use crate::peers::{self, PeerPicker, RemotePeer};
use crate::shard::{CacheShard, ShardStats};
use crate::sink::{AllocatingByteSliceSink, Sink};
use crate::wire::GetRequest;

// ---------------------------------------------------------------------------
// Getter
// ---------------------------------------------------------------------------

/// Loads a value from the authoritative source on a cache miss.
///
/// On success the implementation must populate `dest` exactly once. The
/// value must be determined by `key` alone, with no hidden time, version, or
/// session dependency, because the cache treats equal keys as equal values
/// indefinitely.
pub trait Getter: Send + Sync {
    /// Loads `key` into `dest`, honoring `ctx`.
    fn get(&self, ctx: &Context, key: &str, dest: &mut dyn Sink) -> Result<(), BoxError>;
}

impl<F> Getter for F
where
    F: Fn(&Context, &str, &mut dyn Sink) -> Result<(), BoxError> + Send + Sync,
{
    fn get(&self, ctx: &Context, key: &str, dest: &mut dyn Sink) -> Result<(), BoxError> {
        self(ctx, key, dest)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

static GROUPS: OnceLock<RwLock<FxHashMap<String, Arc<Group>>>> = OnceLock::new();

fn registry() -> &'static RwLock<FxHashMap<String, Arc<Group>>> {
    GROUPS.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Options for [`new_group_with_options`].
#[derive(Debug, Clone, Copy)]
pub struct GroupOptions {
    /// Enables the hot-key sketch gating hot-shard admission. When
    /// disabled, remote loads are admitted with a fixed 1-in-10 chance.
    pub hot_detector: bool,
    /// Sketch configuration, used when `hot_detector` is set.
    pub sketch: SketchConfig,
}

impl Default for GroupOptions {
    fn default() -> Self {
        GroupOptions {
            hot_detector: true,
            sketch: SketchConfig::default(),
        }
    }
}

/// Creates and registers a group with default options.
///
/// `cache_bytes` bounds the combined footprint of the main and hot shards;
/// a value `<= 0` disables caching entirely.
///
/// # Panics
///
/// Panics if a group with this name already exists in the process.
pub fn new_group(
    name: impl Into<String>,
    cache_bytes: i64,
    getter: impl Getter + 'static,
) -> Arc<Group> {
    new_group_with_options(name, cache_bytes, getter, GroupOptions::default())
}

/// Creates and registers a group.
///
/// # Panics
///
/// Panics if a group with this name already exists in the process.
pub fn new_group_with_options(
    name: impl Into<String>,
    cache_bytes: i64,
    getter: impl Getter + 'static,
    options: GroupOptions,
) -> Arc<Group> {
    let name = name.into();
    let mut groups = registry().write();
    if groups.contains_key(&name) {
        panic!("meshcache: duplicate registration of group {name}");
    }

    let group = Arc::new(Group {
        name: name.clone(),
        getter: Box::new(getter),
        peers: OnceLock::new(),
        cache_bytes,
        main_cache: CacheShard::new(),
        hot_cache: CacheShard::new(),
        loader: FlightGroup::new(),
        hot_detector: options
            .hot_detector
            .then(|| HeavyKeeper::new(options.sketch)),
        stats: Stats::default(),
    });
    groups.insert(name, group.clone());
    group
}

/// Returns the previously created group with this name, if any.
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    registry().read().get(name).cloned()
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Stats {
    gets: AtomicU64,
    cache_hits: AtomicU64,
    loads: AtomicU64,
    loads_deduped: AtomicU64,
    local_loads: AtomicU64,
    local_load_errs: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    server_requests: AtomicU64,
}

impl Stats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            loads_deduped: self.loads_deduped.load(Ordering::Relaxed),
            local_loads: self.local_loads.load(Ordering::Relaxed),
            local_load_errs: self.local_load_errs.load(Ordering::Relaxed),
            peer_loads: self.peer_loads.load(Ordering::Relaxed),
            peer_errors: self.peer_errors.load(Ordering::Relaxed),
            server_requests: self.server_requests.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time group statistics. All counters are monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Any `get` request, including those served from cache.
    pub gets: u64,
    /// Hits in either shard.
    pub cache_hits: u64,
    /// Loads started (`gets - cache_hits`, before coalescing).
    pub loads: u64,
    /// Loads that survived coalescing and actually ran.
    pub loads_deduped: u64,
    /// Successful origin loads.
    pub local_loads: u64,
    /// Failed origin loads.
    pub local_load_errs: u64,
    /// Successful remote-peer loads.
    pub peer_loads: u64,
    /// Failed remote-peer loads (each falls back to the origin).
    pub peer_errors: u64,
    /// Requests served on behalf of other peers.
    pub server_requests: u64,
}

/// Which of a group's two shards to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Keys this node owns on the ring.
    Main,
    /// Hot replicas of keys owned elsewhere.
    Hot,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named cache namespace with its loading machinery.
pub struct Group {
    name: String,
    getter: Box<dyn Getter>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    cache_bytes: i64,
    main_cache: CacheShard,
    hot_cache: CacheShard,
    loader: FlightGroup<ByteView, GetError>,
    hot_detector: Option<HeavyKeeper>,
    stats: Stats,
}

impl Group {
    /// The group's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetches the value for `key` into `dest`.
    ///
    /// Probes the main shard, then the hot shard; on a miss, loads through
    /// the coalescing layer: from the key's remote owner when one exists,
    /// otherwise from the origin `Getter`. Concurrent callers for the same
    /// key share a single load and a single result.
    pub fn get(&self, ctx: &Context, key: &str, dest: &mut dyn Sink) -> Result<(), GetError> {
        self.stats.gets.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.lookup_cache(key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return dest.set_view(value).map_err(GetError::Sink);
        }

        let (value, dest_populated) = self.load(ctx, key, dest)?;
        if dest_populated {
            // The origin loader already filled this caller's sink.
            return Ok(());
        }
        dest.set_view(value).map_err(GetError::Sink)
    }

    /// Serving-side entry point for the peer protocol: counts the request
    /// and returns the value as owned bytes.
    pub fn serve_get(&self, ctx: &Context, key: &str) -> Result<Vec<u8>, GetError> {
        self.stats.server_requests.fetch_add(1, Ordering::Relaxed);
        let mut out = Vec::new();
        let mut sink = AllocatingByteSliceSink::new(&mut out);
        self.get(ctx, key, &mut sink)?;
        Ok(out)
    }

    /// Inserts a value directly into the main shard.
    pub fn set(&self, key: &str, value: ByteView) {
        self.populate_cache(key, value, CacheKind::Main);
        if let Some(detector) = &self.hot_detector {
            detector.record(key);
        }
    }

    /// Removes `key` from both shards. Best-effort; never errors, and a
    /// missing key is indistinguishable from a removed one.
    pub fn remove(&self, key: &str) {
        self.main_cache.remove(key);
        self.hot_cache.remove(key);
    }

    /// The keys the sketch currently considers hot, hottest first.
    pub fn hot_keys(&self) -> Vec<String> {
        match &self.hot_detector {
            Some(detector) => detector.top_k().into_iter().map(|(key, _)| key).collect(),
            None => Vec::new(),
        }
    }

    /// Returns a snapshot of the group's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns statistics for one shard.
    pub fn cache_stats(&self, kind: CacheKind) -> ShardStats {
        match kind {
            CacheKind::Main => self.main_cache.stats(),
            CacheKind::Hot => self.hot_cache.stats(),
        }
    }

    /// Installs this group's peer picker, overriding the process-wide
    /// registration.
    ///
    /// # Panics
    ///
    /// Panics if the group's picker was already resolved or installed.
    pub fn register_peer_picker(&self, picker: Arc<dyn PeerPicker>) {
        if self.peers.set(picker).is_err() {
            panic!(
                "meshcache: peer picker already registered for group {}",
                self.name
            );
        }
    }

    // -- lookup path --------------------------------------------------------

    fn peer_picker(&self) -> &Arc<dyn PeerPicker> {
        self.peers
            .get_or_init(|| peers::picker_for_group(&self.name))
    }

    /// Probes the main shard, then the hot shard. Every hit is recorded in
    /// the hot-key sketch.
    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        if self.cache_bytes <= 0 {
            return None;
        }
        let value = self
            .main_cache
            .get(key)
            .or_else(|| self.hot_cache.get(key))?;
        if let Some(detector) = &self.hot_detector {
            detector.record(key);
        }
        Some(value)
    }

    /// Runs the coalesced load. The second tuple element reports whether
    /// the caller's own sink was populated in place by the origin loader.
    fn load(&self, ctx: &Context, key: &str, dest: &mut dyn Sink) -> Result<(ByteView, bool), GetError> {
        self.stats.loads.fetch_add(1, Ordering::Relaxed);

        let mut dest_populated = false;
        let result = self.loader.run(key, || {
            // Re-check the cache. Coalescing only merges overlapping
            // callers: two racing misses can serialize here, and the
            // second run would double-count bytes if it populated again.
            if let Some(value) = self.lookup_cache(key) {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            self.stats.loads_deduped.fetch_add(1, Ordering::Relaxed);

            if let Some(err) = ctx.error() {
                return Err(err);
            }

            if let Some(peer) = self.peer_picker().pick_peer(key) {
                match self.get_from_peer(ctx, peer.as_ref(), key) {
                    Ok(value) => {
                        self.stats.peer_loads.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Err(err) => {
                        self.stats.peer_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            group = %self.name,
                            key,
                            error = %err,
                            "peer load failed, falling back to origin"
                        );
                    }
                }
            }

            let value = match self.get_locally(ctx, key, dest) {
                Ok(value) => value,
                Err(err) => {
                    self.stats.local_load_errs.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            };
            self.stats.local_loads.fetch_add(1, Ordering::Relaxed);
            dest_populated = true;
            self.populate_cache(key, value.clone(), CacheKind::Main);
            Ok(value)
        });

        result.map(|value| (value, dest_populated))
    }

    /// Loads from the origin `Getter` into the executing caller's sink.
    fn get_locally(
        &self,
        ctx: &Context,
        key: &str,
        dest: &mut dyn Sink,
    ) -> Result<ByteView, GetError> {
        self.getter.get(ctx, key, dest).map_err(|err| {
            if ctx.is_canceled() {
                GetError::Canceled
            } else {
                GetError::origin(err)
            }
        })?;
        // A load that was canceled underneath a success must not be
        // admitted either.
        if let Some(err) = ctx.error() {
            return Err(err);
        }
        dest.view().map_err(GetError::Sink)
    }

    /// Fetches from the key's remote owner; on success the value may be
    /// replicated into the hot shard.
    fn get_from_peer(
        &self,
        ctx: &Context,
        peer: &dyn RemotePeer,
        key: &str,
    ) -> Result<ByteView, crate::error::PeerError> {
        let req = GetRequest {
            group: self.name.clone(),
            key: key.to_string(),
        };
        let res = peer.get(ctx, &req)?;
        let value = ByteView::from(res.value);

        let admit = match &self.hot_detector {
            Some(detector) => {
                detector.record(key);
                detector.is_hot(key)
            }
            // Detector disabled: fall back to a fixed 1-in-10 chance.
            None => rand::thread_rng().gen_range(0..10) == 0,
        };
        if admit {
            tracing::trace!(group = %self.name, key, "replicating hot key locally");
            self.populate_cache(key, value.clone(), CacheKind::Hot);
        }

        Ok(value)
    }

    /// Admits a value into one shard, then evicts across both until the
    /// combined footprint fits the budget.
    fn populate_cache(&self, key: &str, value: ByteView, kind: CacheKind) {
        if self.cache_bytes <= 0 {
            return;
        }
        match kind {
            CacheKind::Main => self.main_cache.add(key, value),
            CacheKind::Hot => self.hot_cache.add(key, value),
        }

        loop {
            let main_bytes = self.main_cache.bytes();
            let hot_bytes = self.hot_cache.bytes();
            if main_bytes + hot_bytes <= self.cache_bytes {
                return;
            }

            // Bound the hot tier to roughly 1/9 of the budget.
            let victim = if hot_bytes > main_bytes / 8 {
                &self.hot_cache
            } else {
                &self.main_cache
            };
            victim.remove_oldest();
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("cache_bytes", &self.cache_bytes)
            .field("hot_detector", &self.hot_detector.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
