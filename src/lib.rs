//! meshcache: distributed group-cache primitives.
//!
//! A process-local core for a peer group cache: every key has one
//! authoritative owner chosen by consistent hashing, any node may replicate
//! hot values locally, and concurrent loads of the same key coalesce into
//! one. See `DESIGN.md` for internal architecture and invariants.

pub mod byteview;
pub mod context;
pub mod ds;
pub mod error;
pub mod group;
pub mod peers;
pub mod policy;
pub mod shard;
pub mod sink;
pub mod wire;

mod batch;

pub mod prelude;

pub use byteview::ByteView;
pub use context::{CancelHandle, Context};
pub use error::{BoxError, GetError, PeerError, SinkError, WireError};
pub use group::{
    get_group, new_group, new_group_with_options, CacheKind, Getter, Group, GroupOptions,
    StatsSnapshot,
};
pub use peers::{
    register_peer_picker, register_per_group_peer_picker, NoPeers, PeerPicker, PeerPool,
    RemotePeer,
};
pub use shard::ShardStats;
pub use sink::{
    AllocatingByteSliceSink, ByteViewSink, ProtoSink, Sink, StringSink, TruncatingByteSliceSink,
};
