//! Convenience re-exports for typical users of the crate.
//!
//! ```
//! use meshcache::prelude::*;
//! ```

pub use crate::byteview::ByteView;
pub use crate::context::Context;
pub use crate::error::{BoxError, GetError};
pub use crate::group::{get_group, new_group, CacheKind, Getter, Group, GroupOptions};
pub use crate::peers::{PeerPicker, PeerPool, RemotePeer};
pub use crate::sink::{AllocatingByteSliceSink, ByteViewSink, Sink, StringSink};
