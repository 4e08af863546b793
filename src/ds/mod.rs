//! Concurrent and probabilistic data structures backing the cache.

pub mod heavykeeper;
pub mod ring;
pub mod singleflight;

pub use heavykeeper::{HeavyKeeper, SketchConfig};
pub use ring::HashRing;
pub use singleflight::FlightGroup;
