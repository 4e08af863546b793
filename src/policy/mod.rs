//! Cache admission and replacement policies.

pub mod lru_k;

pub use lru_k::{EvictionCallback, LrukStore};
