//! Versioned domain cache for offline support.
//!
//! One entry per data domain, not per record:
//! - Reads are memory-only and never block
//! - Writes carry a monotonic version; stale writes are rejected as no-ops
//! - Entries persist through a key-value store and survive restarts
//! - Everything is scoped to the signed-in identity

mod layer;
mod storage;
mod traits;

pub use layer::DomainCache;
pub use storage::{MemoryStore, SqliteStore, StoreBackend, StoreHandle};
pub use traits::{CacheEntry, CacheUpdate, DomainKey, DomainPayload};
