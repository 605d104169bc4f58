//! Cache stores for intercepted responses.
//!
//! This module provides the storage side of the offline layer:
//! - Named stores mapping request identity to a cached response
//! - Versioned generations of stores, condemned wholesale on activation
//! - SQLite persistence, plus an in-memory backend with the same traits

mod generation;
mod memory;
mod storage;
mod traits;

pub use generation::CacheGeneration;
pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{CacheStorage, CachedEntry, ResponseSource, Served};
