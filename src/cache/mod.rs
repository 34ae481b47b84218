//! Durable key-value cache for offline support.
//!
//! This module provides the persistence half of the engine:
//! - JSON payloads stored under namespaced keys with write-time metadata
//! - Hard TTL expiry enforced on lookup, with opt-in stale reads
//! - Prefix eviction so whole key families can be invalidated at once
//! - Pluggable backends (SQLite for production, in-memory for tests)

mod entry;
mod key;
mod storage;
mod store;

pub use entry::{CacheEntry, StoredEntry, KEY_NAMESPACE};
pub use key::QueryKey;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use store::CacheStore;
