//! Typed cache front: TTL enforcement, corrupt-entry handling, eviction.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::entry::{CacheEntry, StoredEntry};
use super::storage::CacheStorage;
use crate::error::{Result, SyncError};

/// Durable key-value cache with hard TTL expiry.
///
/// Lookups never return an expired entry unless the caller opts in with
/// `allow_stale`; a rejected expired entry is physically evicted on the spot.
/// Soft staleness is deliberately not this type's concern, it belongs to the
/// freshness tracker.
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self { storage }
  }

  /// Look up `key`. With `allow_stale` an expired entry is still returned;
  /// without it the expired entry is evicted and the lookup misses.
  ///
  /// A payload that fails to deserialize is also evicted and reported as a
  /// miss. Corruption must never surface as a crash to the caller.
  pub fn get<T: DeserializeOwned>(&self, key: &str, allow_stale: bool) -> Result<Option<CacheEntry<T>>> {
    let Some(row) = self.storage.get(key)? else {
      return Ok(None);
    };

    let now = Utc::now();
    if row.expired(now) && !allow_stale {
      self.storage.remove(key)?;
      debug!(key, "evicted expired cache entry");
      return Ok(None);
    }

    let written_at = row.written_at();
    let ttl = row.ttl();
    match serde_json::from_str::<T>(&row.value) {
      Ok(data) => Ok(Some(CacheEntry {
        key: row.key,
        data,
        written_at,
        ttl,
      })),
      Err(e) => {
        self.storage.remove(key)?;
        let err = SyncError::CacheCorrupt(key.to_string());
        warn!(error = %err, detail = %e, "evicting unreadable cache entry");
        Ok(None)
      }
    }
  }

  /// Insert or overwrite unconditionally, stamping the write time.
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
    let value = serde_json::to_string(value)
      .map_err(|e| SyncError::Storage(format!("failed to serialize {}: {}", key, e)))?;
    let row = StoredEntry {
      key: key.to_string(),
      value,
      written_at_ms: Utc::now().timestamp_millis(),
      ttl_ms: ttl.as_millis() as i64,
    };
    self.storage.put(&row)
  }

  /// Remove a single key.
  pub fn evict(&self, key: &str) -> Result<()> {
    self.storage.remove(key)
  }

  /// Remove every key starting with `prefix`. Used for bulk invalidation
  /// on filter changes and logout.
  pub fn evict_prefix(&self, prefix: &str) -> Result<usize> {
    let removed = self.storage.remove_prefix(prefix)?;
    if removed > 0 {
      debug!(prefix, removed, "evicted cache prefix");
    }
    Ok(removed)
  }
}
