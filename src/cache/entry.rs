//! Cache entry shapes: the typed view handed to callers and the raw
//! persisted record.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Namespace prefix every persisted key carries, so cache rows can never
/// collide with other state stored alongside them.
pub const KEY_NAMESPACE: &str = "cache_";

/// A cached value with its write metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  /// Logical key, without the storage namespace.
  pub key: String,
  pub data: T,
  pub written_at: DateTime<Utc>,
  pub ttl: Duration,
}

impl<T> CacheEntry<T> {
  /// Time since the entry was written. Clock skew clamps to zero.
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    (now - self.written_at).to_std().unwrap_or(Duration::ZERO)
  }

  /// Hard expiry: past the TTL the entry is discarded on lookup.
  pub fn expired(&self, now: DateTime<Utc>) -> bool {
    self.age(now) > self.ttl
  }

  /// Soft expiry against the given staleness threshold.
  pub fn stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
    self.age(now) > threshold
  }
}

/// Raw persisted row: JSON payload plus write metadata.
///
/// Deserialization of `value` happens in `CacheStore` so a corrupt payload
/// can be evicted and reported as a miss instead of failing the lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  /// Logical key, without the storage namespace.
  pub key: String,
  /// JSON-encoded payload.
  pub value: String,
  /// Write timestamp in epoch milliseconds.
  pub written_at_ms: i64,
  /// Time-to-live in milliseconds.
  pub ttl_ms: i64,
}

impl StoredEntry {
  pub fn written_at(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(self.written_at_ms).unwrap_or(DateTime::UNIX_EPOCH)
  }

  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms.max(0) as u64)
  }

  /// Hard expiry check against the TTL recorded at write time.
  pub fn expired(&self, now: DateTime<Utc>) -> bool {
    let age = (now - self.written_at()).to_std().unwrap_or(Duration::ZERO);
    age > self.ttl()
  }
}
