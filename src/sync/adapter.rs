//! Cache-aware remote reads: the policy every data fetch goes through.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::constants::{RETRY_BASE_DELAY, RETRY_MAX_ATTEMPTS, RETRY_MAX_DELAY};
use crate::error::{Result, SyncError};
use crate::freshness::FreshnessTracker;
use crate::net::NetworkStatus;

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Fresh from the network, written through the cache.
  Network,
  /// Cached, younger than the staleness threshold.
  CacheFresh,
  /// Cached, older than the staleness threshold.
  CacheStale,
  /// Cached, served because we are offline.
  Offline,
}

/// A read result with its provenance.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
  pub data: T,
  pub source: DataSource,
  /// When the data was cached; None when it came straight off the network.
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> FetchOutcome<T> {
  fn from_network(data: T) -> Self {
    Self {
      data,
      source: DataSource::Network,
      cached_at: None,
    }
  }

  fn from_cache(entry: CacheEntry<T>, stale: bool) -> Self {
    Self {
      data: entry.data,
      source: if stale {
        DataSource::CacheStale
      } else {
        DataSource::CacheFresh
      },
      cached_at: Some(entry.written_at),
    }
  }

  fn offline(entry: CacheEntry<T>) -> Self {
    Self {
      data: entry.data,
      source: DataSource::Offline,
      cached_at: Some(entry.written_at),
    }
  }

  /// Whether the caller should flag this data as possibly outdated.
  pub fn is_stale(&self) -> bool {
    matches!(self.source, DataSource::CacheStale | DataSource::Offline)
  }
}

/// Retry schedule for explicit retry paths.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: RETRY_MAX_ATTEMPTS,
      base_delay: RETRY_BASE_DELAY,
      max_delay: RETRY_MAX_DELAY,
    }
  }
}

impl RetryPolicy {
  /// Exponential backoff: `base * 2^attempt`, capped at `max_delay`.
  fn delay_for(&self, attempt: u32) -> Duration {
    let multiplier = 1u64 << attempt.min(8);
    let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(multiplier);
    Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
  }
}

/// Wraps remote reads with the offline-first policy:
///
/// 1. Offline: serve the cached value (stale allowed), never touch the
///    network. No cached value is a `CacheMiss`.
/// 2. Online: one fetch attempt. Success writes through the cache and marks
///    the key fresh.
/// 3. Fetch failed while online: serve the cached value marked stale; only
///    with no cached value does the error surface.
///
/// The default read never retries. User-invoked retry paths go through
/// [`RequestAdapter::fetch_with_retry`].
#[derive(Clone)]
pub struct RequestAdapter {
  cache: Arc<CacheStore>,
  freshness: Arc<FreshnessTracker>,
  network: watch::Receiver<NetworkStatus>,
}

impl RequestAdapter {
  pub fn new(
    cache: Arc<CacheStore>,
    freshness: Arc<FreshnessTracker>,
    network: watch::Receiver<NetworkStatus>,
  ) -> Self {
    Self {
      cache,
      freshness,
      network,
    }
  }

  fn online(&self) -> bool {
    self.network.borrow().is_online
  }

  /// Guard for mutating calls. Offline writes are blocked outright, there
  /// is no outbox; callers surface the error and keep their local state.
  pub fn require_online(&self) -> Result<()> {
    if self.online() {
      Ok(())
    } else {
      Err(SyncError::NetworkUnavailable)
    }
  }

  /// Cache-aware remote read.
  ///
  /// `key` must encode every parameter that shapes the result (see
  /// `QueryKey`); `ttl` is the hard expiry written alongside the value.
  pub async fn fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<FetchOutcome<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if !self.online() {
      return self.serve_offline(key);
    }

    match fetcher().await {
      Ok(data) => {
        self.cache.set(key, &data, ttl)?;
        self.freshness.touch(key);
        Ok(FetchOutcome::from_network(data))
      }
      Err(err) => self.fallback_or(key, err),
    }
  }

  /// Remote read with bounded exponential-backoff retries.
  ///
  /// Connectivity is rechecked before every attempt; going offline aborts
  /// the loop and degrades to the offline policy. Client errors other than
  /// 429 are permanent and stop immediately.
  pub async fn fetch_with_retry<T, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    policy: RetryPolicy,
    fetcher: F,
  ) -> Result<FetchOutcome<T>>
  where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
      if attempt > 0 {
        let delay = policy.delay_for(attempt - 1);
        debug!(key, attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
        tokio::time::sleep(delay).await;
      }

      if !self.online() {
        warn!(key, "offline, aborting retries");
        return self.serve_offline(key);
      }

      match fetcher().await {
        Ok(data) => {
          self.cache.set(key, &data, ttl)?;
          self.freshness.touch(key);
          return Ok(FetchOutcome::from_network(data));
        }
        Err(err) => {
          if !err.is_retryable() || attempt + 1 == attempts {
            return self.fallback_or(key, err);
          }
          debug!(key, attempt, error = %err, "fetch attempt failed");
        }
      }
    }

    // Unreachable: the final attempt always returns above.
    Err(SyncError::FetchFailed {
      status: None,
      message: "retry loop exited unexpectedly".to_string(),
    })
  }

  /// Offline policy: cached value with stale reads allowed, else a miss.
  fn serve_offline<T: DeserializeOwned>(&self, key: &str) -> Result<FetchOutcome<T>> {
    match self.cache.get::<T>(key, true)? {
      Some(entry) => {
        debug!(key, "offline, serving cached value");
        Ok(FetchOutcome::offline(entry))
      }
      None => Err(SyncError::CacheMiss(key.to_string())),
    }
  }

  /// Online-but-failed policy: cached value marked by its real staleness,
  /// else the original error.
  fn fallback_or<T: DeserializeOwned>(&self, key: &str, err: SyncError) -> Result<FetchOutcome<T>> {
    match self.cache.get::<T>(key, true)? {
      Some(entry) => {
        warn!(key, error = %err, "fetch failed, serving cached fallback");
        let stale = entry.stale(Utc::now(), self.freshness.threshold());
        Ok(FetchOutcome::from_cache(entry, stale))
      }
      None => Err(err),
    }
  }
}
