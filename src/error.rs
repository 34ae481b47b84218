//! Error taxonomy for the synchronization engine.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors produced by the synchronization engine.
///
/// Every variant is recoverable wherever a cached fallback exists. The only
/// one expected to reach a user surface is `CacheMiss` while offline, which
/// renders as a "no data" placeholder rather than a failure.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
  /// We are offline; no network attempt was made.
  #[error("network unavailable")]
  NetworkUnavailable,

  /// The connectivity probe did not answer within its timeout.
  #[error("connectivity probe timed out after {0:?}")]
  ProbeTimeout(Duration),

  /// A fetch failed while we were online.
  /// `status` is present for HTTP-level failures and absent for transport
  /// errors, which matters for retry classification.
  #[error("fetch failed: {message}")]
  FetchFailed { status: Option<u16>, message: String },

  /// No cached value for the key (absent, or expired with stale reads
  /// disallowed).
  #[error("no cached value for {0}")]
  CacheMiss(String),

  /// A stored payload failed to deserialize. The entry is evicted and the
  /// lookup reports a miss; this variant only ever appears in logs.
  #[error("corrupt cache entry for {0}")]
  CacheCorrupt(String),

  /// One or more callbacks failed during an orchestrated refresh cycle.
  #[error("{failed} of {total} refresh tasks failed")]
  PartialRefreshFailure { failed: usize, total: usize },

  /// The durable store misbehaved (I/O, SQL, lock poisoning).
  #[error("cache storage error: {0}")]
  Storage(String),

  /// Configuration could not be loaded or is unusable.
  #[error("configuration error: {0}")]
  Config(String),
}

impl SyncError {
  /// Whether an explicit retry path should try again after this error.
  ///
  /// Client errors are permanent, with 429 as the one exception. Transport
  /// errors, timeouts, and server errors are transient. Everything that is
  /// not a fetch failure aborts the retry loop.
  pub fn is_retryable(&self) -> bool {
    match self {
      SyncError::FetchFailed { status: Some(status), .. } => {
        *status == 429 || !(400..500).contains(status)
      }
      SyncError::FetchFailed { status: None, .. } => true,
      SyncError::ProbeTimeout(_) => true,
      _ => false,
    }
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(err: reqwest::Error) -> Self {
    SyncError::FetchFailed {
      status: err.status().map(|s| s.as_u16()),
      message: err.to_string(),
    }
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(err: rusqlite::Error) -> Self {
    SyncError::Storage(err.to_string())
  }
}
