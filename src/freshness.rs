//! Per-key freshness accounting and the derived view consumers read.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::net::NetworkStatus;

/// Reserved key touched once per completed orchestrated refresh cycle.
pub const GLOBAL_KEY: &str = "global";

/// Tracks, per logical key, when data was last successfully updated.
///
/// Staleness here is advisory, unlike the cache's hard TTL: a stale key
/// still serves data, surfaces just flag it as outdated. A key with no
/// record counts as infinitely old and is therefore always stale.
pub struct FreshnessTracker {
  records: Mutex<HashMap<String, DateTime<Utc>>>,
  threshold: Duration,
  changed: watch::Sender<u64>,
}

impl FreshnessTracker {
  pub fn new(threshold: Duration) -> Self {
    let (changed, _) = watch::channel(0);
    Self {
      records: Mutex::new(HashMap::new()),
      threshold,
      changed,
    }
  }

  /// Record a successful update of `key` happening now.
  pub fn touch(&self, key: &str) {
    let now = Utc::now();
    self
      .records
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(key.to_string(), now);
    self.changed.send_modify(|n| *n += 1);
  }

  pub fn last_update(&self, key: &str) -> Option<DateTime<Utc>> {
    self
      .records
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(key)
      .copied()
  }

  /// Time since the last update; None means never updated.
  pub fn age(&self, key: &str) -> Option<Duration> {
    self.age_at(key, Utc::now())
  }

  pub fn age_at(&self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
    self
      .last_update(key)
      .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
  }

  /// Stale = never updated, or updated at least a threshold ago.
  pub fn is_stale(&self, key: &str) -> bool {
    self.is_stale_at(key, Utc::now())
  }

  pub fn is_stale_at(&self, key: &str, now: DateTime<Utc>) -> bool {
    match self.age_at(key, now) {
      None => true,
      Some(age) => age >= self.threshold,
    }
  }

  pub fn is_fresh(&self, key: &str) -> bool {
    !self.is_stale(key)
  }

  pub fn threshold(&self) -> Duration {
    self.threshold
  }

  /// Change notifications; the value is a bump counter.
  pub fn changes(&self) -> watch::Receiver<u64> {
    self.changed.subscribe()
  }
}

/// The one view UI consumers read.
///
/// Derived from the global freshness record, the orchestrator's in-flight
/// flag, and the monitor's online flag. Consumers must not copy individual
/// fields into state of their own; that reintroduces exactly the
/// inconsistency this type exists to prevent.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncView {
  pub last_update: Option<DateTime<Utc>>,
  pub is_fresh: bool,
  pub is_stale: bool,
  pub age: Option<Duration>,
  pub is_refreshing: bool,
  pub is_online: bool,
}

impl SyncView {
  /// Short "32s ago" / "5m ago" label for status surfaces.
  pub fn last_update_label(&self) -> Option<String> {
    self.age.map(|age| {
      let secs = age.as_secs();
      if secs < 60 {
        format!("{}s ago", secs)
      } else if secs < 3600 {
        format!("{}m ago", secs / 60)
      } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
      } else {
        format!("{}d ago", secs / 86400)
      }
    })
  }
}

/// Pure combinator producing the consumer-facing view.
pub fn derive_view(
  last_update: Option<DateTime<Utc>>,
  threshold: Duration,
  is_refreshing: bool,
  is_online: bool,
  now: DateTime<Utc>,
) -> SyncView {
  let age = last_update.map(|at| (now - at).to_std().unwrap_or(Duration::ZERO));
  let is_stale = match age {
    None => true,
    Some(age) => age >= threshold,
  };
  SyncView {
    last_update,
    is_fresh: !is_stale,
    is_stale,
    age,
    is_refreshing,
    is_online,
  }
}

/// Recomputes the derived view whenever any input changes and fans it out
/// through a watch channel.
pub struct SyncViewFeed {
  view: watch::Receiver<SyncView>,
  shutdown: CancellationToken,
}

impl SyncViewFeed {
  /// Spawn the feed task over its three inputs.
  pub fn spawn(
    tracker: Arc<FreshnessTracker>,
    mut network: watch::Receiver<NetworkStatus>,
    mut refreshing: watch::Receiver<bool>,
  ) -> Self {
    let initial = derive_view(
      tracker.last_update(GLOBAL_KEY),
      tracker.threshold(),
      *refreshing.borrow(),
      network.borrow().is_online,
      Utc::now(),
    );
    let (view_tx, view_rx) = watch::channel(initial);
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    let mut freshness = tracker.changes();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          changed = freshness.changed() => {
            if changed.is_err() {
              break;
            }
          }
          changed = network.changed() => {
            if changed.is_err() {
              break;
            }
          }
          changed = refreshing.changed() => {
            if changed.is_err() {
              break;
            }
          }
        }
        let view = derive_view(
          tracker.last_update(GLOBAL_KEY),
          tracker.threshold(),
          *refreshing.borrow(),
          network.borrow().is_online,
          Utc::now(),
        );
        // Identical recomputations are swallowed, not fanned out.
        view_tx.send_if_modified(|current| {
          if *current == view {
            false
          } else {
            *current = view;
            true
          }
        });
      }
    });

    Self {
      view: view_rx,
      shutdown,
    }
  }

  /// Current derived view.
  pub fn current(&self) -> SyncView {
    self.view.borrow().clone()
  }

  /// Subscribe to view changes.
  pub fn subscribe(&self) -> watch::Receiver<SyncView> {
    self.view.clone()
  }

  /// Stop the feed task. The last published view remains readable.
  pub fn dispose(&self) {
    self.shutdown.cancel();
  }
}
