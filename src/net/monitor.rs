//! Connectivity monitoring: passive platform signal merged with active
//! probes against the configured server.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::probe::{ping_url, ProbeTransport};
use crate::constants::{HEARTBEAT_INTERVAL, SLOW_PROBE_THRESHOLD};
use crate::error::SyncError;

/// Reported link quality, derived from probe latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionQuality {
  Fast,
  Slow,
  #[default]
  Unknown,
}

/// Snapshot of current connectivity.
///
/// Snapshots are replaced whole through a watch channel, so consumers can
/// never observe one field updated and another not.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStatus {
  pub is_online: bool,
  /// A probe is currently in flight.
  pub is_checking: bool,
  /// When the last probe completed, success or not.
  pub last_checked: Option<DateTime<Utc>>,
  /// When connectivity was last confirmed. Monotonically non-decreasing;
  /// only set when `is_online` becomes true.
  pub last_online: Option<DateTime<Utc>>,
  pub connection_quality: ConnectionQuality,
  /// Consecutive failed probes since the last success.
  pub retry_count: u32,
}

impl NetworkStatus {
  fn initial(online: bool) -> Self {
    Self {
      is_online: online,
      is_checking: false,
      last_checked: None,
      last_online: online.then(Utc::now),
      connection_quality: ConnectionQuality::Unknown,
      retry_count: 0,
    }
  }
}

struct MonitorInner {
  transport: Arc<dyn ProbeTransport>,
  base_url: watch::Receiver<String>,
  passive: watch::Receiver<bool>,
  status: watch::Sender<NetworkStatus>,
  probe_timeout: Duration,
  shutdown: CancellationToken,
}

/// Network-state detector.
///
/// Platform connectivity events apply immediately; active probes against
/// `<base>?__ping=<epoch-ms>` confirm or correct them. The monitor only
/// reports state, it never decides what to do about a transition. That is
/// the refresh orchestrator's job.
#[derive(Clone)]
pub struct NetworkMonitor {
  inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
  pub fn new(
    transport: Arc<dyn ProbeTransport>,
    base_url: watch::Receiver<String>,
    passive: watch::Receiver<bool>,
    probe_timeout: Duration,
  ) -> Self {
    let initial = NetworkStatus::initial(*passive.borrow());
    let (status_tx, _) = watch::channel(initial);
    Self {
      inner: Arc::new(MonitorInner {
        transport,
        base_url,
        passive,
        status: status_tx,
        probe_timeout,
        shutdown: CancellationToken::new(),
      }),
    }
  }

  /// Current snapshot.
  pub fn status(&self) -> NetworkStatus {
    self.inner.status.borrow().clone()
  }

  /// Subscribe to status changes.
  pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
    self.inner.status.subscribe()
  }

  /// Run one probe with a hard timeout and return the resulting online
  /// verdict.
  ///
  /// True only for a 2xx answer within `timeout`. A non-2xx answer is a
  /// definitive offline verdict (the server is reachable but failing); a
  /// timeout or transport error falls back to the platform's passive flag.
  /// This never errors.
  pub async fn check_now(&self, timeout: Duration) -> bool {
    self.inner.check_now(timeout).await
  }

  /// Spawn the passive-event pump and the probe heartbeat.
  pub fn start(&self) {
    // Passive pump: platform events apply immediately, the next probe
    // confirms or corrects.
    let inner = Arc::clone(&self.inner);
    let shutdown = self.inner.shutdown.clone();
    let mut passive = self.inner.passive.clone();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => break,
          changed = passive.changed() => {
            if changed.is_err() {
              break;
            }
            let online = *passive.borrow();
            debug!(online, "platform connectivity event");
            inner.apply_passive(online);
          }
        }
      }
    });

    // Heartbeat: while the platform claims online, probe periodically to
    // catch servers that are unreachable behind a live link.
    let inner = Arc::clone(&self.inner);
    let shutdown = self.inner.shutdown.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
      // The immediate first tick duplicates the engine's startup probe.
      interval.tick().await;
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => break,
          _ = interval.tick() => {
            if *inner.passive.borrow() {
              inner.check_now(inner.probe_timeout).await;
            }
          }
        }
      }
    });
  }

  /// Stop background tasks. The last published status remains readable.
  pub fn dispose(&self) {
    self.inner.shutdown.cancel();
  }
}

impl MonitorInner {
  async fn check_now(&self, timeout: Duration) -> bool {
    let passive = *self.passive.borrow();
    let base = self.base_url.borrow().clone();

    let Some(url) = ping_url(&base) else {
      debug!(base = %base, "probe url unbuildable, trusting platform flag");
      self.apply_passive(passive);
      return passive;
    };

    self.status.send_modify(|status| status.is_checking = true);

    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, self.transport.probe(&url)).await;

    let (online, quality, probe_failed) = match outcome {
      Ok(Ok(true)) => {
        let quality = if started.elapsed() > SLOW_PROBE_THRESHOLD {
          ConnectionQuality::Slow
        } else {
          ConnectionQuality::Fast
        };
        (true, Some(quality), false)
      }
      Ok(Ok(false)) => {
        debug!("probe answered non-2xx, marking offline");
        (false, None, true)
      }
      Ok(Err(e)) => {
        debug!(error = %e, passive, "probe transport error, trusting platform flag");
        (passive, None, true)
      }
      Err(_) => {
        let err = SyncError::ProbeTimeout(timeout);
        debug!(error = %err, passive, "trusting platform flag");
        (passive, None, true)
      }
    };

    self.finish_check(online, quality, probe_failed);
    online
  }

  /// Apply a probe result as one complete snapshot.
  fn finish_check(&self, online: bool, quality: Option<ConnectionQuality>, probe_failed: bool) {
    let now = Utc::now();
    self.status.send_modify(|status| {
      if online && !status.is_online {
        status.last_online = Some(now);
      }
      status.is_online = online;
      status.is_checking = false;
      status.last_checked = Some(now);
      if let Some(quality) = quality {
        status.connection_quality = quality;
      }
      if probe_failed {
        status.retry_count += 1;
      } else {
        status.retry_count = 0;
      }
    });
  }

  /// Apply the platform flag without probing.
  fn apply_passive(&self, online: bool) {
    let now = Utc::now();
    self.status.send_modify(|status| {
      if online && !status.is_online {
        status.last_online = Some(now);
      }
      status.is_online = online;
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Result;
  use async_trait::async_trait;
  use std::collections::VecDeque;
  use std::sync::Mutex;
  use tokio::time::sleep;
  use url::Url;

  /// Probe transport that replays a script of outcomes, then succeeds.
  struct ScriptedProbe {
    outcomes: Mutex<VecDeque<Result<bool>>>,
    calls: Mutex<u32>,
  }

  impl ScriptedProbe {
    fn new(outcomes: Vec<Result<bool>>) -> Self {
      Self {
        outcomes: Mutex::new(outcomes.into()),
        calls: Mutex::new(0),
      }
    }

    fn calls(&self) -> u32 {
      *self.calls.lock().unwrap()
    }
  }

  #[async_trait]
  impl ProbeTransport for ScriptedProbe {
    async fn probe(&self, _url: &Url) -> Result<bool> {
      *self.calls.lock().unwrap() += 1;
      self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }
  }

  /// Probe transport that never resolves, to exercise the timeout path.
  struct HangingProbe;

  #[async_trait]
  impl ProbeTransport for HangingProbe {
    async fn probe(&self, _url: &Url) -> Result<bool> {
      std::future::pending().await
    }
  }

  fn transport_error() -> SyncError {
    SyncError::FetchFailed {
      status: None,
      message: "connection refused".to_string(),
    }
  }

  fn monitor_with(
    transport: Arc<dyn ProbeTransport>,
    passive_online: bool,
  ) -> (NetworkMonitor, watch::Sender<String>, watch::Sender<bool>) {
    let (base_tx, base_rx) = watch::channel("https://track.example.com".to_string());
    let (passive_tx, passive_rx) = watch::channel(passive_online);
    let monitor = NetworkMonitor::new(transport, base_rx, passive_rx, Duration::from_millis(100));
    (monitor, base_tx, passive_tx)
  }

  #[tokio::test]
  async fn test_probe_success_marks_online() {
    let transport = Arc::new(ScriptedProbe::new(vec![Ok(true)]));
    let (monitor, _base, _passive) = monitor_with(transport, false);

    assert!(monitor.check_now(Duration::from_millis(100)).await);

    let status = monitor.status();
    assert!(status.is_online);
    assert!(!status.is_checking);
    assert!(status.last_checked.is_some());
    assert!(status.last_online.is_some());
    assert_eq!(status.connection_quality, ConnectionQuality::Fast);
    assert_eq!(status.retry_count, 0);
  }

  #[tokio::test]
  async fn test_non_2xx_is_a_definitive_offline_verdict() {
    let transport = Arc::new(ScriptedProbe::new(vec![Ok(false)]));
    // Platform flag says online; a reachable-but-failing server overrides it.
    let (monitor, _base, _passive) = monitor_with(transport, true);

    assert!(!monitor.check_now(Duration::from_millis(100)).await);
    let status = monitor.status();
    assert!(!status.is_online);
    assert_eq!(status.retry_count, 1);
  }

  #[tokio::test]
  async fn test_transport_error_falls_back_to_passive_flag() {
    let transport = Arc::new(ScriptedProbe::new(vec![
      Err(transport_error()),
      Err(transport_error()),
    ]));
    let (monitor, _base, passive) = monitor_with(transport, true);

    assert!(monitor.check_now(Duration::from_millis(100)).await);
    assert!(monitor.status().is_online);

    passive.send(false).unwrap();
    assert!(!monitor.check_now(Duration::from_millis(100)).await);
    assert!(!monitor.status().is_online);
    assert_eq!(monitor.status().retry_count, 2);
  }

  #[tokio::test]
  async fn test_timeout_falls_back_to_passive_flag() {
    let (monitor, _base, _passive) = monitor_with(Arc::new(HangingProbe), false);

    let started = Instant::now();
    assert!(!monitor.check_now(Duration::from_millis(50)).await);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(monitor.status().last_checked.is_some());
  }

  #[tokio::test]
  async fn test_unbuildable_base_trusts_passive_flag() {
    let transport = Arc::new(ScriptedProbe::new(vec![]));
    let (monitor, base, _passive) = monitor_with(Arc::clone(&transport) as Arc<dyn ProbeTransport>, true);
    base.send("not a url".to_string()).unwrap();

    assert!(monitor.check_now(Duration::from_millis(100)).await);
    // No probe was issued.
    assert_eq!(transport.calls(), 0);
    assert!(monitor.status().last_checked.is_none());
  }

  #[tokio::test]
  async fn test_passive_events_apply_immediately() {
    let transport = Arc::new(ScriptedProbe::new(vec![]));
    let (monitor, _base, passive) = monitor_with(transport, true);
    monitor.start();

    passive.send(false).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(!monitor.status().is_online);

    passive.send(true).unwrap();
    sleep(Duration::from_millis(50)).await;
    let status = monitor.status();
    assert!(status.is_online);
    assert!(status.last_online.is_some());

    monitor.dispose();
  }

  #[tokio::test]
  async fn test_last_online_only_moves_on_transition() {
    let transport = Arc::new(ScriptedProbe::new(vec![]));
    let (monitor, _base, _passive) = monitor_with(transport, false);

    assert!(monitor.check_now(Duration::from_millis(100)).await);
    let first = monitor.status().last_online.unwrap();

    sleep(Duration::from_millis(20)).await;
    // Still online: the timestamp must not advance.
    assert!(monitor.check_now(Duration::from_millis(100)).await);
    assert_eq!(monitor.status().last_online.unwrap(), first);
  }

  #[tokio::test(start_paused = true)]
  async fn test_heartbeat_probes_while_platform_online() {
    let transport = Arc::new(ScriptedProbe::new(vec![]));
    let (monitor, _base, _passive) =
      monitor_with(Arc::clone(&transport) as Arc<dyn ProbeTransport>, true);
    monitor.start();
    // Let the heartbeat task arm its interval before moving the clock.
    sleep(Duration::from_millis(1)).await;

    tokio::time::advance(HEARTBEAT_INTERVAL + Duration::from_secs(1)).await;
    sleep(Duration::from_millis(10)).await;
    assert!(transport.calls() >= 1);

    monitor.dispose();
  }

  #[tokio::test(start_paused = true)]
  async fn test_heartbeat_skips_probe_while_platform_offline() {
    let transport = Arc::new(ScriptedProbe::new(vec![]));
    let (monitor, _base, _passive) =
      monitor_with(Arc::clone(&transport) as Arc<dyn ProbeTransport>, false);
    monitor.start();
    sleep(Duration::from_millis(1)).await;

    tokio::time::advance(HEARTBEAT_INTERVAL + Duration::from_secs(1)).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.calls(), 0);

    monitor.dispose();
  }
}
