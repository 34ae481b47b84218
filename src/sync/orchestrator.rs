//! Coordinated refresh: one batch of named callbacks, one flight at a time.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RefreshConfig;
use crate::constants::CALLBACK_TIMEOUT;
use crate::error::{Result, SyncError};
use crate::freshness::{FreshnessTracker, GLOBAL_KEY};
use crate::net::NetworkStatus;

/// Future returned by a refresh callback.
type RefreshFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A registered refresh callback.
type RefreshFn = Arc<dyn Fn() -> RefreshFuture + Send + Sync>;

/// What started a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
  Manual,
  Scheduled,
  Reconnect,
  BecameVisible,
}

impl fmt::Display for RefreshTrigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      RefreshTrigger::Manual => "manual",
      RefreshTrigger::Scheduled => "scheduled",
      RefreshTrigger::Reconnect => "reconnect",
      RefreshTrigger::BecameVisible => "became-visible",
    };
    f.write_str(name)
  }
}

/// Outcome of one refresh request.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
  /// Every callback settled; per-task results inside.
  Completed(CycleReport),
  /// We were offline: no callback was invoked, no freshness was touched.
  SkippedOffline,
  /// Another cycle was in flight; this trigger was dropped, not queued.
  AlreadyRefreshing,
}

impl CycleOutcome {
  pub fn report(&self) -> Option<&CycleReport> {
    match self {
      CycleOutcome::Completed(report) => Some(report),
      _ => None,
    }
  }
}

/// Per-task results of a completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
  pub trigger: RefreshTrigger,
  pub started_at: DateTime<Utc>,
  pub duration: Duration,
  /// Task name paired with its settled result, in registration order.
  pub results: Vec<(String, Result<()>)>,
}

impl CycleReport {
  pub fn total(&self) -> usize {
    self.results.len()
  }

  pub fn failed(&self) -> usize {
    self.results.iter().filter(|(_, r)| r.is_err()).count()
  }

  /// Summary error if any task failed; None for a clean cycle.
  pub fn partial_failure(&self) -> Option<SyncError> {
    match self.failed() {
      0 => None,
      failed => Some(SyncError::PartialRefreshFailure {
        failed,
        total: self.total(),
      }),
    }
  }
}

struct Registration {
  name: String,
  callback: RefreshFn,
}

struct OrchestratorInner {
  registry: Mutex<Vec<Registration>>,
  refreshing: AtomicBool,
  refreshing_tx: watch::Sender<bool>,
  freshness: Arc<FreshnessTracker>,
  network: watch::Receiver<NetworkStatus>,
  visibility: watch::Receiver<bool>,
  config: watch::Sender<RefreshConfig>,
  callback_timeout: Duration,
  timer: Mutex<Option<CancellationToken>>,
  shutdown: CancellationToken,
}

/// Refresh orchestrator.
///
/// Consumers register named callbacks; the orchestrator runs them as one
/// batch per cycle, with at most one cycle in flight. Triggers are manual
/// refresh, the configured timer, the offline→online edge, and the window
/// becoming visible again. A trigger that arrives mid-cycle is dropped,
/// never queued.
#[derive(Clone)]
pub struct RefreshOrchestrator {
  inner: Arc<OrchestratorInner>,
}

impl RefreshOrchestrator {
  pub fn new(
    freshness: Arc<FreshnessTracker>,
    network: watch::Receiver<NetworkStatus>,
    visibility: watch::Receiver<bool>,
    config: RefreshConfig,
  ) -> Self {
    let (refreshing_tx, _) = watch::channel(false);
    let (config_tx, _) = watch::channel(config);
    Self {
      inner: Arc::new(OrchestratorInner {
        registry: Mutex::new(Vec::new()),
        refreshing: AtomicBool::new(false),
        refreshing_tx,
        freshness,
        network,
        visibility,
        config: config_tx,
        callback_timeout: CALLBACK_TIMEOUT,
        timer: Mutex::new(None),
        shutdown: CancellationToken::new(),
      }),
    }
  }

  /// Register a named refresh callback.
  ///
  /// The callback must fetch through the request adapter (or otherwise
  /// write through the cache) so refreshed data lands durably. Registering
  /// an existing name replaces the callback but keeps its position; a cycle
  /// already in flight keeps the snapshot it started with.
  ///
  /// # Example
  ///
  /// ```ignore
  /// let adapter = engine.adapter();
  /// orchestrator.register("entries", move || {
  ///     let adapter = adapter.clone();
  ///     async move {
  ///         adapter.fetch("entries:today", ttl, fetch_today).await?;
  ///         Ok(())
  ///     }
  /// });
  /// ```
  pub fn register<F, Fut>(&self, name: &str, callback: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    let callback: RefreshFn = Arc::new(move || Box::pin(callback()));
    let mut registry = self.inner.lock_registry();
    match registry.iter_mut().find(|r| r.name == name) {
      Some(existing) => {
        debug!(name, "replacing refresh task");
        existing.callback = callback;
      }
      None => {
        debug!(name, "registered refresh task");
        registry.push(Registration {
          name: name.to_string(),
          callback,
        });
      }
    }
  }

  /// Remove a registration. No-op for unknown names.
  ///
  /// Does not cancel a cycle in flight; the removed callback may settle one
  /// last time from the snapshot that cycle took.
  pub fn unregister(&self, name: &str) {
    let mut registry = self.inner.lock_registry();
    let before = registry.len();
    registry.retain(|r| r.name != name);
    if registry.len() < before {
      debug!(name, "unregistered refresh task");
    }
  }

  /// Names currently registered, in registration order.
  pub fn registered(&self) -> Vec<String> {
    self
      .inner
      .lock_registry()
      .iter()
      .map(|r| r.name.clone())
      .collect()
  }

  /// Trigger a refresh cycle now.
  pub async fn refresh(&self) -> CycleOutcome {
    Arc::clone(&self.inner).run_cycle(RefreshTrigger::Manual).await
  }

  /// Whether a cycle is currently in flight.
  pub fn is_refreshing(&self) -> bool {
    self.inner.refreshing.load(Ordering::SeqCst)
  }

  /// Watch the in-flight flag (input to the derived sync view).
  pub fn refreshing_watch(&self) -> watch::Receiver<bool> {
    self.inner.refreshing_tx.subscribe()
  }

  /// Current refresh settings.
  pub fn config(&self) -> RefreshConfig {
    *self.inner.config.borrow()
  }

  /// Swap in new settings and re-arm or disarm the timer immediately.
  pub fn update_config(&self, config: RefreshConfig) {
    self.inner.config.send_replace(config);
    info!(
      enabled = config.enabled,
      interval = config.interval.label(),
      only_when_visible = config.only_when_visible,
      refresh_on_reconnect = config.refresh_on_reconnect,
      "refresh settings applied"
    );
    self.arm_timer();
  }

  /// Start the reconnect and visibility watchers and arm the timer.
  pub fn start(&self) {
    // Reconnect watcher. Refresh fires on the offline→online edge only;
    // the monitor reports levels, deciding what an edge means happens here.
    let inner = Arc::clone(&self.inner);
    let shutdown = self.inner.shutdown.clone();
    let mut network = self.inner.network.clone();
    tokio::spawn(async move {
      let mut was_online = network.borrow_and_update().is_online;
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => break,
          changed = network.changed() => {
            if changed.is_err() {
              break;
            }
          }
        }
        let online = network.borrow().is_online;
        if online && !was_online && inner.config.borrow().refresh_on_reconnect {
          info!("connectivity restored, refreshing");
          Arc::clone(&inner).run_cycle(RefreshTrigger::Reconnect).await;
        }
        was_online = online;
      }
    });

    // Visibility watcher: a hidden→visible edge runs the refreshes the
    // only-when-visible setting suppressed in the background.
    let inner = Arc::clone(&self.inner);
    let shutdown = self.inner.shutdown.clone();
    let mut visibility = self.inner.visibility.clone();
    tokio::spawn(async move {
      let mut was_visible = *visibility.borrow_and_update();
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => break,
          changed = visibility.changed() => {
            if changed.is_err() {
              break;
            }
          }
        }
        let visible = *visibility.borrow();
        if visible && !was_visible && inner.config.borrow().only_when_visible {
          debug!("window visible again, refreshing");
          Arc::clone(&inner).run_cycle(RefreshTrigger::BecameVisible).await;
        }
        was_visible = visible;
      }
    });

    self.arm_timer();
  }

  /// Stop watchers, the timer, and any future cycles.
  pub fn dispose(&self) {
    self.inner.shutdown.cancel();
  }

  /// (Re)arm the scheduled-refresh timer per the current settings.
  fn arm_timer(&self) {
    let mut slot = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(previous) = slot.take() {
      previous.cancel();
    }

    let config = *self.inner.config.borrow();
    let Some(period) = config.effective_period() else {
      debug!("scheduled refresh disarmed");
      return;
    };

    let token = self.inner.shutdown.child_token();
    let inner = Arc::clone(&self.inner);
    let task_token = token.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick fires immediately; a scheduled refresh should wait
      // a full period instead.
      interval.tick().await;
      loop {
        tokio::select! {
          _ = task_token.cancelled() => break,
          _ = interval.tick() => {
            if inner.config.borrow().only_when_visible && !*inner.visibility.borrow() {
              debug!("scheduled refresh skipped, window hidden");
              continue;
            }
            Arc::clone(&inner).run_cycle(RefreshTrigger::Scheduled).await;
          }
        }
      }
    });

    *slot = Some(token);
    info!(period_secs = period.as_secs(), "scheduled refresh armed");
  }
}

impl OrchestratorInner {
  fn lock_registry(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
    // Registrations are plain data; recovering from a poisoned lock is safe.
    self.registry.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Run one cycle. The body executes in a spawned task: dropping the
  /// returned future abandons the wait, not the cycle, and the in-flight
  /// flag always clears once the callbacks settle.
  async fn run_cycle(self: Arc<Self>, trigger: RefreshTrigger) -> CycleOutcome {
    if !self.network.borrow().is_online {
      info!(trigger = %trigger, "refresh skipped, offline");
      return CycleOutcome::SkippedOffline;
    }

    // Single flight: exactly one cycle at a time, losers drop their trigger.
    if self
      .refreshing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!(trigger = %trigger, "refresh already in flight, trigger dropped");
      return CycleOutcome::AlreadyRefreshing;
    }
    self.refreshing_tx.send_replace(true);

    let inner = Arc::clone(&self);
    let supervisor = tokio::spawn(async move { inner.settle_cycle(trigger).await });
    match supervisor.await {
      Ok(report) => CycleOutcome::Completed(report),
      Err(err) => {
        // The supervisor died before it could clear the flag; clear it
        // here. A double reset is harmless.
        self.refreshing.store(false, Ordering::SeqCst);
        self.refreshing_tx.send_replace(false);
        warn!(trigger = %trigger, error = %err, "refresh cycle task failed");
        CycleOutcome::Completed(CycleReport {
          trigger,
          started_at: Utc::now(),
          duration: Duration::ZERO,
          results: Vec::new(),
        })
      }
    }
  }

  /// Cycle body: snapshot the registry, settle every callback, publish
  /// completion, clear the in-flight flag.
  async fn settle_cycle(&self, trigger: RefreshTrigger) -> CycleReport {
    let snapshot: Vec<(String, RefreshFn)> = self
      .lock_registry()
      .iter()
      .map(|r| (r.name.clone(), Arc::clone(&r.callback)))
      .collect();

    let started_at = Utc::now();
    let started = Instant::now();
    info!(trigger = %trigger, tasks = snapshot.len(), "refresh cycle started");

    let tasks = snapshot.into_iter().map(|(name, callback)| {
      let timeout = self.callback_timeout;
      async move {
        // Each callback runs isolated: a hung one is aborted after the
        // timeout and a panicking one fails only its own slot.
        let mut task = tokio::spawn(callback());
        let result = match tokio::time::timeout(timeout, &mut task).await {
          Ok(Ok(result)) => result,
          Ok(Err(join_err)) => Err(SyncError::FetchFailed {
            status: None,
            message: format!("refresh task panicked: {}", join_err),
          }),
          Err(_) => {
            task.abort();
            Err(SyncError::FetchFailed {
              status: None,
              message: format!("refresh task timed out after {:?}", timeout),
            })
          }
        };
        (name, result)
      }
    });
    let results = join_all(tasks).await;

    for (name, result) in &results {
      if let Err(err) = result {
        warn!(task = %name, error = %err, "refresh task failed");
      }
    }

    // Cycle completion is global, partial failures included. Per-key
    // freshness was already touched by each successful write-through.
    self.freshness.touch(GLOBAL_KEY);
    self.refreshing.store(false, Ordering::SeqCst);
    self.refreshing_tx.send_replace(false);

    let report = CycleReport {
      trigger,
      started_at,
      duration: started.elapsed(),
      results,
    };
    match report.partial_failure() {
      Some(err) => warn!(trigger = %trigger, error = %err, "refresh cycle completed with failures"),
      None => info!(
        trigger = %trigger,
        duration_ms = report.duration.as_millis() as u64,
        "refresh cycle completed"
      ),
    }
    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::RefreshInterval;
  use crate::net::ConnectionQuality;
  use std::sync::atomic::AtomicU32;
  use tokio::time::{advance, sleep};

  fn status(online: bool) -> NetworkStatus {
    NetworkStatus {
      is_online: online,
      is_checking: false,
      last_checked: None,
      last_online: None,
      connection_quality: ConnectionQuality::Unknown,
      retry_count: 0,
    }
  }

  struct Harness {
    orchestrator: RefreshOrchestrator,
    freshness: Arc<FreshnessTracker>,
    network: watch::Sender<NetworkStatus>,
    visibility: watch::Sender<bool>,
  }

  fn harness(online: bool, config: RefreshConfig) -> Harness {
    let freshness = Arc::new(FreshnessTracker::new(Duration::from_secs(300)));
    let (network_tx, network_rx) = watch::channel(status(online));
    let (visibility_tx, visibility_rx) = watch::channel(true);
    let orchestrator = RefreshOrchestrator::new(
      Arc::clone(&freshness),
      network_rx,
      visibility_rx,
      config,
    );
    Harness {
      orchestrator,
      freshness,
      network: network_tx,
      visibility: visibility_tx,
    }
  }

  fn manual_config() -> RefreshConfig {
    RefreshConfig {
      enabled: false,
      interval: RefreshInterval::Manual,
      only_when_visible: false,
      refresh_on_reconnect: true,
    }
  }

  /// Register a callback that counts invocations and succeeds.
  fn register_counter(orchestrator: &RefreshOrchestrator, name: &str) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    orchestrator.register(name, move || {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    });
    calls
  }

  #[tokio::test]
  async fn test_manual_refresh_runs_all_tasks() {
    let h = harness(true, manual_config());
    let entries = register_counter(&h.orchestrator, "entries");
    let projects = register_counter(&h.orchestrator, "projects");

    let outcome = h.orchestrator.refresh().await;
    let report = outcome.report().expect("cycle should complete");

    assert_eq!(report.trigger, RefreshTrigger::Manual);
    assert_eq!(report.total(), 2);
    assert_eq!(report.failed(), 0);
    assert_eq!(entries.load(Ordering::SeqCst), 1);
    assert_eq!(projects.load(Ordering::SeqCst), 1);
    assert!(h.freshness.is_fresh(GLOBAL_KEY));
  }

  #[tokio::test]
  async fn test_offline_skip_invokes_nothing() {
    let h = harness(false, manual_config());
    let calls = register_counter(&h.orchestrator, "entries");

    let outcome = h.orchestrator.refresh().await;

    assert!(matches!(outcome, CycleOutcome::SkippedOffline));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.freshness.last_update(GLOBAL_KEY), None);
  }

  #[tokio::test]
  async fn test_empty_cycle_still_completes_and_touches_global() {
    let h = harness(true, manual_config());

    let outcome = h.orchestrator.refresh().await;

    let report = outcome.report().expect("cycle should complete");
    assert_eq!(report.total(), 0);
    assert!(h.freshness.is_fresh(GLOBAL_KEY));
  }

  #[tokio::test]
  async fn test_concurrent_triggers_collapse_to_one_flight() {
    let h = harness(true, manual_config());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    h.orchestrator.register("entries", move || {
      let counter = Arc::clone(&counter);
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(100)).await;
        Ok(())
      }
    });

    let mut handles = Vec::new();
    for _ in 0..5 {
      let orchestrator = h.orchestrator.clone();
      handles.push(tokio::spawn(async move { orchestrator.refresh().await }));
    }
    let outcomes: Vec<CycleOutcome> = join_all(handles)
      .await
      .into_iter()
      .map(|r| r.unwrap())
      .collect();

    let completed = outcomes
      .iter()
      .filter(|o| matches!(o, CycleOutcome::Completed(_)))
      .count();
    let dropped = outcomes
      .iter()
      .filter(|o| matches!(o, CycleOutcome::AlreadyRefreshing))
      .count();

    assert_eq!(completed, 1);
    assert_eq!(dropped, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!h.orchestrator.is_refreshing());
  }

  #[tokio::test]
  async fn test_abandoned_trigger_does_not_wedge_the_flight() {
    let h = harness(true, manual_config());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    h.orchestrator.register("entries", move || {
      let counter = Arc::clone(&counter);
      async move {
        sleep(Duration::from_millis(100)).await;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    });

    // Caller gives up on the trigger long before the callback settles.
    let abandoned =
      tokio::time::timeout(Duration::from_millis(20), h.orchestrator.refresh()).await;
    assert!(abandoned.is_err());
    assert!(h.orchestrator.is_refreshing());

    // The detached cycle still runs to completion and frees the flight.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!h.orchestrator.is_refreshing());
    assert!(!*h.orchestrator.refreshing_watch().borrow());
    assert!(h.freshness.is_fresh(GLOBAL_KEY));

    // The next trigger is not mistaken for an in-flight one.
    let outcome = h.orchestrator.refresh().await;
    assert!(matches!(outcome, CycleOutcome::Completed(_)));
  }

  #[tokio::test]
  async fn test_partial_failure_settles_every_task() {
    let h = harness(true, manual_config());
    let ok_calls = register_counter(&h.orchestrator, "projects");
    h.orchestrator.register("entries", || async {
      Err(SyncError::FetchFailed {
        status: Some(500),
        message: "boom".to_string(),
      })
    });

    let outcome = h.orchestrator.refresh().await;
    let report = outcome.report().expect("cycle should complete");

    // The failing task does not stop its sibling.
    assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
      report.partial_failure(),
      Some(SyncError::PartialRefreshFailure { failed: 1, total: 2 })
    ));
    // Completion is still global.
    assert!(h.freshness.is_fresh(GLOBAL_KEY));
    assert!(!h.orchestrator.is_refreshing());
  }

  #[tokio::test(start_paused = true)]
  async fn test_hung_callback_is_timed_out_not_the_cycle() {
    let h = harness(true, manual_config());
    let ok_calls = register_counter(&h.orchestrator, "projects");
    h.orchestrator.register("entries", || async {
      sleep(Duration::from_secs(3600)).await;
      Ok(())
    });

    let outcome = h.orchestrator.refresh().await;
    let report = outcome.report().expect("cycle should complete");

    assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.failed(), 1);
    let (_, result) = report
      .results
      .iter()
      .find(|(name, _)| name == "entries")
      .unwrap();
    assert!(result.as_ref().unwrap_err().to_string().contains("timed out"));
    assert!(!h.orchestrator.is_refreshing());
  }

  #[tokio::test]
  async fn test_reregistering_replaces_in_place() {
    let h = harness(true, manual_config());
    let first = register_counter(&h.orchestrator, "entries");
    register_counter(&h.orchestrator, "projects");
    let second = register_counter(&h.orchestrator, "entries");

    assert_eq!(h.orchestrator.registered(), vec!["entries", "projects"]);

    h.orchestrator.refresh().await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unregister_mid_cycle_keeps_the_snapshot() {
    let h = harness(true, manual_config());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    h.orchestrator.register("entries", move || {
      let counter = Arc::clone(&counter);
      async move {
        sleep(Duration::from_millis(100)).await;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    });

    let orchestrator = h.orchestrator.clone();
    let cycle = tokio::spawn(async move { orchestrator.refresh().await });
    sleep(Duration::from_millis(20)).await;
    h.orchestrator.unregister("entries");

    let outcome = cycle.await.unwrap();
    let report = outcome.report().expect("cycle should complete");
    assert_eq!(report.total(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.orchestrator.registered().is_empty());
  }

  #[tokio::test]
  async fn test_reconnect_edge_triggers_refresh() {
    let h = harness(true, manual_config());
    h.orchestrator.start();
    let calls = register_counter(&h.orchestrator, "entries");
    // Let the watcher record its starting level before we change it.
    sleep(Duration::from_millis(10)).await;

    // Same level again: no edge, no refresh.
    h.network.send(status(true)).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Offline then online: that is the edge.
    h.network.send(status(false)).unwrap();
    sleep(Duration::from_millis(50)).await;
    h.network.send(status(true)).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    h.orchestrator.dispose();
  }

  #[tokio::test]
  async fn test_reconnect_refresh_respects_setting() {
    let mut config = manual_config();
    config.refresh_on_reconnect = false;
    let h = harness(true, config);
    h.orchestrator.start();
    let calls = register_counter(&h.orchestrator, "entries");
    sleep(Duration::from_millis(10)).await;

    h.network.send(status(false)).unwrap();
    sleep(Duration::from_millis(50)).await;
    h.network.send(status(true)).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    h.orchestrator.dispose();
  }

  #[tokio::test(start_paused = true)]
  async fn test_scheduled_refresh_fires_each_period() {
    let config = RefreshConfig {
      enabled: true,
      interval: RefreshInterval::Min1,
      only_when_visible: false,
      refresh_on_reconnect: false,
    };
    let h = harness(true, config);
    let calls = register_counter(&h.orchestrator, "entries");
    h.orchestrator.start();
    // Let the timer task arm its interval before the clock moves.
    sleep(Duration::from_millis(1)).await;

    advance(Duration::from_secs(61)).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    advance(Duration::from_secs(60)).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    h.orchestrator.dispose();
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_config_rearms_the_timer() {
    let h = harness(true, manual_config());
    let calls = register_counter(&h.orchestrator, "entries");
    h.orchestrator.start();
    sleep(Duration::from_millis(1)).await;

    // Manual: no schedule, no matter how long we wait.
    advance(Duration::from_secs(300)).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let mut config = manual_config();
    config.enabled = true;
    config.interval = RefreshInterval::Min1;
    h.orchestrator.update_config(config);
    sleep(Duration::from_millis(1)).await;

    advance(Duration::from_secs(61)).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Disabling disarms immediately.
    config.enabled = false;
    h.orchestrator.update_config(config);
    advance(Duration::from_secs(600)).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    h.orchestrator.dispose();
  }

  #[tokio::test(start_paused = true)]
  async fn test_timer_skips_ticks_while_hidden() {
    let config = RefreshConfig {
      enabled: true,
      interval: RefreshInterval::Min1,
      only_when_visible: true,
      refresh_on_reconnect: false,
    };
    let h = harness(true, config);
    let calls = register_counter(&h.orchestrator, "entries");
    h.visibility.send(false).unwrap();
    h.orchestrator.start();
    sleep(Duration::from_millis(1)).await;

    advance(Duration::from_secs(121)).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    h.orchestrator.dispose();
  }

  #[tokio::test]
  async fn test_becoming_visible_runs_the_missed_refresh() {
    let config = RefreshConfig {
      enabled: false,
      interval: RefreshInterval::Manual,
      only_when_visible: true,
      refresh_on_reconnect: false,
    };
    let h = harness(true, config);
    h.visibility.send(false).unwrap();
    h.orchestrator.start();
    let calls = register_counter(&h.orchestrator, "entries");
    // Let the watcher record the hidden starting level first.
    sleep(Duration::from_millis(10)).await;

    h.visibility.send(true).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    h.orchestrator.dispose();
  }

  #[tokio::test]
  async fn test_refreshing_watch_toggles_around_cycle() {
    let h = harness(true, manual_config());
    h.orchestrator.register("entries", || async {
      sleep(Duration::from_millis(50)).await;
      Ok(())
    });
    let mut refreshing = h.orchestrator.refreshing_watch();
    assert!(!*refreshing.borrow());

    let orchestrator = h.orchestrator.clone();
    let cycle = tokio::spawn(async move { orchestrator.refresh().await });

    refreshing.changed().await.unwrap();
    assert!(*refreshing.borrow());

    cycle.await.unwrap();
    assert!(!*h.orchestrator.refreshing_watch().borrow());
  }
}
