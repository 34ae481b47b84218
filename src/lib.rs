//! Offline-aware synchronization engine for the Stint time tracker.
//!
//! Stint keeps working when the network does not. This crate is the layer
//! that makes that true: it decides whether we are really online, keeps a
//! durable cache of server data, tracks how fresh that data is, and runs
//! coordinated refreshes with one flight in the air at a time. The UI shell
//! on top only ever reads derived state; it never talks to the network
//! directly.
//!
//! The moving parts:
//!
//! - [`net::NetworkMonitor`] combines passive platform events with active
//!   probes against the server for an online verdict you can trust.
//! - [`cache::CacheStore`] persists JSON payloads in SQLite with TTL expiry
//!   and opt-in stale reads.
//! - [`freshness::FreshnessTracker`] records per-key fetch times and derives
//!   the single [`freshness::SyncView`] status surfaces render.
//! - [`sync::RequestAdapter`] wraps every remote read in the offline-first
//!   policy: cached data offline, write-through online, stale fallback on
//!   failure.
//! - [`sync::RefreshOrchestrator`] runs registered refresh callbacks on
//!   manual, scheduled, reconnect, and became-visible triggers.
//!
//! # Example
//!
//! ```ignore
//! let env = HeadlessEnvironment::new(None);
//! let config = Config::load(None)?;
//! let engine = SyncEngine::start(config, &env).await?;
//!
//! let adapter = engine.adapter();
//! engine.register("entries", move || {
//!     let adapter = adapter.clone();
//!     async move {
//!         adapter
//!             .fetch("entries:today", DEFAULT_TTL, || fetch_today())
//!             .await?;
//!         Ok(())
//!     }
//! });
//!
//! engine.refresh().await;
//! println!("{:?}", engine.view());
//! ```

pub mod cache;
pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod freshness;
pub mod model;
pub mod net;
pub mod sync;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub use crate::config::{Config, RefreshConfig, RefreshInterval};
pub use crate::env::{DesktopEnvironment, Environment, HeadlessEnvironment, SignalHandle};
pub use crate::error::{Result, SyncError};
pub use crate::freshness::{FreshnessTracker, SyncView};
pub use crate::net::{NetworkMonitor, NetworkStatus};
pub use crate::sync::{CycleOutcome, DataSource, FetchOutcome, RefreshOrchestrator, RequestAdapter};

use crate::cache::{CacheStorage, CacheStore, SqliteStorage};
use crate::config::settings_path;
use crate::constants::STALE_THRESHOLD;
use crate::freshness::SyncViewFeed;
use crate::net::{HttpProbe, ProbeTransport};

/// The assembled engine.
///
/// Construction wires the monitor, cache, freshness tracker, orchestrator,
/// and adapter together, starts the background tasks, and runs one probe so
/// the first status snapshot is a real verdict rather than an optimistic
/// default. Everything hands out clones or watch receivers; the engine
/// itself can live in a shared handle.
pub struct SyncEngine {
  config: Config,
  data_dir: PathBuf,
  base_url: watch::Sender<String>,
  cache: Arc<CacheStore>,
  monitor: NetworkMonitor,
  orchestrator: RefreshOrchestrator,
  adapter: RequestAdapter,
  feed: SyncViewFeed,
}

impl SyncEngine {
  /// Start the engine with the production SQLite cache and HTTP probe.
  pub async fn start(config: Config, env: &dyn Environment) -> Result<Self> {
    let data_dir = match &config.data_dir {
      Some(dir) => dir.clone(),
      None => env.data_dir()?,
    };
    let storage = Arc::new(SqliteStorage::open(&data_dir)?);
    let transport = Arc::new(HttpProbe::new(config.probe_timeout())?);
    Self::start_with(config, env, data_dir, storage, transport).await
  }

  /// Start the engine with injected storage and probe transport.
  pub async fn start_with(
    config: Config,
    env: &dyn Environment,
    data_dir: PathBuf,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn ProbeTransport>,
  ) -> Result<Self> {
    let cache = Arc::new(CacheStore::new(storage));
    let freshness = Arc::new(FreshnessTracker::new(STALE_THRESHOLD));

    let (base_url_tx, base_url_rx) = watch::channel(config.server.url.clone());
    let monitor = NetworkMonitor::new(
      transport,
      base_url_rx,
      env.connectivity(),
      config.probe_timeout(),
    );

    let refresh_config = RefreshConfig::load(&settings_path(&data_dir));
    let orchestrator = RefreshOrchestrator::new(
      Arc::clone(&freshness),
      monitor.subscribe(),
      env.visibility(),
      refresh_config,
    );

    let adapter = RequestAdapter::new(
      Arc::clone(&cache),
      Arc::clone(&freshness),
      monitor.subscribe(),
    );
    let feed = SyncViewFeed::spawn(
      Arc::clone(&freshness),
      monitor.subscribe(),
      orchestrator.refreshing_watch(),
    );

    monitor.start();
    orchestrator.start();

    // First verdict up front: everything until now ran on the platform's
    // optimistic flag.
    let online = monitor.check_now(config.probe_timeout()).await;
    info!(
      platform = env.platform(),
      online,
      data_dir = %data_dir.display(),
      "sync engine started"
    );

    Ok(Self {
      config,
      data_dir,
      base_url: base_url_tx,
      cache,
      monitor,
      orchestrator,
      adapter,
      feed,
    })
  }

  /// Handle for making offline-aware reads. Cheap to clone.
  pub fn adapter(&self) -> RequestAdapter {
    self.adapter.clone()
  }

  /// The network monitor, for status subscriptions and manual checks.
  pub fn network(&self) -> &NetworkMonitor {
    &self.monitor
  }

  /// Current network snapshot.
  pub fn status(&self) -> NetworkStatus {
    self.monitor.status()
  }

  /// Run one connectivity probe now and return the verdict.
  pub async fn check_now(&self) -> bool {
    self.monitor.check_now(self.config.probe_timeout()).await
  }

  /// Current derived sync view.
  pub fn view(&self) -> SyncView {
    self.feed.current()
  }

  /// Subscribe to sync-view changes.
  pub fn subscribe_view(&self) -> watch::Receiver<SyncView> {
    self.feed.subscribe()
  }

  /// Register a named refresh callback with the orchestrator.
  pub fn register<F, Fut>(&self, name: &str, callback: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    self.orchestrator.register(name, callback);
  }

  /// Remove a refresh callback.
  pub fn unregister(&self, name: &str) {
    self.orchestrator.unregister(name);
  }

  /// Trigger a refresh cycle now.
  pub async fn refresh(&self) -> CycleOutcome {
    self.orchestrator.refresh().await
  }

  /// Current refresh settings.
  pub fn refresh_config(&self) -> RefreshConfig {
    self.orchestrator.config()
  }

  /// Apply new refresh settings and persist them.
  ///
  /// The scheduler is re-armed immediately; the settings file is written
  /// afterwards, so a persistence failure leaves the new settings active
  /// for this run.
  pub fn update_refresh_config(&self, config: RefreshConfig) -> Result<()> {
    self.orchestrator.update_config(config);
    config.save(&settings_path(&self.data_dir))
  }

  /// Point probes at a different server without a restart.
  pub fn update_base_url(&self, url: &str) {
    info!(url = %url, "probe base url updated");
    self.base_url.send_replace(url.to_string());
  }

  /// Drop a single cached entry. Used to invalidate one query after a
  /// local mutation.
  pub fn evict(&self, key: &str) -> Result<()> {
    self.cache.evict(key)
  }

  /// Drop every cached entry whose key starts with `prefix`.
  pub fn evict_prefix(&self, prefix: &str) -> Result<usize> {
    self.cache.evict_prefix(prefix)
  }

  /// Stop all background tasks. Reads of the last published state still
  /// work afterwards; fetches degrade to whatever the cache holds.
  pub fn dispose(&self) {
    self.feed.dispose();
    self.orchestrator.dispose();
    self.monitor.dispose();
  }
}
