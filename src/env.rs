//! Platform capability interface.
//!
//! The engine never branches on where it runs. Everything platform-specific,
//! passive connectivity events, window visibility, and where durable state
//! lives, arrives through this trait. The desktop shell owns the real signal
//! sources; the headless variant serves the bundled monitor binary and any
//! environment without a window.

use std::path::PathBuf;
use tokio::sync::watch;

use crate::error::{Result, SyncError};

/// Capabilities the host platform provides to the engine.
pub trait Environment: Send + Sync + 'static {
  /// Short platform tag for logs.
  fn platform(&self) -> &'static str;

  /// Directory for durable engine state (cache database, settings).
  fn data_dir(&self) -> Result<PathBuf>;

  /// Passive connectivity flag as last reported by the platform.
  /// This is a hint; active probes have the final word.
  fn connectivity(&self) -> watch::Receiver<bool>;

  /// Whether the app window is currently visible.
  fn visibility(&self) -> watch::Receiver<bool>;
}

/// Environment backed by a desktop shell that forwards its window and
/// network events through a [`SignalHandle`].
pub struct DesktopEnvironment {
  data_dir: Option<PathBuf>,
  connectivity: watch::Receiver<bool>,
  visibility: watch::Receiver<bool>,
}

/// The shell's side of a [`DesktopEnvironment`]: push platform events here.
pub struct SignalHandle {
  connectivity: watch::Sender<bool>,
  visibility: watch::Sender<bool>,
}

impl SignalHandle {
  pub fn set_online(&self, online: bool) {
    let _ = self.connectivity.send(online);
  }

  pub fn set_visible(&self, visible: bool) {
    let _ = self.visibility.send(visible);
  }
}

impl DesktopEnvironment {
  /// Create the environment plus the handle the shell feeds events into.
  ///
  /// Both signals start optimistic (online, visible); the shell corrects
  /// them as soon as it knows better.
  pub fn new(data_dir: Option<PathBuf>) -> (Self, SignalHandle) {
    let (connectivity_tx, connectivity_rx) = watch::channel(true);
    let (visibility_tx, visibility_rx) = watch::channel(true);
    (
      Self {
        data_dir,
        connectivity: connectivity_rx,
        visibility: visibility_rx,
      },
      SignalHandle {
        connectivity: connectivity_tx,
        visibility: visibility_tx,
      },
    )
  }
}

impl Environment for DesktopEnvironment {
  fn platform(&self) -> &'static str {
    "desktop"
  }

  fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    default_data_dir()
  }

  fn connectivity(&self) -> watch::Receiver<bool> {
    self.connectivity.clone()
  }

  fn visibility(&self) -> watch::Receiver<bool> {
    self.visibility.clone()
  }
}

/// Environment with no window and no platform network events: connectivity
/// knowledge comes entirely from active probes.
pub struct HeadlessEnvironment {
  data_dir: Option<PathBuf>,
  // Senders are retained so the channels stay open for the engine's lifetime.
  _connectivity_tx: watch::Sender<bool>,
  _visibility_tx: watch::Sender<bool>,
  connectivity: watch::Receiver<bool>,
  visibility: watch::Receiver<bool>,
}

impl HeadlessEnvironment {
  pub fn new(data_dir: Option<PathBuf>) -> Self {
    let (connectivity_tx, connectivity_rx) = watch::channel(true);
    let (visibility_tx, visibility_rx) = watch::channel(true);
    Self {
      data_dir,
      _connectivity_tx: connectivity_tx,
      _visibility_tx: visibility_tx,
      connectivity: connectivity_rx,
      visibility: visibility_rx,
    }
  }
}

impl Environment for HeadlessEnvironment {
  fn platform(&self) -> &'static str {
    "headless"
  }

  fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    default_data_dir()
  }

  fn connectivity(&self) -> watch::Receiver<bool> {
    self.connectivity.clone()
  }

  fn visibility(&self) -> watch::Receiver<bool> {
    self.visibility.clone()
  }
}

/// Default data directory: `<platform data dir>/stint`.
fn default_data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| SyncError::Config("could not determine data directory".to_string()))?;
  Ok(data_dir.join("stint"))
}
