use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::constants::PROBE_TIMEOUT;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  /// Override for the engine's data directory (cache database + settings).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base address probes and fetches are issued against.
  pub url: String,
  /// Probe timeout override in milliseconds.
  pub probe_timeout_ms: Option<u64>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stint.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stint/config.yaml
  /// 4. ~/.config/stint/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(SyncError::Config(
        "no configuration file found. Create one at ~/.config/stint/config.yaml\n\
         See config.example.yaml for the format."
          .to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("stint.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stint").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      SyncError::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
      SyncError::Config(format!("failed to parse config file {}: {}", path.display(), e))
    })?;

    Ok(config)
  }

  /// Probe timeout, falling back to the built-in default.
  pub fn probe_timeout(&self) -> Duration {
    self
      .server
      .probe_timeout_ms
      .map(Duration::from_millis)
      .unwrap_or(PROBE_TIMEOUT)
  }
}

/// User-selectable auto-refresh cadence.
///
/// A fixed menu rather than a free-form duration keeps the settings surface
/// a simple picker; `Manual` disables the timer entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshInterval {
  #[serde(rename = "manual")]
  Manual,
  #[serde(rename = "1m")]
  Min1,
  #[default]
  #[serde(rename = "5m")]
  Min5,
  #[serde(rename = "15m")]
  Min15,
  #[serde(rename = "30m")]
  Min30,
  #[serde(rename = "1h")]
  Hour1,
}

impl RefreshInterval {
  /// Timer period, or None for manual-only operation.
  pub fn period(self) -> Option<Duration> {
    match self {
      RefreshInterval::Manual => None,
      RefreshInterval::Min1 => Some(Duration::from_secs(60)),
      RefreshInterval::Min5 => Some(Duration::from_secs(5 * 60)),
      RefreshInterval::Min15 => Some(Duration::from_secs(15 * 60)),
      RefreshInterval::Min30 => Some(Duration::from_secs(30 * 60)),
      RefreshInterval::Hour1 => Some(Duration::from_secs(60 * 60)),
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      RefreshInterval::Manual => "Manual",
      RefreshInterval::Min1 => "1 minute",
      RefreshInterval::Min5 => "5 minutes",
      RefreshInterval::Min15 => "15 minutes",
      RefreshInterval::Min30 => "30 minutes",
      RefreshInterval::Hour1 => "1 hour",
    }
  }
}

/// User-facing refresh settings.
///
/// Persisted as JSON under the data directory and applied reactively: an
/// update re-arms or disarms the refresh scheduler without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
  pub enabled: bool,
  pub interval: RefreshInterval,
  /// Skip scheduled refreshes while the app window is hidden.
  pub only_when_visible: bool,
  /// Trigger a refresh when connectivity returns after an offline period.
  pub refresh_on_reconnect: bool,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      interval: RefreshInterval::Min5,
      only_when_visible: true,
      refresh_on_reconnect: true,
    }
  }
}

impl RefreshConfig {
  /// Effective timer period: None when disabled or manual.
  pub fn effective_period(&self) -> Option<Duration> {
    if !self.enabled {
      return None;
    }
    self.interval.period()
  }

  /// Load persisted settings, falling back to defaults when the file is
  /// missing or unreadable. A corrupt settings file must never prevent the
  /// engine from starting.
  pub fn load(path: &Path) -> Self {
    match std::fs::read_to_string(path) {
      Ok(contents) => match serde_json::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
          warn!(path = %path.display(), error = %e, "unreadable refresh settings, using defaults");
          Self::default()
        }
      },
      Err(_) => Self::default(),
    }
  }

  /// Persist settings as pretty-printed JSON.
  pub fn save(&self, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Config(format!("failed to create settings directory: {}", e)))?;
    }
    let contents = serde_json::to_string_pretty(self)
      .map_err(|e| SyncError::Config(format!("failed to serialize settings: {}", e)))?;
    std::fs::write(path, contents)
      .map_err(|e| SyncError::Config(format!("failed to write settings: {}", e)))?;
    Ok(())
  }
}

/// Where refresh settings live, relative to the engine's data directory.
pub fn settings_path(data_dir: &Path) -> PathBuf {
  data_dir.join("settings.json")
}
