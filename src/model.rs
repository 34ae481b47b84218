//! Payload types the engine synchronizes for the Stint client.
//!
//! These mirror the server's JSON wire format (camelCase). They are separate
//! from any UI state so cached payloads stay readable across app versions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::QueryKey;
use crate::constants::SESSION_VALIDITY_WINDOW;

/// A completed or running time entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
  pub id: String,
  pub title: String,
  pub project_id: Option<String>,
  pub started_at: DateTime<Utc>,
  /// None while the entry is still running.
  pub stopped_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub tags: Vec<String>,
}

impl TimeEntry {
  /// Recorded duration; running entries are measured against `now`.
  pub fn duration(&self, now: DateTime<Utc>) -> Duration {
    let end = self.stopped_at.unwrap_or(now);
    (end - self.started_at).to_std().unwrap_or(Duration::ZERO)
  }
}

/// A project entries can be booked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub archived: bool,
}

/// The timer currently running on the server, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
  pub entry_id: String,
  pub title: String,
  pub started_at: DateTime<Utc>,
}

impl ActiveSession {
  /// Elapsed time since the session started.
  pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
    (now - self.started_at).to_std().unwrap_or(Duration::ZERO)
  }

  /// Whether a cached copy of this session may still be displayed while
  /// offline.
  ///
  /// A session cached before going offline may have been stopped from
  /// another device; past the validity window we hide it rather than show a
  /// timer that has plausibly been running for a whole workday. The cached
  /// record itself stays put so the stop is reconciled on reconnect.
  pub fn displayable_offline(&self, now: DateTime<Utc>) -> bool {
    self.elapsed(now) <= SESSION_VALIDITY_WINDOW
  }
}

// ============================================================================
// Entry list filters
// ============================================================================

/// Date window an entry list is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeRange {
  #[default]
  Today,
  ThisWeek,
  Custom {
    from: NaiveDate,
    to: NaiveDate,
  },
}

/// Sort applied to an entry list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
  #[default]
  StartedDesc,
  StartedAsc,
  DurationDesc,
}

impl SortOrder {
  fn as_str(&self) -> &'static str {
    match self {
      SortOrder::StartedDesc => "started_desc",
      SortOrder::StartedAsc => "started_asc",
      SortOrder::DurationDesc => "duration_desc",
    }
  }
}

/// Query parameters for an entry list.
///
/// Every field participates in the cache key: two filters that could return
/// different result sets must never share a cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryFilter {
  pub range: TimeRange,
  pub sort: SortOrder,
  pub project_id: Option<String>,
  /// Opaque pagination cursor from the previous page's response.
  pub cursor: Option<String>,
}

impl QueryKey for EntryFilter {
  fn family(&self) -> &'static str {
    "entries"
  }

  fn params(&self) -> String {
    // Server-issued ids and cursors are opaque and may embed the delimiter
    // text; length-prefixing keeps the concatenation injective.
    fn opaque(value: Option<&str>) -> String {
      match value {
        Some(v) => format!("{}:{}", v.len(), v),
        None => "-".to_string(),
      }
    }
    let range = match self.range {
      TimeRange::Today => "today".to_string(),
      TimeRange::ThisWeek => "this_week".to_string(),
      TimeRange::Custom { from, to } => format!("custom:{}..{}", from, to),
    };
    format!(
      "range={}|sort={}|project={}|cursor={}",
      range,
      self.sort.as_str(),
      opaque(self.project_id.as_deref()),
      opaque(self.cursor.as_deref())
    )
  }

  fn description(&self) -> String {
    format!("entries ({})", self.params())
  }
}
