//! Cache storage trait and its SQLite and in-memory implementations.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::entry::{StoredEntry, KEY_NAMESPACE};
use crate::error::{Result, SyncError};

/// Storage backend for the durable cache.
///
/// Backends persist raw JSON rows under namespaced keys. Serialization and
/// expiry policy live in `CacheStore`; a backend only moves bytes.
pub trait CacheStorage: Send + Sync {
  /// Insert or overwrite a row.
  fn put(&self, entry: &StoredEntry) -> Result<()>;

  /// Look up a row by logical key.
  fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

  /// Delete a row. Deleting an absent key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// Delete every row whose logical key starts with `prefix`.
  /// Returns the number of rows removed.
  fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

fn namespaced(key: &str) -> String {
  format!("{}{}", KEY_NAMESPACE, key)
}

/// SQLite-backed storage: one row per entry, keyed by the namespaced key.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database under the given data directory.
  pub fn open(data_dir: &Path) -> Result<Self> {
    std::fs::create_dir_all(data_dir)
      .map_err(|e| SyncError::Storage(format!("failed to create cache directory: {}", e)))?;

    let path = data_dir.join("cache.db");
    let conn = Connection::open(&path).map_err(|e| {
      SyncError::Storage(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// In-memory SQLite database, for tests that want the real SQL path.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| SyncError::Storage(format!("failed to open in-memory database: {}", e)))?;
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| SyncError::Storage(format!("failed to run cache migrations: {}", e)))?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::Storage(format!("lock poisoned: {}", e)))
  }
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at INTEGER NOT NULL,
    ttl_ms INTEGER NOT NULL
);
"#;

/// Escape LIKE metacharacters so a prefix is matched literally.
fn like_escape(prefix: &str) -> String {
  prefix
    .replace('\\', "\\\\")
    .replace('%', "\\%")
    .replace('_', "\\_")
}

impl CacheStorage for SqliteStorage {
  fn put(&self, entry: &StoredEntry) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (key, value, written_at, ttl_ms)
         VALUES (?, ?, ?, ?)",
        params![
          namespaced(&entry.key),
          entry.value,
          entry.written_at_ms,
          entry.ttl_ms
        ],
      )
      .map_err(|e| SyncError::Storage(format!("failed to store cache entry: {}", e)))?;
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT value, written_at, ttl_ms FROM cache_entries WHERE key = ?",
        params![namespaced(key)],
        |row| {
          Ok(StoredEntry {
            key: key.to_string(),
            value: row.get(0)?,
            written_at_ms: row.get(1)?,
            ttl_ms: row.get(2)?,
          })
        },
      )
      .optional()
      .map_err(|e| SyncError::Storage(format!("failed to read cache entry: {}", e)))?;
    Ok(row)
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE key = ?",
        params![namespaced(key)],
      )
      .map_err(|e| SyncError::Storage(format!("failed to remove cache entry: {}", e)))?;
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    let conn = self.lock()?;
    let pattern = format!("{}%", like_escape(&namespaced(prefix)));
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE key LIKE ? ESCAPE '\\'",
        params![pattern],
      )
      .map_err(|e| SyncError::Storage(format!("failed to remove cache prefix: {}", e)))?;
    Ok(removed)
  }
}

/// In-memory storage, for tests and for running with caching disabled.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| SyncError::Storage(format!("lock poisoned: {}", e)))
  }
}

impl CacheStorage for MemoryStorage {
  fn put(&self, entry: &StoredEntry) -> Result<()> {
    self
      .lock()?
      .insert(namespaced(&entry.key), entry.clone());
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
    Ok(self.lock()?.get(&namespaced(key)).cloned())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.lock()?.remove(&namespaced(key));
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    let mut entries = self.lock()?;
    let prefix = namespaced(prefix);
    let before = entries.len();
    entries.retain(|key, _| !key.starts_with(&prefix));
    Ok(before - entries.len())
  }
}
