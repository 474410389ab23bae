//! Durable offline record store.
//!
//! One record per key, serialized as JSON, with a freshness window applied on
//! read: a record older than `max_age` is reported as absent but left on disk
//! until the next successful write replaces it.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Errors from the persistent store. These never escape the data access
/// layer: callers treat a failed `get` as a miss and a failed `put` as a
/// skipped write.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("storage error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode record: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("invalid stored timestamp '{0}'")]
  Timestamp(String),
}

/// Whether durable storage can be used at all in this environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAvailability {
  Available,
  Unavailable,
  /// No data directory could be determined for this platform.
  Unknown,
}

/// Probe whether `dir` can back a store. The directory is created if needed.
pub fn probe_storage(dir: Option<&Path>) -> StorageAvailability {
  match dir {
    None => StorageAvailability::Unknown,
    Some(dir) => match std::fs::create_dir_all(dir) {
      Ok(()) => StorageAvailability::Available,
      Err(_) => StorageAvailability::Unavailable,
    },
  }
}

/// A record read back from the store.
#[derive(Debug, Clone)]
pub struct StoredRecord<T> {
  pub payload: T,
  pub stored_at: DateTime<Utc>,
}

/// Storage backend for offline records.
pub trait RecordStore: Send + Sync {
  /// Store or replace the record for `key`.
  fn put<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), StoreError>;

  /// Get the record for `key`, if one exists and is inside the freshness
  /// window.
  fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<StoredRecord<T>>, StoreError>;

  /// Delete every record.
  fn delete_all(&self) -> Result<(), StoreError>;
}

/// Store used when durable storage is unavailable: writes are discarded and
/// reads always miss, so the caller's fallback chain keeps functioning.
pub struct NoopStore;

impl RecordStore for NoopStore {
  fn put<T: Serialize>(&self, _key: &str, _payload: &T) -> Result<(), StoreError> {
    Ok(())
  }

  fn get<T: DeserializeOwned>(&self, _key: &str) -> Result<Option<StoredRecord<T>>, StoreError> {
    Ok(None)
  }

  fn delete_all(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

/// SQLite-backed record store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  max_age: Duration,
}

/// Schema is created lazily on first open; `IF NOT EXISTS` keeps the upgrade
/// step idempotent.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_records (
    record_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStore {
  /// Open (or create) a store at `path`.
  pub fn open(path: &Path, max_age: Duration) -> Result<Self, StoreError> {
    let conn = Connection::open(path)?;
    Self::from_connection(conn, max_age)
  }

  /// Open a store backed by a private in-memory database.
  pub fn open_in_memory(max_age: Duration) -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()?;
    Self::from_connection(conn, max_age)
  }

  fn from_connection(conn: Connection, max_age: Duration) -> Result<Self, StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
      max_age,
    })
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
    // A poisoned lock means another thread panicked mid-statement; the
    // connection itself is still usable for our single-statement calls.
    match self.conn.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// Rewrite the stored timestamp for `key`, for tests that need to age a
  /// record past the freshness window.
  #[cfg(test)]
  fn backdate(&self, key: &str, age: Duration) {
    let stored_at = (Utc::now() - age).format("%Y-%m-%d %H:%M:%S").to_string();
    self
      .lock()
      .execute(
        "UPDATE analysis_records SET stored_at = ? WHERE record_key = ?",
        params![stored_at, key],
      )
      .unwrap();
  }
}

impl RecordStore for SqliteStore {
  fn put<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec(payload)?;
    self.lock().execute(
      "INSERT OR REPLACE INTO analysis_records (record_key, payload, stored_at)
       VALUES (?, ?, datetime('now'))",
      params![key, data],
    )?;
    Ok(())
  }

  fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<StoredRecord<T>>, StoreError> {
    let conn = self.lock();
    let mut stmt =
      conn.prepare("SELECT payload, stored_at FROM analysis_records WHERE record_key = ?")?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
      .ok();

    let Some((data, stored_at_str)) = row else {
      return Ok(None);
    };

    let stored_at = parse_datetime(&stored_at_str)?;
    if Utc::now() - stored_at >= self.max_age {
      // Outside the freshness window: report absent, leave the row for the
      // next successful write to replace.
      return Ok(None);
    }

    let payload: T = serde_json::from_slice(&data)?;
    Ok(Some(StoredRecord { payload, stored_at }))
  }

  fn delete_all(&self) -> Result<(), StoreError> {
    self.lock().execute("DELETE FROM analysis_records", [])?;
    Ok(())
  }
}

/// Offline store selected by storage availability: SQLite when the data
/// directory is usable, a no-op otherwise. Construction never fails.
pub enum OfflineStore {
  Sqlite(SqliteStore),
  Noop(NoopStore),
}

impl OfflineStore {
  /// Open a SQLite store at `path` when storage is available, falling back
  /// to the no-op store otherwise.
  pub fn open_or_noop(
    availability: StorageAvailability,
    path: &Path,
    max_age: Duration,
  ) -> Self {
    if availability != StorageAvailability::Available {
      tracing::warn!(?availability, "durable storage unavailable, offline records disabled");
      return Self::Noop(NoopStore);
    }

    match SqliteStore::open(path, max_age) {
      Ok(store) => Self::Sqlite(store),
      Err(err) => {
        tracing::warn!(path = %path.display(), error = %err, "failed to open offline store, records disabled");
        Self::Noop(NoopStore)
      }
    }
  }

  pub fn is_durable(&self) -> bool {
    matches!(self, Self::Sqlite(_))
  }
}

impl RecordStore for OfflineStore {
  fn put<T: Serialize>(&self, key: &str, payload: &T) -> Result<(), StoreError> {
    match self {
      Self::Sqlite(store) => store.put(key, payload),
      Self::Noop(store) => store.put(key, payload),
    }
  }

  fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<StoredRecord<T>>, StoreError> {
    match self {
      Self::Sqlite(store) => store.get(key),
      Self::Noop(store) => store.get(key),
    }
  }

  fn delete_all(&self) -> Result<(), StoreError> {
    match self {
      Self::Sqlite(store) => store.delete_all(),
      Self::Noop(store) => store.delete_all(),
    }
  }
}

/// Parse a datetime string in SQLite's `datetime('now')` format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| StoreError::Timestamp(s.to_string()))
}
