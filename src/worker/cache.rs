//! Versioned HTTP response cache.
//!
//! Responses live in named generations keyed by a version string. The worker
//! serves from exactly one generation at a time; activation of a new
//! generation purges every other one in a single statement.

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use crate::cache::StoreError;

/// A cached HTTP response body.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

/// SQLite-backed response cache, keyed by `(generation, path)`.
pub struct ResponseCache {
  conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    generation TEXT NOT NULL,
    path_hash TEXT NOT NULL,
    path TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, path_hash)
);
"#;

/// SHA256 of the request path: stable, fixed-length row keys regardless of
/// how long the path and query get.
fn path_hash(path: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(path.as_bytes());
  hex::encode(hasher.finalize())
}

impl ResponseCache {
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    let conn = Connection::open(path)?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
    match self.conn.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// Store or overwrite the response for `path` in `generation`.
  pub fn put(
    &self,
    generation: &str,
    path: &str,
    response: &CachedResponse,
  ) -> Result<(), StoreError> {
    self.lock().execute(
      "INSERT OR REPLACE INTO response_cache
         (generation, path_hash, path, status, content_type, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        path_hash(path),
        path,
        response.status,
        response.content_type,
        response.body,
      ],
    )?;
    Ok(())
  }

  /// Look up the response for `path` in `generation`.
  pub fn get(&self, generation: &str, path: &str) -> Result<Option<CachedResponse>, StoreError> {
    let conn = self.lock();
    let mut stmt = conn.prepare(
      "SELECT status, content_type, body FROM response_cache
       WHERE generation = ? AND path_hash = ?",
    )?;

    let row = stmt
      .query_row(params![generation, path_hash(path)], |row| {
        Ok(CachedResponse {
          status: row.get::<_, u16>(0)?,
          content_type: row.get(1)?,
          body: row.get(2)?,
        })
      })
      .ok();

    Ok(row)
  }

  /// True when every one of `paths` is present in `generation`.
  pub fn has_all(&self, generation: &str, paths: &[String]) -> Result<bool, StoreError> {
    for path in paths {
      if self.get(generation, path)?.is_none() {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Delete every entry outside `current`. Returns the number of rows
  /// removed.
  pub fn purge_other_generations(&self, current: &str) -> Result<usize, StoreError> {
    let removed = self.lock().execute(
      "DELETE FROM response_cache WHERE generation != ?",
      params![current],
    )?;
    Ok(removed)
  }

  /// Distinct generations that still hold entries.
  pub fn generations(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock();
    let mut stmt =
      conn.prepare("SELECT DISTINCT generation FROM response_cache ORDER BY generation")?;
    let generations = stmt
      .query_map([], |row| row.get::<_, String>(0))?
      .filter_map(|r| r.ok())
      .collect();
    Ok(generations)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(body: &str) -> CachedResponse {
    CachedResponse {
      status: 200,
      content_type: Some("text/html".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_then_get_roundtrip() {
    let cache = ResponseCache::open_in_memory().unwrap();
    cache.put("v1", "/index.html", &response("home")).unwrap();

    let cached = cache.get("v1", "/index.html").unwrap().unwrap();
    assert_eq!(cached, response("home"));
  }

  #[test]
  fn test_generations_are_isolated() {
    let cache = ResponseCache::open_in_memory().unwrap();
    cache.put("v1", "/index.html", &response("old")).unwrap();

    assert!(cache.get("v2", "/index.html").unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_same_path() {
    let cache = ResponseCache::open_in_memory().unwrap();
    cache.put("v1", "/app.js", &response("one")).unwrap();
    cache.put("v1", "/app.js", &response("two")).unwrap();

    let cached = cache.get("v1", "/app.js").unwrap().unwrap();
    assert_eq!(cached.body, b"two");
  }

  #[test]
  fn test_purge_leaves_exactly_one_generation() {
    let cache = ResponseCache::open_in_memory().unwrap();
    cache.put("v1", "/index.html", &response("a")).unwrap();
    cache.put("v2", "/index.html", &response("b")).unwrap();
    cache.put("v3", "/index.html", &response("c")).unwrap();

    let removed = cache.purge_other_generations("v3").unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cache.generations().unwrap(), vec!["v3".to_string()]);
    assert_eq!(cache.get("v3", "/index.html").unwrap().unwrap().body, b"c");
  }

  #[test]
  fn test_has_all() {
    let cache = ResponseCache::open_in_memory().unwrap();
    cache.put("v1", "/", &response("home")).unwrap();
    cache.put("v1", "/offline.html", &response("offline")).unwrap();

    let all = vec!["/".to_string(), "/offline.html".to_string()];
    let missing = vec!["/".to_string(), "/styles.css".to_string()];
    assert!(cache.has_all("v1", &all).unwrap());
    assert!(!cache.has_all("v1", &missing).unwrap());
  }

  #[test]
  fn test_query_strings_produce_distinct_entries() {
    let cache = ResponseCache::open_in_memory().unwrap();
    cache.put("v1", "/api/history?limit=1", &response("one")).unwrap();
    cache.put("v1", "/api/history?limit=2", &response("two")).unwrap();

    assert_eq!(
      cache.get("v1", "/api/history?limit=1").unwrap().unwrap().body,
      b"one"
    );
  }
}
