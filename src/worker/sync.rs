//! Durable queue of analytics events awaiting delivery.
//!
//! Events that could not be sent are buffered here and replayed in FIFO
//! order once connectivity returns. A replay deletes each entry only after
//! its send succeeds; the first failure halts that replay without touching
//! the remaining entries, so nothing is reordered or dropped.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::cache::StoreError;
use crate::net::FetchClient;

/// One buffered event.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
  pub id: i64,
  pub payload: serde_json::Value,
}

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
  pub sent: usize,
  pub remaining: usize,
}

/// SQLite-backed FIFO queue.
pub struct SyncQueue {
  conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SyncQueue {
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

  /// Append an event to the end of the queue.
  pub fn enqueue(&self, payload: &serde_json::Value) -> Result<i64, StoreError> {
    let conn = self.lock();
    conn.execute(
      "INSERT INTO sync_queue (payload) VALUES (?)",
      params![serde_json::to_string(payload)?],
    )?;
    Ok(conn.last_insert_rowid())
  }

  /// Every queued event, oldest first.
  pub fn pending(&self) -> Result<Vec<QueuedEvent>, StoreError> {
    let conn = self.lock();
    let mut stmt = conn.prepare("SELECT id, payload FROM sync_queue ORDER BY id")?;
    let rows: Vec<(i64, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
      .filter_map(|r| r.ok())
      .collect();

    let mut events = Vec::with_capacity(rows.len());
    for (id, payload) in rows {
      events.push(QueuedEvent {
        id,
        payload: serde_json::from_str(&payload)?,
      });
    }
    Ok(events)
  }

  pub fn delete(&self, id: i64) -> Result<(), StoreError> {
    self
      .lock()
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
    Ok(())
  }

  pub fn len(&self) -> Result<usize, StoreError> {
    let count: i64 = self
      .lock()
      .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
    Ok(count as usize)
  }
}

/// Replay the queue against `endpoint`, oldest event first.
///
/// Each event gets a single delivery attempt; the queue itself is the retry
/// mechanism, so a failed send simply leaves the event (and everything
/// behind it) for the next replay trigger.
pub async fn drain(queue: &SyncQueue, fetch: &FetchClient, endpoint: &str) -> ReplayOutcome {
  let events = match queue.pending() {
    Ok(events) => events,
    Err(err) => {
      tracing::warn!(error = %err, "could not read sync queue");
      return ReplayOutcome {
        sent: 0,
        remaining: 0,
      };
    }
  };

  let total = events.len();
  let mut sent = 0;

  for event in events {
    match fetch.post_ack(endpoint, &event.payload).await {
      Ok(()) => {
        if let Err(err) = queue.delete(event.id) {
          // The event was delivered but not dequeued; stop rather than risk
          // sending later events ahead of a duplicate of this one.
          tracing::warn!(id = event.id, error = %err, "failed to dequeue delivered event");
          break;
        }
        sent += 1;
      }
      Err(err) => {
        tracing::debug!(id = event.id, error = %err, "replay halted, event stays queued");
        break;
      }
    }
  }

  if sent > 0 {
    tracing::info!(sent, remaining = total - sent, "replayed buffered events");
  }

  ReplayOutcome {
    sent,
    remaining: total - sent,
  }
}
