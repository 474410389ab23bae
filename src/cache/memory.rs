//! In-memory cache with TTL expiry and a periodic sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

struct Entry<T> {
  value: T,
  stored_at: Instant,
}

/// Map from key to value with a time-to-live.
///
/// `get` re-checks the entry's age, so an expired entry is never returned
/// even if the sweep has not caught up with it yet. The sweep runs on its own
/// interval and only exists to keep the map from accumulating dead entries;
/// it is decoupled from the read path on purpose.
pub struct MemoryCache<T> {
  entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
  ttl: Duration,
  sweeper: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> MemoryCache<T> {
  /// Create a cache without a sweep task. Entries still expire on read.
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      ttl,
      sweeper: None,
    }
  }

  /// Create a cache and spawn its sweep task on the current runtime.
  ///
  /// The task is aborted when the cache is dropped.
  pub fn with_sweeper(ttl: Duration, sweep_interval: Duration) -> Self {
    let mut cache = Self::new(ttl);

    let entries = Arc::clone(&cache.entries);
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(sweep_interval);
      // The first tick fires immediately; skip it so a fresh cache isn't
      // swept before anything is inserted.
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let evicted = sweep(&entries, ttl);
        if evicted > 0 {
          tracing::debug!(evicted, "memory cache sweep evicted expired entries");
        }
      }
    });
    cache.sweeper = Some(handle);

    cache
  }

  /// Get a value if a fresh entry exists for `key`.
  ///
  /// An expired entry behaves as absent but is left in place for the sweep.
  pub fn get(&self, key: &str) -> Option<T> {
    let entries = self.entries.lock().ok()?;
    let entry = entries.get(key)?;
    if entry.stored_at.elapsed() < self.ttl {
      Some(entry.value.clone())
    } else {
      None
    }
  }

  /// Insert or refresh a value for `key`.
  pub fn set(&self, key: &str, value: T) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.insert(
        key.to_string(),
        Entry {
          value,
          stored_at: Instant::now(),
        },
      );
    }
  }

  /// Remove all entries.
  pub fn clear(&self) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.clear();
    }
  }

  /// Number of entries currently held, expired ones included.
  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  /// Evict every expired entry now, without waiting for the sweep interval.
  #[allow(dead_code)]
  pub fn evict_expired(&self) -> usize {
    sweep(&self.entries, self.ttl)
  }
}

fn sweep<T>(entries: &Mutex<HashMap<String, Entry<T>>>, ttl: Duration) -> usize {
  let Ok(mut entries) = entries.lock() else {
    return 0;
  };
  let before = entries.len();
  entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
  before - entries.len()
}

impl<T> Drop for MemoryCache<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.sweeper.take() {
      handle.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_get_returns_fresh_entry() {
    let cache = MemoryCache::new(Duration::from_secs(60));
    cache.set("10115", 42u32);
    assert_eq!(cache.get("10115"), Some(42));
    assert_eq!(cache.get("99999"), None);
  }

  #[tokio::test]
  async fn test_expired_entry_behaves_as_absent_without_eviction() {
    let cache = MemoryCache::new(Duration::from_millis(20));
    cache.set("10115", 1u32);

    tokio::time::sleep(Duration::from_millis(40)).await;

    // The read path hides the entry but does not remove it.
    assert_eq!(cache.get("10115"), None);
    assert_eq!(cache.len(), 1);
  }

  #[tokio::test]
  async fn test_sweep_evicts_only_expired_entries() {
    let cache = MemoryCache::new(Duration::from_millis(30));
    cache.set("old", 1u32);

    tokio::time::sleep(Duration::from_millis(40)).await;
    cache.set("new", 2u32);

    assert_eq!(cache.evict_expired(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("new"), Some(2));
  }

  #[tokio::test]
  async fn test_sweep_task_runs_periodically() {
    let cache = MemoryCache::with_sweeper(Duration::from_millis(10), Duration::from_millis(20));
    cache.set("10115", 1u32);

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(cache.len(), 0);
  }

  #[tokio::test]
  async fn test_sweep_tolerates_empty_cache() {
    let cache: MemoryCache<u32> = MemoryCache::new(Duration::from_millis(10));
    assert_eq!(cache.evict_expired(), 0);
  }

  #[tokio::test]
  async fn test_clear_removes_everything() {
    let cache = MemoryCache::new(Duration::from_secs(60));
    cache.set("a", 1u32);
    cache.set("b", 2u32);
    cache.clear();
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.get("a"), None);
  }

  #[tokio::test]
  async fn test_set_refreshes_stored_at() {
    let cache = MemoryCache::new(Duration::from_millis(50));
    cache.set("10115", 1u32);

    tokio::time::sleep(Duration::from_millis(30)).await;
    cache.set("10115", 2u32);
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The refresh reset the clock, so the entry is still fresh.
    assert_eq!(cache.get("10115"), Some(2));
  }
}
