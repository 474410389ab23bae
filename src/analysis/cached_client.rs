//! Data access layer: memory cache, offline store, network, fallback.

use thiserror::Error;

use crate::cache::{MemoryCache, OfflineStore, RecordStore};
use crate::connectivity::ConnectivityMonitor;
use crate::net::FetchError;

use super::client::AnalysisClient;
use super::fallback::demo_report;
use super::types::{AnalysisOutcome, AnalysisReport, DataSource};

#[derive(Debug, Error)]
pub enum AnalysisError {
  /// The device is offline and no usable stored report exists for the key.
  #[error("offline and no stored report for {0}")]
  OfflineUnavailable(String),

  /// A network failure that fallback data does not cover (timeouts, server
  /// errors, malformed responses).
  #[error(transparent)]
  Fetch(#[from] FetchError),
}

/// Analysis client with transparent caching and offline support.
///
/// Answer order for `fetch_analysis`: memory cache, then (when offline) the
/// durable store, then the network. Successful network responses populate
/// both caches; a pure connectivity failure degrades to a deterministic
/// demo report instead of an error.
pub struct CachedAnalysisClient {
  inner: AnalysisClient,
  memory: MemoryCache<AnalysisReport>,
  store: OfflineStore,
  connectivity: ConnectivityMonitor,
}

impl CachedAnalysisClient {
  pub fn new(
    inner: AnalysisClient,
    memory: MemoryCache<AnalysisReport>,
    store: OfflineStore,
    connectivity: ConnectivityMonitor,
  ) -> Self {
    Self {
      inner,
      memory,
      store,
      connectivity,
    }
  }

  /// Get the analysis report for a postal-code key.
  ///
  /// `force_refresh` skips the memory cache; it does not skip the offline
  /// store when the device is offline.
  pub async fn fetch_analysis(
    &self,
    key: &str,
    force_refresh: bool,
  ) -> Result<AnalysisOutcome, AnalysisError> {
    let key = normalize_key(key);

    if !force_refresh {
      if let Some(report) = self.memory.get(&key) {
        tracing::debug!(key = %key, "analysis served from memory cache");
        return Ok(AnalysisOutcome {
          report,
          source: DataSource::MemoryCache,
        });
      }
    }

    if !self.connectivity.is_online() {
      return self.offline_lookup(&key);
    }

    match self.inner.fetch_report(&key).await {
      Ok(report) => {
        self.memory.set(&key, report.clone());
        // Best effort: a persistence failure must not fail the fetch.
        if let Err(err) = self.store.put(&key, &report) {
          tracing::warn!(key = %key, error = %err, "failed to persist analysis record");
        }
        tracing::debug!(key = %key, "analysis served from api");
        Ok(AnalysisOutcome {
          report,
          source: DataSource::Api,
        })
      }
      Err(err) if err.is_connectivity() => {
        tracing::warn!(key = %key, error = %err, "network unreachable, serving demo data");
        Ok(AnalysisOutcome {
          report: demo_report(&key),
          source: DataSource::FallbackData,
        })
      }
      Err(err) => Err(err.into()),
    }
  }

  fn offline_lookup(&self, key: &str) -> Result<AnalysisOutcome, AnalysisError> {
    let record = match self.store.get::<AnalysisReport>(key) {
      Ok(record) => record,
      Err(err) => {
        tracing::warn!(key, error = %err, "offline store read failed");
        None
      }
    };

    match record {
      Some(record) => {
        tracing::debug!(key, stored_at = %record.stored_at, "analysis served from offline storage");
        Ok(AnalysisOutcome {
          report: record.payload,
          source: DataSource::OfflineStorage,
        })
      }
      None => Err(AnalysisError::OfflineUnavailable(key.to_string())),
    }
  }

  /// Drop every cached report, in memory and on disk.
  pub fn clear_caches(&self) {
    self.memory.clear();
    if let Err(err) = self.store.delete_all() {
      tracing::warn!(error = %err, "failed to clear offline store");
    }
  }

  /// Number of reports currently held in the memory cache.
  pub fn memory_entries(&self) -> usize {
    self.memory.len()
  }

  /// Whether offline records are actually being persisted.
  pub fn storage_durable(&self) -> bool {
    self.store.is_durable()
  }
}

/// Postal codes compare case-insensitively and ignore surrounding space.
fn normalize_key(key: &str) -> String {
  key.trim().to_uppercase()
}
