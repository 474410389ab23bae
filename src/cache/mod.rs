//! Caching layers for offline support.
//!
//! Two tiers with different lifetimes:
//! - [`MemoryCache`]: short-lived per-process map with TTL expiry and a
//!   periodic sweep
//! - [`SqliteStore`] behind [`OfflineStore`]: durable per-key records with a
//!   freshness window, degrading to a no-op when storage is unavailable

mod memory;
mod store;

pub use memory::MemoryCache;
pub use store::{
  probe_storage, NoopStore, OfflineStore, RecordStore, SqliteStore, StorageAvailability,
  StoreError, StoredRecord,
};
