//! Water-quality analysis data access.
//!
//! [`AnalysisClient`] talks to the remote analysis endpoint;
//! [`CachedAnalysisClient`] layers the memory cache, the offline store and a
//! deterministic demo-data fallback on top of it.

mod cached_client;
mod client;
mod fallback;
mod types;

pub use cached_client::{AnalysisError, CachedAnalysisClient};
pub use client::AnalysisClient;
pub use fallback::demo_report;
pub use types::{AnalysisOutcome, AnalysisReport, Contaminant, DataSource};
