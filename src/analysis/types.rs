//! Analysis report types.

use serde::{Deserialize, Serialize};

/// A single measured (or simulated) contaminant level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contaminant {
  pub name: String,
  pub level: f64,
  pub unit: String,
  /// Regulatory limit for the same unit, where one exists.
  pub legal_limit: Option<f64>,
}

/// Water-quality report for one postal-code area.
///
/// This is the typed boundary for what the source system treated as opaque
/// JSON: the shape is validated here, when a payload crosses the network or
/// storage edge, and trusted everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
  pub postal_code: String,
  pub ph: f64,
  /// Total hardness as CaCO3, mg/L.
  pub hardness_mg_l: f64,
  /// Total dissolved solids, ppm.
  pub tds_ppm: f64,
  pub chlorine_mg_l: f64,
  pub lead_ug_l: f64,
  pub contaminants: Vec<Contaminant>,
  /// 0 (no concern) to 100.
  pub risk_score: u8,
  pub advisory: String,
  /// True for generated placeholder data, never for API responses.
  #[serde(default)]
  pub simulated: bool,
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
  MemoryCache,
  OfflineStorage,
  Api,
  FallbackData,
}

impl DataSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::MemoryCache => "memory_cache",
      Self::OfflineStorage => "offline_storage",
      Self::Api => "api",
      Self::FallbackData => "fallback_data",
    }
  }
}

/// A report plus the tier that produced it.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
  pub report: AnalysisReport,
  pub source: DataSource,
}
