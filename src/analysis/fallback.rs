//! Deterministic placeholder reports.
//!
//! When the network is unreachable and nothing usable is cached, the data
//! access layer serves a report generated here instead of an error, so the
//! caller always has plausible numbers to render. The values are **simulated
//! demo data derived from the postal code, not measurements**: a checksum
//! over the key seeds every field, scaled into realistic ranges, so the same
//! key always yields byte-identical output.

use super::types::{AnalysisReport, Contaminant};

/// Checksum over the key's bytes. Stable across runs and platforms.
fn checksum(key: &str) -> u32 {
  key
    .bytes()
    .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
}

/// Map `seed` (salted per field) into `[min, max]` with two-decimal steps.
fn scaled(seed: u32, salt: u32, min: f64, max: f64) -> f64 {
  let mixed = seed.wrapping_mul(2654435761).wrapping_add(salt);
  let unit = (mixed % 10_000) as f64 / 10_000.0;
  let value = min + unit * (max - min);
  (value * 100.0).round() / 100.0
}

/// Build the simulated report for a postal-code key.
pub fn demo_report(postal_code: &str) -> AnalysisReport {
  let seed = checksum(postal_code);

  let ph = scaled(seed, 1, 6.5, 8.5);
  let hardness_mg_l = scaled(seed, 2, 40.0, 380.0);
  let tds_ppm = scaled(seed, 3, 80.0, 600.0);
  let chlorine_mg_l = scaled(seed, 4, 0.1, 1.2);
  let lead_ug_l = scaled(seed, 5, 0.0, 12.0);
  let nitrate_mg_l = scaled(seed, 6, 0.5, 40.0);

  let contaminants = vec![
    Contaminant {
      name: "Lead".to_string(),
      level: lead_ug_l,
      unit: "µg/L".to_string(),
      legal_limit: Some(10.0),
    },
    Contaminant {
      name: "Nitrate".to_string(),
      level: nitrate_mg_l,
      unit: "mg/L".to_string(),
      legal_limit: Some(50.0),
    },
    Contaminant {
      name: "Chlorine".to_string(),
      level: chlorine_mg_l,
      unit: "mg/L".to_string(),
      legal_limit: None,
    },
  ];

  let risk_score = risk_score(ph, hardness_mg_l, lead_ug_l, nitrate_mg_l);

  AnalysisReport {
    postal_code: postal_code.to_string(),
    ph,
    hardness_mg_l,
    tds_ppm,
    chlorine_mg_l,
    lead_ug_l,
    contaminants,
    risk_score,
    advisory: advisory_for(risk_score).to_string(),
    simulated: true,
  }
}

fn risk_score(ph: f64, hardness: f64, lead: f64, nitrate: f64) -> u8 {
  let mut score = 10.0;
  // Distance from neutral pH.
  score += (ph - 7.2).abs() * 12.0;
  score += (hardness / 380.0) * 25.0;
  score += (lead / 12.0) * 35.0;
  score += (nitrate / 40.0) * 20.0;
  score.round().clamp(0.0, 100.0) as u8
}

fn advisory_for(risk_score: u8) -> &'static str {
  match risk_score {
    0..=24 => "Water quality in your area looks good. No treatment is strictly needed.",
    25..=49 => "Moderate mineral and disinfectant levels. A carbon filter would improve taste.",
    50..=74 => "Elevated contaminant levels for your area. A certified filter is recommended.",
    _ => "High estimated contaminant load. Consider a reverse-osmosis system and a lab test.",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_same_key_is_byte_identical() {
    let a = demo_report("10115");
    let b = demo_report("10115");
    assert_eq!(a, b);
    assert_eq!(
      serde_json::to_vec(&a).unwrap(),
      serde_json::to_vec(&b).unwrap()
    );
  }

  #[test]
  fn test_different_keys_differ() {
    let a = demo_report("10115");
    let b = demo_report("90210");
    assert_ne!(a, b);
  }

  #[test]
  fn test_fields_stay_in_plausible_ranges() {
    for key in ["10115", "90210", "SW1A 1AA", "75001", ""] {
      let report = demo_report(key);
      assert!((6.5..=8.5).contains(&report.ph), "ph out of range for {key}");
      assert!((40.0..=380.0).contains(&report.hardness_mg_l));
      assert!((80.0..=600.0).contains(&report.tds_ppm));
      assert!((0.0..=12.0).contains(&report.lead_ug_l));
      assert!(report.risk_score <= 100);
      assert!(report.simulated);
      assert!(!report.advisory.is_empty());
    }
  }
}
