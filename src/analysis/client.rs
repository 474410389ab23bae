//! Plain client for the remote analysis endpoint.

use serde_json::json;

use crate::net::{FetchClient, FetchError, RetryPolicy};

use super::types::AnalysisReport;

/// Client for `POST {base}/water-analysis`.
#[derive(Clone)]
pub struct AnalysisClient {
  fetch: FetchClient,
  endpoint: String,
}

impl AnalysisClient {
  /// Build a client against `base_url`, sending `x-api-key` on every
  /// request when a key is configured.
  pub fn new(base_url: &str, api_key: Option<&str>, policy: RetryPolicy) -> Self {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(key) = api_key {
      if let Ok(value) = reqwest::header::HeaderValue::from_str(key) {
        headers.insert("x-api-key", value);
      }
    }

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .unwrap_or_default();

    Self {
      fetch: FetchClient::with_client(http, policy),
      endpoint: format!("{}/water-analysis", base_url.trim_end_matches('/')),
    }
  }

  /// Fetch the analysis report for a postal-code key.
  pub async fn fetch_report(&self, key: &str) -> Result<AnalysisReport, FetchError> {
    self
      .fetch
      .post_json(&self.endpoint, &json!({ "key": key }))
      .await
  }
}
