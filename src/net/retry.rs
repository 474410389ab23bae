//! Resilient fetch client.
//!
//! Wraps `reqwest` with a retry loop: every attempt is bounded by a timeout,
//! failed attempts back off exponentially, and errors are classified so
//! callers can tell "the network is unreachable" apart from "the server
//! answered badly".

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};

/// Errors produced by [`FetchClient`].
#[derive(Debug, Error)]
pub enum FetchError {
  /// The network itself was unreachable (connection refused, no route).
  #[error("could not connect to {url}: {source}")]
  Connect {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// Any other transport failure while sending or reading the response.
  #[error("transport error for {url}: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// The attempt exceeded its timeout and was aborted.
  #[error("request to {url} timed out after {timeout:?}")]
  Timeout { url: String, timeout: Duration },

  /// The server answered with a non-2xx status.
  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  /// The response body was not the JSON shape the caller asked for.
  #[error("failed to decode response from {url}: {source}")]
  Decode {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

impl FetchError {
  /// True when the failure means the network could not be reached at all.
  ///
  /// The data access layer maps this variant (and only this variant) to
  /// fallback data; timeouts and server errors propagate instead.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Connect { .. })
  }

  /// Whether another attempt could plausibly succeed.
  ///
  /// 4xx statuses are deterministic client errors and are not retried;
  /// everything else is.
  fn is_retryable(&self) -> bool {
    match self {
      Self::Status { status, .. } => *status >= 500,
      _ => true,
    }
  }

  fn from_transport(url: &str, source: reqwest::Error) -> Self {
    if source.is_connect() {
      Self::Connect {
        url: url.to_string(),
        source,
      }
    } else {
      Self::Transport {
        url: url.to_string(),
        source,
      }
    }
  }
}

/// Retry behavior for a [`FetchClient`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Total attempts, including the first one.
  pub max_attempts: u32,
  /// Backoff base; the wait after failed attempt `i` is `base * 2^i`.
  pub base_delay: Duration,
  /// Limit for a single attempt, covering connect, send and body read.
  pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_secs(1),
      attempt_timeout: Duration::from_secs(8),
    }
  }
}

impl RetryPolicy {
  /// A policy that tries exactly once. Used where the caller has its own
  /// retry mechanism (the worker's sync queue) or wants plain fetch
  /// semantics (the worker router).
  pub fn single_attempt(attempt_timeout: Duration) -> Self {
    Self {
      max_attempts: 1,
      base_delay: Duration::ZERO,
      attempt_timeout,
    }
  }

  /// Delay before the retry that follows failed attempt `attempt_index`
  /// (zero-based).
  pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
    self.base_delay * 2u32.saturating_pow(attempt_index)
  }
}

/// A raw HTTP response, as seen by the worker router.
///
/// Unlike the JSON helpers, carrying a non-2xx status here is not an error;
/// the router decides what to do with it.
#[derive(Debug, Clone)]
pub struct RawResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

/// HTTP client with bounded retries and exponential backoff.
#[derive(Clone)]
pub struct FetchClient {
  http: reqwest::Client,
  policy: RetryPolicy,
}

impl FetchClient {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      http: reqwest::Client::new(),
      policy,
    }
  }

  /// Build on top of a preconfigured `reqwest` client (default headers,
  /// proxies and so on).
  pub fn with_client(http: reqwest::Client, policy: RetryPolicy) -> Self {
    Self { http, policy }
  }

  /// POST a JSON body and decode a JSON response, retrying per policy.
  pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, FetchError>
  where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    self
      .retrying(url, move || async move {
        let response = self.send_post(url, body).await?;
        response
          .json::<T>()
          .await
          .map_err(|e| FetchError::Decode {
            url: url.to_string(),
            source: e,
          })
      })
      .await
  }

  /// POST a JSON body, requiring a 2xx status but ignoring the response
  /// body. Used for fire-and-forget deliveries like analytics events.
  pub async fn post_ack<B>(&self, url: &str, body: &B) -> Result<(), FetchError>
  where
    B: Serialize + ?Sized,
  {
    self
      .retrying(url, move || async move {
        self.send_post(url, body).await?;
        Ok(())
      })
      .await
  }

  /// GET a resource, returning whatever the server said.
  ///
  /// Only transport failures and timeouts count as errors (and are retried
  /// per policy); an HTTP error status is still a response.
  pub async fn get_bytes(&self, url: &str) -> Result<RawResponse, FetchError> {
    self.send_bytes(reqwest::Method::GET, url, None).await
  }

  /// Send a request with an arbitrary method and optional JSON body,
  /// returning the raw response. Same error semantics as [`get_bytes`]:
  /// an HTTP error status is a response, not an error.
  ///
  /// [`get_bytes`]: FetchClient::get_bytes
  pub async fn send_bytes(
    &self,
    method: reqwest::Method,
    url: &str,
    body: Option<&serde_json::Value>,
  ) -> Result<RawResponse, FetchError> {
    self
      .retrying(url, move || {
        let method = method.clone();
        async move {
          let mut request = self.http.request(method, url);
          if let Some(body) = body {
            request = request.json(body);
          }
          let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_transport(url, e))?;

          let status = response.status().as_u16();
          let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
          let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport {
              url: url.to_string(),
              source: e,
            })?
            .to_vec();

          Ok(RawResponse {
            status,
            content_type,
            body,
          })
        }
      })
      .await
  }

  async fn send_post<B>(&self, url: &str, body: &B) -> Result<reqwest::Response, FetchError>
  where
    B: Serialize + ?Sized,
  {
    let response = self
      .http
      .post(url)
      .json(body)
      .send()
      .await
      .map_err(|e| FetchError::from_transport(url, e))?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
      return Err(FetchError::Status {
        url: url.to_string(),
        status,
      });
    }

    Ok(response)
  }

  /// Run `attempt` up to `max_attempts` times. A timed-out attempt is
  /// aborted by dropping its future, which cancels the in-flight request.
  async fn retrying<T, F, Fut>(&self, url: &str, attempt: F) -> Result<T, FetchError>
  where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, FetchError>>,
  {
    let mut attempts = 0;

    loop {
      let result = match timeout(self.policy.attempt_timeout, attempt()).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
          url: url.to_string(),
          timeout: self.policy.attempt_timeout,
        }),
      };

      match result {
        Ok(value) => return Ok(value),
        Err(err) => {
          attempts += 1;
          if attempts >= self.policy.max_attempts || !err.is_retryable() {
            tracing::warn!(url, attempts, error = %err, "request failed, giving up");
            return Err(err);
          }

          let delay = self.policy.backoff_delay(attempts - 1);
          tracing::debug!(
            url,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "request attempt failed, backing off"
          );
          sleep(delay).await;
        }
      }
    }
  }
}
