//! Request routing and caching strategies.
//!
//! Every GET request from the app shell is classified into one of three
//! strategies:
//! - static assets (the precache manifest): cache-first, with a background
//!   re-fetch that keeps the cached copy current
//! - API calls (fixed path patterns): network-first, caching 200 responses,
//!   degrading to the cache and then to a synthetic offline error
//! - everything else: network-first with cache fallback; failed navigations
//!   get the offline page
//!
//! Non-GET requests bypass interception and go straight to the network.

use std::sync::Arc;

use crate::net::{FetchClient, FetchError, RawResponse};

use super::cache::{CachedResponse, ResponseCache};

/// Request classes, in matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  StaticAsset,
  Api,
  Other,
}

/// A request issued by the app shell.
#[derive(Debug, Clone)]
pub struct ShellRequest {
  pub method: reqwest::Method,
  /// Path with optional query string, e.g. `/api/history?limit=10`.
  pub path: String,
  /// True for top-level page navigations, which fall back to the offline
  /// page rather than an error.
  pub is_navigation: bool,
  pub body: Option<serde_json::Value>,
}

impl ShellRequest {
  pub fn get(path: &str) -> Self {
    Self {
      method: reqwest::Method::GET,
      path: path.to_string(),
      is_navigation: false,
      body: None,
    }
  }

  pub fn navigation(path: &str) -> Self {
    Self {
      is_navigation: true,
      ..Self::get(path)
    }
  }

  #[allow(dead_code)]
  pub fn post(path: &str, body: serde_json::Value) -> Self {
    Self {
      method: reqwest::Method::POST,
      path: path.to_string(),
      is_navigation: false,
      body: Some(body),
    }
  }
}

/// Which tier produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  Network,
  Cache,
  OfflinePage,
  /// Generated locally because both network and cache failed.
  Synthetic,
}

impl ServedFrom {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::OfflinePage => "offline page",
      Self::Synthetic => "synthetic offline error",
    }
  }
}

/// The router's answer to a shell request.
#[derive(Debug, Clone)]
pub struct ShellResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub served_from: ServedFrom,
}

impl ShellResponse {
  fn from_network(raw: RawResponse) -> Self {
    Self {
      status: raw.status,
      content_type: raw.content_type,
      body: raw.body,
      served_from: ServedFrom::Network,
    }
  }

  fn from_cache(cached: CachedResponse, served_from: ServedFrom) -> Self {
    Self {
      status: cached.status,
      content_type: cached.content_type,
      body: cached.body,
      served_from,
    }
  }
}

/// Routing configuration, fixed at worker startup.
#[derive(Debug, Clone)]
pub struct RouterConfig {
  /// Origin the shell is served from.
  pub base_url: String,
  /// Paths precached at install; requests for them are cache-first.
  pub precache: Vec<String>,
  /// Path substrings identifying cacheable API requests.
  pub api_patterns: Vec<String>,
  /// Precached page served to failed navigations.
  pub offline_page: String,
}

/// Applies the per-class caching strategies against one cache generation.
pub struct CacheRouter {
  fetch: FetchClient,
  cache: Arc<ResponseCache>,
  generation: String,
  config: RouterConfig,
}

impl CacheRouter {
  pub fn new(
    fetch: FetchClient,
    cache: Arc<ResponseCache>,
    generation: String,
    config: RouterConfig,
  ) -> Self {
    Self {
      fetch,
      cache,
      generation,
      config,
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Classify a request path (query string ignored).
  pub fn classify(&self, path: &str) -> RequestClass {
    let bare = path.split('?').next().unwrap_or(path);

    if self.config.precache.iter().any(|p| p == bare) {
      RequestClass::StaticAsset
    } else if self.config.api_patterns.iter().any(|p| bare.contains(p.as_str())) {
      RequestClass::Api
    } else {
      RequestClass::Other
    }
  }

  /// Handle one shell request.
  pub async fn handle(&self, request: &ShellRequest) -> Result<ShellResponse, FetchError> {
    if request.method != reqwest::Method::GET {
      return self.passthrough(request).await;
    }

    match self.classify(&request.path) {
      RequestClass::StaticAsset => self.cache_first(&request.path).await,
      RequestClass::Api => self.network_first_api(&request.path).await,
      RequestClass::Other => self.network_first_other(request).await,
    }
  }

  /// Non-GET traffic is not intercepted or cached.
  async fn passthrough(&self, request: &ShellRequest) -> Result<ShellResponse, FetchError> {
    let raw = self
      .fetch
      .send_bytes(
        request.method.clone(),
        &self.absolute(&request.path),
        request.body.as_ref(),
      )
      .await?;
    Ok(ShellResponse::from_network(raw))
  }

  /// Static assets: serve the cached copy and refresh it in the background;
  /// on a miss, fetch and populate the cache so the next request hits.
  async fn cache_first(&self, path: &str) -> Result<ShellResponse, FetchError> {
    if let Some(cached) = self.cache_lookup(path) {
      self.spawn_revalidate(path);
      return Ok(ShellResponse::from_cache(cached, ServedFrom::Cache));
    }

    let raw = self.fetch.get_bytes(&self.absolute(path)).await?;
    if raw.status == 200 {
      self.cache_store(path, &raw);
    }
    Ok(ShellResponse::from_network(raw))
  }

  /// API requests: network-first, caching 200s, then cache, then a
  /// synthetic offline error so the shell always receives structured JSON.
  async fn network_first_api(&self, path: &str) -> Result<ShellResponse, FetchError> {
    match self.fetch.get_bytes(&self.absolute(path)).await {
      Ok(raw) => {
        if raw.status == 200 {
          self.cache_store(path, &raw);
        }
        Ok(ShellResponse::from_network(raw))
      }
      Err(err) => {
        tracing::debug!(path, error = %err, "api fetch failed, trying cache");
        if let Some(cached) = self.cache_lookup(path) {
          return Ok(ShellResponse::from_cache(cached, ServedFrom::Cache));
        }
        Ok(offline_error_response())
      }
    }
  }

  /// Everything else: network-first with cache fallback. Failed navigations
  /// get the offline page; other double failures propagate.
  async fn network_first_other(&self, request: &ShellRequest) -> Result<ShellResponse, FetchError> {
    let path = &request.path;
    match self.fetch.get_bytes(&self.absolute(path)).await {
      Ok(raw) => {
        if raw.status == 200 {
          self.cache_store(path, &raw);
        }
        Ok(ShellResponse::from_network(raw))
      }
      Err(err) => {
        if let Some(cached) = self.cache_lookup(path) {
          return Ok(ShellResponse::from_cache(cached, ServedFrom::Cache));
        }
        if request.is_navigation {
          if let Some(page) = self.cache_lookup(&self.config.offline_page) {
            return Ok(ShellResponse::from_cache(page, ServedFrom::OfflinePage));
          }
        }
        Err(err)
      }
    }
  }

  fn cache_lookup(&self, path: &str) -> Option<CachedResponse> {
    match self.cache.get(&self.generation, path) {
      Ok(cached) => cached,
      Err(err) => {
        tracing::warn!(path, error = %err, "response cache read failed");
        None
      }
    }
  }

  fn cache_store(&self, path: &str, raw: &RawResponse) {
    let response = CachedResponse {
      status: raw.status,
      content_type: raw.content_type.clone(),
      body: raw.body.clone(),
    };
    if let Err(err) = self.cache.put(&self.generation, path, &response) {
      tracing::warn!(path, error = %err, "response cache write failed");
    }
  }

  /// Refresh a cached asset without blocking the response that was already
  /// served from cache.
  fn spawn_revalidate(&self, path: &str) {
    let fetch = self.fetch.clone();
    let cache = Arc::clone(&self.cache);
    let generation = self.generation.clone();
    let url = self.absolute(path);
    let path = path.to_string();

    tokio::spawn(async move {
      match fetch.get_bytes(&url).await {
        Ok(raw) if raw.status == 200 => {
          let response = CachedResponse {
            status: raw.status,
            content_type: raw.content_type,
            body: raw.body,
          };
          if let Err(err) = cache.put(&generation, &path, &response) {
            tracing::warn!(path = %path, error = %err, "revalidate write failed");
          }
        }
        Ok(raw) => {
          tracing::debug!(path = %path, status = raw.status, "revalidate kept stale copy");
        }
        Err(err) => {
          tracing::debug!(path = %path, error = %err, "revalidate fetch failed");
        }
      }
    });
  }

  fn absolute(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }
}

/// `503 {"error": "Offline"}`, so API callers always get structured JSON
/// instead of a raw connection error.
fn offline_error_response() -> ShellResponse {
  let body = serde_json::json!({
    "error": "Offline",
    "offline": true,
  });
  ShellResponse {
    status: 503,
    content_type: Some("application/json".to_string()),
    body: serde_json::to_vec(&body).unwrap_or_default(),
    served_from: ServedFrom::Synthetic,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::RetryPolicy;
  use std::time::Duration;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn router_against(base_url: &str, cache: Arc<ResponseCache>) -> CacheRouter {
    let config = RouterConfig {
      base_url: base_url.to_string(),
      precache: vec![
        "/".to_string(),
        "/styles.css".to_string(),
        "/offline.html".to_string(),
      ],
      api_patterns: vec!["/api/".to_string(), "/water-analysis".to_string()],
      offline_page: "/offline.html".to_string(),
    };
    CacheRouter::new(
      FetchClient::new(RetryPolicy::single_attempt(Duration::from_secs(2))),
      cache,
      "v1".to_string(),
      config,
    )
  }

  fn cached(body: &str) -> CachedResponse {
    CachedResponse {
      status: 200,
      content_type: Some("text/html".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_classification() {
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let router = router_against("http://localhost", cache);

    assert_eq!(router.classify("/styles.css"), RequestClass::StaticAsset);
    assert_eq!(router.classify("/api/history"), RequestClass::Api);
    assert_eq!(router.classify("/api/history?limit=3"), RequestClass::Api);
    assert_eq!(router.classify("/water-analysis"), RequestClass::Api);
    assert_eq!(router.classify("/products.html"), RequestClass::Other);
  }

  #[tokio::test]
  async fn test_api_success_is_returned_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/history"))
      .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items":[]}"#))
      .expect(1)
      .mount(&server)
      .await;

    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let router = router_against(&server.uri(), Arc::clone(&cache));

    let response = router.handle(&ShellRequest::get("/api/history")).await.unwrap();
    assert_eq!(response.served_from, ServedFrom::Network);
    assert_eq!(response.status, 200);

    let stored = cache.get("v1", "/api/history").unwrap().unwrap();
    assert_eq!(stored.body, br#"{"items":[]}"#);
  }

  #[tokio::test]
  async fn test_api_non_200_is_returned_but_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let router = router_against(&server.uri(), Arc::clone(&cache));

    let response = router.handle(&ShellRequest::get("/api/history")).await.unwrap();
    assert_eq!(response.status, 404);
    assert!(cache.get("v1", "/api/history").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_api_falls_back_to_cache_when_network_is_down() {
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    cache.put("v1", "/api/history", &cached(r#"{"items":[1]}"#)).unwrap();

    let router = router_against("http://127.0.0.1:1", Arc::clone(&cache));

    let response = router.handle(&ShellRequest::get("/api/history")).await.unwrap();
    assert_eq!(response.served_from, ServedFrom::Cache);
    assert_eq!(response.body, br#"{"items":[1]}"#);
  }

  #[tokio::test]
  async fn test_api_double_miss_returns_synthetic_503() {
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let router = router_against("http://127.0.0.1:1", cache);

    let response = router.handle(&ShellRequest::get("/api/history")).await.unwrap();
    assert_eq!(response.served_from, ServedFrom::Synthetic);
    assert_eq!(response.status, 503);

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "Offline");
  }

  #[tokio::test]
  async fn test_static_hit_serves_cache_and_revalidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/styles.css"))
      .respond_with(ResponseTemplate::new(200).set_body_string("v2"))
      .expect(1)
      .mount(&server)
      .await;

    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    cache.put("v1", "/styles.css", &cached("v1")).unwrap();

    let router = router_against(&server.uri(), Arc::clone(&cache));
    let response = router.handle(&ShellRequest::get("/styles.css")).await.unwrap();

    // The stale copy is served immediately...
    assert_eq!(response.served_from, ServedFrom::Cache);
    assert_eq!(response.body, b"v1");

    // ...and the background refresh overwrites it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = cache.get("v1", "/styles.css").unwrap().unwrap();
    assert_eq!(stored.body, b"v2");
  }

  #[tokio::test]
  async fn test_static_miss_fetches_and_populates_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/styles.css"))
      .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
      .expect(1)
      .mount(&server)
      .await;

    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let router = router_against(&server.uri(), Arc::clone(&cache));

    let response = router.handle(&ShellRequest::get("/styles.css")).await.unwrap();
    assert_eq!(response.served_from, ServedFrom::Network);

    let stored = cache.get("v1", "/styles.css").unwrap().unwrap();
    assert_eq!(stored.body, b"fresh");
  }

  #[tokio::test]
  async fn test_failed_navigation_gets_offline_page() {
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    cache.put("v1", "/offline.html", &cached("you are offline")).unwrap();

    let router = router_against("http://127.0.0.1:1", cache);
    let response = router
      .handle(&ShellRequest::navigation("/products.html"))
      .await
      .unwrap();

    assert_eq!(response.served_from, ServedFrom::OfflinePage);
    assert_eq!(response.body, b"you are offline");
  }

  #[tokio::test]
  async fn test_failed_non_navigation_propagates_error() {
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let router = router_against("http://127.0.0.1:1", cache);

    let err = router
      .handle(&ShellRequest::get("/untracked.png"))
      .await
      .unwrap_err();
    assert!(err.is_connectivity());
  }

  #[tokio::test]
  async fn test_non_get_bypasses_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/analytics"))
      .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
      .expect(1)
      .mount(&server)
      .await;

    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    let router = router_against(&server.uri(), Arc::clone(&cache));

    let request = ShellRequest::post("/api/analytics", serde_json::json!({"event": "view"}));
    let response = router.handle(&request).await.unwrap();

    assert_eq!(response.served_from, ServedFrom::Network);
    // Nothing was intercepted or stored for the POST.
    assert!(cache.get("v1", "/api/analytics").unwrap().is_none());
  }
}
