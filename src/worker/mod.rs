//! Offline worker: cache router, response cache generations, sync queue.
//!
//! The worker runs as its own task and owns its stores outright; the rest of
//! the process talks to it exclusively through [`WorkerHandle`] messages, so
//! no in-memory state is ever shared across the boundary.
//!
//! Startup walks the generation lifecycle before any request is served:
//! install (populate the precache manifest into the configured generation),
//! then activate (purge every other generation). Requests sent during that
//! window sit in the channel until activation completes.

mod cache;
mod router;
mod sync;

pub use cache::{CachedResponse, ResponseCache};
pub use router::{
  CacheRouter, RequestClass, RouterConfig, ServedFrom, ShellRequest, ShellResponse,
};
pub use sync::{QueuedEvent, ReplayOutcome, SyncQueue};

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::connectivity::ConnectivityMonitor;
use crate::net::{FetchClient, FetchError};

/// Generation lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activating,
  Active,
}

/// Messages accepted by the worker task.
enum WorkerMessage {
  Fetch(ShellRequest, oneshot::Sender<Result<ShellResponse, FetchError>>),
  Track(serde_json::Value),
  Sync(oneshot::Sender<ReplayOutcome>),
  Status(oneshot::Sender<WorkerStatus>),
  Shutdown,
}

/// Snapshot of the worker's state for diagnostics.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
  pub state: WorkerState,
  /// Generation requests are being served from.
  pub generation: String,
  pub generations: Vec<String>,
  pub queued_events: usize,
}

/// Worker configuration, fixed at spawn.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  /// Version string naming the cache generation this build installs.
  pub cache_version: String,
  pub router: RouterConfig,
}

/// Client side of the worker channel.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
  /// Route a shell request through the worker.
  pub async fn fetch(&self, request: ShellRequest) -> Result<ShellResponse> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(WorkerMessage::Fetch(request, reply_tx))
      .await
      .map_err(|_| eyre!("worker task is gone"))?;
    let result = reply_rx.await.map_err(|_| eyre!("worker dropped the request"))?;
    Ok(result?)
  }

  /// Record an analytics event: delivered immediately when possible,
  /// buffered in the sync queue otherwise.
  pub async fn track(&self, event: serde_json::Value) -> Result<()> {
    self
      .tx
      .send(WorkerMessage::Track(event))
      .await
      .map_err(|_| eyre!("worker task is gone"))
  }

  /// Trigger a replay of the sync queue now.
  pub async fn sync(&self) -> Result<ReplayOutcome> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(WorkerMessage::Sync(reply_tx))
      .await
      .map_err(|_| eyre!("worker task is gone"))?;
    reply_rx.await.map_err(|_| eyre!("worker dropped the request"))
  }

  pub async fn status(&self) -> Result<WorkerStatus> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(WorkerMessage::Status(reply_tx))
      .await
      .map_err(|_| eyre!("worker task is gone"))?;
    reply_rx.await.map_err(|_| eyre!("worker dropped the request"))
  }

  /// Stop the worker task and wait for it to finish. Messages queued ahead
  /// of the shutdown are still processed.
  pub async fn shutdown(&self) -> Result<()> {
    self
      .tx
      .send(WorkerMessage::Shutdown)
      .await
      .map_err(|_| eyre!("worker task is gone"))?;
    // Resolves once the worker drops its end of the channel.
    self.tx.closed().await;
    Ok(())
  }
}

/// Spawn the worker task. The handle is usable immediately; requests sent
/// before activation completes are buffered in the channel.
pub fn spawn(
  settings: WorkerSettings,
  cache: Arc<ResponseCache>,
  queue: Arc<SyncQueue>,
  fetch: FetchClient,
  connectivity: ConnectivityMonitor,
) -> WorkerHandle {
  let (tx, rx) = mpsc::channel(32);
  let worker = Worker {
    settings,
    cache,
    queue,
    fetch,
    connectivity,
    state: WorkerState::Installing,
    rx,
  };
  tokio::spawn(worker.run());
  WorkerHandle { tx }
}

struct Worker {
  settings: WorkerSettings,
  cache: Arc<ResponseCache>,
  queue: Arc<SyncQueue>,
  fetch: FetchClient,
  connectivity: ConnectivityMonitor,
  state: WorkerState,
  rx: mpsc::Receiver<WorkerMessage>,
}

impl Worker {
  async fn run(mut self) {
    let generation = self.lifecycle().await;
    let router = CacheRouter::new(
      self.fetch.clone(),
      Arc::clone(&self.cache),
      generation,
      self.settings.router.clone(),
    );
    let analytics_endpoint = format!(
      "{}/api/analytics",
      self.settings.router.base_url.trim_end_matches('/')
    );

    let mut conn_rx = self.connectivity.subscribe();
    let mut online = self.connectivity.is_online();
    let mut watch_alive = true;

    loop {
      tokio::select! {
        message = self.rx.recv() => {
          match message {
            None | Some(WorkerMessage::Shutdown) => break,
            Some(WorkerMessage::Fetch(request, reply)) => {
              let result = router.handle(&request).await;
              let _ = reply.send(result);
            }
            Some(WorkerMessage::Track(event)) => {
              self.track(event, &analytics_endpoint).await;
            }
            Some(WorkerMessage::Sync(reply)) => {
              let outcome = sync::drain(&self.queue, &self.fetch, &analytics_endpoint).await;
              let _ = reply.send(outcome);
            }
            Some(WorkerMessage::Status(reply)) => {
              let _ = reply.send(self.status(router.generation()));
            }
          }
        }
        changed = conn_rx.changed(), if watch_alive => {
          match changed {
            Err(_) => watch_alive = false,
            Ok(()) => {
              let now_online = *conn_rx.borrow_and_update();
              if now_online && !online {
                tracing::info!("connectivity restored, replaying buffered events");
                sync::drain(&self.queue, &self.fetch, &analytics_endpoint).await;
              }
              online = now_online;
            }
          }
        }
      }
    }

    tracing::debug!("worker task stopped");
  }

  /// Walk install → activate and return the generation to serve from.
  ///
  /// When installation fails (an unreachable origin, typically) and a
  /// previous generation survives on disk, the worker keeps serving that
  /// one instead of activating a half-populated cache.
  async fn lifecycle(&mut self) -> String {
    let target = self.settings.cache_version.clone();

    if !self.connectivity.is_online() {
      // No point fetching the manifest while offline; serve whatever
      // generation survives on disk.
      let serving = self
        .cache
        .generations()
        .ok()
        .and_then(|gens| gens.into_iter().next_back())
        .unwrap_or_else(|| target.clone());
      tracing::info!(generation = %serving, "offline start, skipping install");
      self.state = WorkerState::Active;
      return serving;
    }

    tracing::info!(generation = %target, "worker installing");

    match self.install(&target).await {
      Ok(()) => {
        self.state = WorkerState::Installed;
        tracing::debug!(generation = %target, "precache populated");

        self.state = WorkerState::Activating;
        match self.cache.purge_other_generations(&target) {
          Ok(removed) if removed > 0 => {
            tracing::info!(removed, generation = %target, "purged stale cache generations");
          }
          Ok(_) => {}
          Err(err) => tracing::warn!(error = %err, "failed to purge stale generations"),
        }

        self.state = WorkerState::Active;
        tracing::info!(generation = %target, "worker active");
        target
      }
      Err(err) => {
        let fallback = self
          .cache
          .generations()
          .ok()
          .and_then(|gens| gens.into_iter().filter(|g| g != &target).next_back());

        let serving = fallback.unwrap_or_else(|| target.clone());
        tracing::warn!(
          error = %err,
          generation = %serving,
          "install failed, serving from existing generation"
        );
        self.state = WorkerState::Active;
        serving
      }
    }
  }

  /// Populate the precache manifest into `generation`. Idempotent: a
  /// generation that already holds every manifest entry is left untouched.
  async fn install(&self, generation: &str) -> Result<()> {
    let manifest = &self.settings.router.precache;
    if self.cache.has_all(generation, manifest)? {
      tracing::debug!(generation, "generation already installed");
      return Ok(());
    }

    for path in manifest {
      let url = format!(
        "{}{}",
        self.settings.router.base_url.trim_end_matches('/'),
        path
      );
      let raw = self.fetch.get_bytes(&url).await?;
      if raw.status != 200 {
        return Err(eyre!("precache fetch for {} returned HTTP {}", path, raw.status));
      }
      self.cache.put(
        generation,
        path,
        &CachedResponse {
          status: raw.status,
          content_type: raw.content_type,
          body: raw.body,
        },
      )?;
    }

    tracing::info!(generation, assets = manifest.len(), "precache populated");
    Ok(())
  }

  async fn track(&self, event: serde_json::Value, endpoint: &str) {
    if self.connectivity.is_online() {
      match self.fetch.post_ack(endpoint, &event).await {
        Ok(()) => return,
        Err(err) => {
          tracing::debug!(error = %err, "analytics send failed, buffering event");
        }
      }
    }
    if let Err(err) = self.queue.enqueue(&event) {
      tracing::warn!(error = %err, "failed to buffer analytics event");
    }
  }

  fn status(&self, generation: &str) -> WorkerStatus {
    WorkerStatus {
      state: self.state,
      generation: generation.to_string(),
      generations: self.cache.generations().unwrap_or_default(),
      queued_events: self.queue.len().unwrap_or(0),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::RetryPolicy;
  use serde_json::json;
  use std::time::Duration;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  const MANIFEST: [&str; 3] = ["/", "/styles.css", "/offline.html"];

  fn settings(base_url: &str, version: &str) -> WorkerSettings {
    WorkerSettings {
      cache_version: version.to_string(),
      router: RouterConfig {
        base_url: base_url.to_string(),
        precache: MANIFEST.iter().map(|p| p.to_string()).collect(),
        api_patterns: vec!["/api/".to_string()],
        offline_page: "/offline.html".to_string(),
      },
    }
  }

  async fn mount_precache(server: &MockServer) {
    for asset in MANIFEST {
      Mock::given(method("GET"))
        .and(path(asset))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("asset:{asset}")))
        .mount(server)
        .await;
    }
  }

  fn spawn_worker(
    settings: WorkerSettings,
    cache: Arc<ResponseCache>,
    queue: Arc<SyncQueue>,
    connectivity: ConnectivityMonitor,
  ) -> WorkerHandle {
    spawn(
      settings,
      cache,
      queue,
      FetchClient::new(RetryPolicy::single_attempt(Duration::from_secs(2))),
      connectivity,
    )
  }

  #[tokio::test]
  async fn test_install_precaches_and_activation_purges_old_generations() {
    let server = MockServer::start().await;
    mount_precache(&server).await;

    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    cache
      .put(
        "v1",
        "/index.html",
        &CachedResponse {
          status: 200,
          content_type: None,
          body: b"old".to_vec(),
        },
      )
      .unwrap();

    let handle = spawn_worker(
      settings(&server.uri(), "v2"),
      Arc::clone(&cache),
      Arc::new(SyncQueue::open_in_memory().unwrap()),
      ConnectivityMonitor::new(true),
    );

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, WorkerState::Active);
    assert_eq!(status.generation, "v2");
    assert_eq!(status.generations, vec!["v2".to_string()]);

    // Requests that arrived before activation completed are served from the
    // activated generation.
    let response = handle.fetch(ShellRequest::get("/styles.css")).await.unwrap();
    assert_eq!(response.served_from, ServedFrom::Cache);
    assert_eq!(response.body, b"asset:/styles.css");
  }

  #[tokio::test]
  async fn test_install_failure_falls_back_to_surviving_generation() {
    let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
    cache
      .put(
        "v1",
        "/styles.css",
        &CachedResponse {
          status: 200,
          content_type: None,
          body: b"vintage".to_vec(),
        },
      )
      .unwrap();

    let handle = spawn_worker(
      settings("http://127.0.0.1:1", "v2"),
      Arc::clone(&cache),
      Arc::new(SyncQueue::open_in_memory().unwrap()),
      ConnectivityMonitor::new(true),
    );

    let status = handle.status().await.unwrap();
    assert_eq!(status.generation, "v1");

    let response = handle.fetch(ShellRequest::get("/styles.css")).await.unwrap();
    assert_eq!(response.served_from, ServedFrom::Cache);
    assert_eq!(response.body, b"vintage");
  }

  #[tokio::test]
  async fn test_offline_track_buffers_and_reconnect_replays() {
    let server = MockServer::start().await;
    mount_precache(&server).await;
    Mock::given(method("POST"))
      .and(path("/api/analytics"))
      .respond_with(ResponseTemplate::new(200))
      .expect(2)
      .mount(&server)
      .await;

    let queue = Arc::new(SyncQueue::open_in_memory().unwrap());
    let connectivity = ConnectivityMonitor::new(false);
    let handle = spawn_worker(
      settings(&server.uri(), "v1"),
      Arc::new(ResponseCache::open_in_memory().unwrap()),
      Arc::clone(&queue),
      connectivity.clone(),
    );

    handle.track(json!({"event": "pageview"})).await.unwrap();
    handle.track(json!({"event": "analysis"})).await.unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.queued_events, 2);

    connectivity.set_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_sync_message_drains_queue() {
    let server = MockServer::start().await;
    mount_precache(&server).await;
    Mock::given(method("POST"))
      .and(path("/api/analytics"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let queue = Arc::new(SyncQueue::open_in_memory().unwrap());
    queue.enqueue(&json!({"event": "stale"})).unwrap();

    let handle = spawn_worker(
      settings(&server.uri(), "v1"),
      Arc::new(ResponseCache::open_in_memory().unwrap()),
      Arc::clone(&queue),
      ConnectivityMonitor::new(true),
    );

    let outcome = handle.sync().await.unwrap();
    assert_eq!(outcome, ReplayOutcome { sent: 1, remaining: 0 });
  }

  #[tokio::test]
  async fn test_online_track_sends_immediately() {
    let server = MockServer::start().await;
    mount_precache(&server).await;
    Mock::given(method("POST"))
      .and(path("/api/analytics"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let queue = Arc::new(SyncQueue::open_in_memory().unwrap());
    let handle = spawn_worker(
      settings(&server.uri(), "v1"),
      Arc::new(ResponseCache::open_in_memory().unwrap()),
      Arc::clone(&queue),
      ConnectivityMonitor::new(true),
    );

    handle.track(json!({"event": "pageview"})).await.unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.queued_events, 0);
  }

  #[tokio::test]
  async fn test_shutdown_stops_the_task() {
    let server = MockServer::start().await;
    mount_precache(&server).await;

    let handle = spawn_worker(
      settings(&server.uri(), "v1"),
      Arc::new(ResponseCache::open_in_memory().unwrap()),
      Arc::new(SyncQueue::open_in_memory().unwrap()),
      ConnectivityMonitor::new(true),
    );

    handle.shutdown().await.unwrap();

    assert!(handle.fetch(ShellRequest::get("/")).await.is_err());
  }
}
