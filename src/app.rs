//! Application context.
//!
//! `App` explicitly constructs every component the commands need (the
//! connectivity monitor, both cache tiers, the analysis clients and the
//! worker task) and tears them down on shutdown. Nothing in the crate is a
//! module-level singleton.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{AnalysisClient, AnalysisOutcome, CachedAnalysisClient};
use crate::cache::{probe_storage, MemoryCache, OfflineStore, StorageAvailability};
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::net::{FetchClient, RetryPolicy};
use crate::worker::{
  self, ResponseCache, RouterConfig, ShellRequest, SyncQueue, WorkerHandle, WorkerSettings,
};

pub struct App {
  client: CachedAnalysisClient,
  worker: WorkerHandle,
  connectivity: ConnectivityMonitor,
}

impl App {
  pub async fn new(config: Config, offline: bool) -> Result<Self> {
    url::Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", config.api.base_url, e))?;
    url::Url::parse(config.shell_base_url())
      .map_err(|e| eyre!("Invalid worker.base_url {}: {}", config.shell_base_url(), e))?;

    let connectivity = ConnectivityMonitor::new(!offline);

    let data_dir = config.data_dir();
    let availability = probe_storage(data_dir.as_deref());

    let max_age = chrono::Duration::days(config.cache.offline_max_age_days);
    let store = match &data_dir {
      Some(dir) => OfflineStore::open_or_noop(availability, &dir.join("analysis.db"), max_age),
      None => OfflineStore::open_or_noop(availability, Path::new("analysis.db"), max_age),
    };

    let memory = MemoryCache::with_sweeper(
      Duration::from_secs(config.cache.ttl_secs),
      Duration::from_secs(config.cache.sweep_interval_secs),
    );

    let api_key = Config::get_api_key();
    let inner = AnalysisClient::new(
      &config.api.base_url,
      api_key.as_deref(),
      config.api.retry.policy(),
    );
    let client = CachedAnalysisClient::new(inner, memory, store, connectivity.clone());

    let (response_cache, sync_queue) = match &data_dir {
      Some(dir) if availability == StorageAvailability::Available => {
        let db = dir.join("worker.db");
        (ResponseCache::open(&db)?, SyncQueue::open(&db)?)
      }
      _ => (ResponseCache::open_in_memory()?, SyncQueue::open_in_memory()?),
    };

    let settings = WorkerSettings {
      cache_version: config.worker.cache_version.clone(),
      router: RouterConfig {
        base_url: config.shell_base_url().to_string(),
        precache: config.worker.precache.clone(),
        api_patterns: config.worker.api_patterns.clone(),
        offline_page: config.worker.offline_page.clone(),
      },
    };
    let worker_fetch = FetchClient::new(RetryPolicy::single_attempt(Duration::from_millis(
      config.api.retry.timeout_ms,
    )));
    let worker = worker::spawn(
      settings,
      Arc::new(response_cache),
      Arc::new(sync_queue),
      worker_fetch,
      connectivity.clone(),
    );

    Ok(Self {
      client,
      worker,
      connectivity,
    })
  }

  /// Fetch and print the analysis for a postal code, recording an analytics
  /// event (buffered while offline).
  pub async fn analyze(&self, key: &str, refresh: bool) -> Result<()> {
    let outcome = self.client.fetch_analysis(key, refresh).await?;
    print_report(&outcome);

    let event = serde_json::json!({
      "event": "analysis_viewed",
      "postal_code": outcome.report.postal_code,
      "source": outcome.source.as_str(),
      "timestamp": Utc::now().to_rfc3339(),
    });
    self.worker.track(event).await?;

    Ok(())
  }

  /// Fetch an app-shell resource through the worker router.
  pub async fn get_resource(&self, path: &str, navigation: bool) -> Result<()> {
    let request = if navigation {
      ShellRequest::navigation(path)
    } else {
      ShellRequest::get(path)
    };
    let response = self.worker.fetch(request).await?;

    println!(
      "HTTP {} (served from {})",
      response.status,
      response.served_from.as_str()
    );
    if let Some(content_type) = &response.content_type {
      println!("Content-Type: {}", content_type);
    }

    let body = String::from_utf8_lossy(&response.body);
    if body.chars().count() > 2000 {
      let truncated: String = body.chars().take(2000).collect();
      println!("{}…", truncated);
    } else {
      println!("{}", body);
    }

    Ok(())
  }

  /// Replay buffered analytics events now.
  pub async fn sync(&self) -> Result<()> {
    let outcome = self.worker.sync().await?;
    println!(
      "Replayed {} buffered event(s); {} remaining",
      outcome.sent, outcome.remaining
    );
    Ok(())
  }

  /// Print connectivity, cache and worker state.
  pub async fn status(&self) -> Result<()> {
    let worker = self.worker.status().await?;

    let connectivity = if self.connectivity.is_online() {
      "online"
    } else {
      "offline"
    };
    let records = if self.client.storage_durable() {
      "durable"
    } else {
      "disabled (storage unavailable)"
    };

    println!("Connectivity:      {}", connectivity);
    println!("Memory cache:      {} entries", self.client.memory_entries());
    println!("Offline records:   {}", records);
    println!("Worker state:      {:?}", worker.state);
    println!("Serving generation: {}", worker.generation);
    println!("Generations held:  {}", worker.generations.join(", "));
    println!("Buffered events:   {}", worker.queued_events);

    Ok(())
  }

  /// Drop every cached report, in memory and on disk.
  pub async fn clear_cache(&self) -> Result<()> {
    self.client.clear_caches();
    println!("Cleared the memory cache and offline records.");
    Ok(())
  }

  /// Stop the worker task. Messages already queued are processed first.
  pub async fn shutdown(self) -> Result<()> {
    self.worker.shutdown().await
  }
}

fn print_report(outcome: &AnalysisOutcome) {
  let report = &outcome.report;

  println!(
    "Water analysis for {} (source: {})",
    report.postal_code,
    outcome.source.as_str()
  );
  println!("  pH         {:>8.2}", report.ph);
  println!("  Hardness   {:>8.2} mg/L CaCO3", report.hardness_mg_l);
  println!("  TDS        {:>8.2} ppm", report.tds_ppm);
  println!("  Chlorine   {:>8.2} mg/L", report.chlorine_mg_l);
  println!("  Lead       {:>8.2} µg/L", report.lead_ug_l);

  if !report.contaminants.is_empty() {
    println!("  Contaminants:");
    for contaminant in &report.contaminants {
      match contaminant.legal_limit {
        Some(limit) => println!(
          "    {:<10} {:>8.2} {} (limit {})",
          contaminant.name, contaminant.level, contaminant.unit, limit
        ),
        None => println!(
          "    {:<10} {:>8.2} {}",
          contaminant.name, contaminant.level, contaminant.unit
        ),
      }
    }
  }

  println!("  Risk score {:>5}/100", report.risk_score);
  println!("  {}", report.advisory);
  if report.simulated {
    println!("  (simulated demo data; the analysis service was unreachable)");
  }
}
