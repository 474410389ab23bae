use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::net::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
  /// Override the directory holding databases and logs.
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Origin of the analysis service, e.g. "https://api.tapcheck.example".
  pub base_url: String,
  #[serde(default)]
  pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub timeout_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay_ms: 1000,
      timeout_ms: 8000,
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.max_attempts,
      base_delay: Duration::from_millis(self.base_delay_ms),
      attempt_timeout: Duration::from_millis(self.timeout_ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Memory-cache TTL in seconds.
  pub ttl_secs: u64,
  /// Memory-cache sweep interval in seconds.
  pub sweep_interval_secs: u64,
  /// How long offline records stay servable, in days.
  pub offline_max_age_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: 300,
      sweep_interval_secs: 60,
      offline_max_age_days: 7,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Version string naming the response-cache generation for this build.
  pub cache_version: String,
  /// Origin the app shell is served from; defaults to the API origin.
  pub base_url: Option<String>,
  /// Paths fetched into the cache at install.
  pub precache: Vec<String>,
  /// Path substrings marking cacheable API requests.
  pub api_patterns: Vec<String>,
  /// Precached page served to failed navigations.
  pub offline_page: String,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      cache_version: "tapcheck-static-v1".to_string(),
      base_url: None,
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles.css".to_string(),
        "/app.js".to_string(),
        "/offline.html".to_string(),
      ],
      api_patterns: vec!["/api/".to_string(), "/water-analysis".to_string()],
      offline_page: "/offline.html".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tapcheck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tapcheck/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tapcheck/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tapcheck.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tapcheck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Directory holding databases and logs, if one can be determined.
  pub fn data_dir(&self) -> Option<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Some(dir.clone());
    }
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|p| p.join("tapcheck"))
  }

  /// Origin the worker routes shell traffic against.
  pub fn shell_base_url(&self) -> &str {
    self.worker.base_url.as_deref().unwrap_or(&self.api.base_url)
  }

  /// Get the API key from the environment, if one is configured.
  ///
  /// The analysis endpoint is public in demo deployments, so the key is
  /// optional.
  pub fn get_api_key() -> Option<String> {
    std::env::var("TAPCHECK_API_KEY").ok()
  }
}
