mod analysis;
mod app;
mod cache;
mod config;
mod connectivity;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tapcheck")]
#[command(about = "Offline-first client for the tapcheck water-quality analysis service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tapcheck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the water analysis for a postal code
  Analyze {
    /// Postal code to look up
    key: String,

    /// Skip the memory cache and refetch
    #[arg(short, long)]
    refresh: bool,
  },

  /// Fetch an app-shell resource through the offline-aware router
  Get {
    /// Resource path, e.g. /styles.css or /api/history
    path: String,

    /// Treat the request as a page navigation
    #[arg(long)]
    navigation: bool,
  },

  /// Replay buffered analytics events now
  Sync,

  /// Show connectivity, cache and worker state
  Status,

  /// Drop every cached report
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(config.data_dir().as_deref());

  let app = app::App::new(config, args.offline).await?;

  match &args.command {
    Command::Analyze { key, refresh } => app.analyze(key, *refresh).await?,
    Command::Get { path, navigation } => app.get_resource(path, *navigation).await?,
    Command::Sync => app.sync().await?,
    Command::Status => app.status().await?,
    Command::ClearCache => app.clear_cache().await?,
  }

  app.shutdown().await?;

  Ok(())
}

/// Log to a file under the data directory so command output stays clean.
fn init_tracing(
  data_dir: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let dir = data_dir?.join("logs");
  std::fs::create_dir_all(&dir).ok()?;

  let appender = tracing_appender::rolling::daily(dir, "tapcheck.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tapcheck=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}
