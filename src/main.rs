mod cache;
mod config;
mod gateway;
mod http;
mod net;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use config::Config;
use gateway::{parse_message, ConsoleNotifier};
use http::{Method, Request};
use net::{HttpNetwork, RestBackend};
use sync::{HostEvent, HostEvents, QueueName, SyncStore};
use worker::{FetchOutcome, HeadlessClients, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "studymate-offline")]
#[command(about = "Offline cache and background sync for the StudyMate app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/studymate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep caches and queues in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the configured cache generation
  Install,
  /// Fetch a URL through the worker
  Fetch {
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Send a JSON message, e.g. '{"type":"GET_VERSION"}'
  Message { json: String },
  /// Queue a record for background sync
  Enqueue {
    /// user-data, study-progress or notes
    queue: String,
    json: String,
  },
  /// Fire a sync or periodic tag
  Trigger { tag: String },
  /// Show a push notification from an optional payload
  Push { payload: Option<String> },
  /// Click the current notification
  Click {
    #[arg(long)]
    action: Option<String>,
  },
  /// Show version, stores and queue depths
  Status,
  /// Run until Ctrl-C, syncing on reconnect and on schedule
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  if args.ephemeral {
    let _guard = init_logging(None)?;
    run(args.command, config, Arc::new(MemoryStorage::new())).await
  } else {
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)
      .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;

    let _guard = init_logging(Some(&data_dir.join("logs")))?;
    let storage = SqliteStorage::open(&data_dir.join("offline.db"))?;
    run(args.command, config, Arc::new(storage)).await
  }
}

/// Log to stderr, plus a daily log file when `log_dir` is set. The returned
/// guard flushes the file writer on drop.
fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "studymate-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_ansi(false).with_writer(writer);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  Ok(guard)
}

async fn run<S>(command: Command, config: Config, storage: Arc<S>) -> Result<()>
where
  S: CacheStorage + SyncStore + 'static,
{
  let network = Arc::new(HttpNetwork::new(config.fetch_timeout())?);
  let backend = Arc::new(RestBackend::new(
    config.backend_url.clone(),
    Config::backend_token(),
    config.fetch_timeout(),
  )?);
  let worker = ServiceWorker::new(
    &config,
    storage,
    network,
    Arc::clone(&backend),
    Arc::new(HeadlessClients),
    Arc::new(ConsoleNotifier),
  )?;

  if !matches!(command, Command::Install) && worker.start().await? {
    info!(version = %config.version, "cache generation migrated");
  }

  match command {
    Command::Install => {
      let (installed, activated) = worker.install().await?;
      println!(
        "installed {}: {} cached, {} failed, {} old stores deleted",
        config.version,
        installed.cached.len(),
        installed.failed.len(),
        activated.deleted.len()
      );
      for (url, reason) in &installed.failed {
        println!("  failed {}: {}", url, reason);
      }
    }
    Command::Fetch {
      url,
      method,
      navigate,
      accept,
      output,
    } => {
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let method: Method = method.parse()?;
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::new(method, url)
      };
      if let Some(accept) = accept {
        request = request.with_header("accept", accept);
      }

      let (response, source) = match worker.handle_fetch(&request).await {
        FetchOutcome::Served(served) => (served.response, served.source.as_str()),
        FetchOutcome::Bypass => (worker.passthrough(&request).await?, "bypass"),
      };
      eprintln!("{} ({})", response.status, source);

      match output {
        Some(path) => std::fs::write(&path, &response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write response body: {}", e))?,
      }
    }
    Command::Message { json } => match parse_message(&json)? {
      Some(message) => {
        if let Some(reply) = worker.handle_message(message).await? {
          println!("{}", serde_json::to_string(&reply)?);
        }
      }
      None => eprintln!("message ignored"),
    },
    Command::Enqueue { queue, json } => {
      let queue: QueueName = queue.parse()?;
      let payload =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      let record = worker.enqueue(queue, payload)?;
      println!("queued {} #{}", queue, record.id);
    }
    Command::Trigger { tag } => {
      if !worker.fire_trigger(&tag).await? {
        eprintln!("unknown tag '{}' (known: {})", tag, worker.trigger_tags().join(", "));
      }
    }
    Command::Push { payload } => {
      worker.handle_push(payload.as_deref().map(str::as_bytes))?;
    }
    Command::Click { action } => {
      let outcome = worker.handle_notification_click(action.as_deref())?;
      info!(outcome = ?outcome, "notification click handled");
    }
    Command::Status => {
      let status = worker.status()?;
      println!("version:    {}", status.version);
      println!(
        "active:     {}",
        status.active_generation.as_deref().unwrap_or("none")
      );
      println!("state:      {}", status.state.as_str());
      println!("cache size: {} bytes", status.cache_size);
      println!("stores:");
      for (name, entries) in &status.stores {
        println!("  {:<32} {} entries", name, entries);
      }
      println!("queues:");
      for (queue, depth) in &status.queues {
        println!("  {:<32} {} pending", queue.as_str(), depth);
      }
    }
    Command::Watch => watch(&worker, backend, &config).await,
  }

  worker.settle().await;
  Ok(())
}

/// Drive background work from connectivity changes and the periodic schedule.
async fn watch<S>(
  worker: &ServiceWorker<S, HttpNetwork, RestBackend>,
  backend: Arc<RestBackend>,
  config: &Config,
) where
  S: CacheStorage + SyncStore + 'static,
{
  let mut events = HostEvents::spawn(backend, &config.schedule);
  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);
  info!("watching for connectivity changes, Ctrl-C to stop");

  loop {
    tokio::select! {
      _ = &mut shutdown => {
        info!("shutting down");
        break;
      }
      event = events.next() => match event {
        Some(HostEvent::Restored) => {
          info!("connection restored, syncing queued records");
          for queue in QueueName::ALL {
            // Failures are logged by the registry and retried on the next restore
            let _ = worker.fire_trigger(queue.sync_tag()).await;
          }
        }
        Some(HostEvent::WentOffline) => warn!("backend unreachable, working offline"),
        Some(HostEvent::Periodic(tag)) => {
          let _ = worker.fire_trigger(tag).await;
        }
        None => break,
      }
    }
  }
}
