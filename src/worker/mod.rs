//! The offline worker: request interception, cache lifecycle and the
//! background work it schedules.

mod classify;
mod clients;
mod lifecycle;
mod manifest;
mod offline;
mod strategy;

pub use classify::Classifier;
pub use clients::{Clients, HeadlessClients};
#[cfg(test)]
pub use clients::WindowClient;
pub use lifecycle::{ActivateReport, InstallReport, Lifecycle, LifecycleState};
pub use manifest::{Manifest, DEFAULT_MANIFEST};
pub use offline::OfflinePage;
pub use strategy::{Strategy, StrategyEngine};

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheGeneration, CacheStorage, Served};
use crate::config::Config;
use crate::gateway::Notifier;
use crate::http::{Request, Response};
use crate::net::{Backend, Network};
use crate::sync::{standard_triggers, PendingSyncRecord, QueueName, StudyReminder, SyncQueue, SyncStore, TriggerRegistry};

/// What the worker did with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not handled; the host performs the request itself
  Bypass,
  Served(Served),
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
  pub version: String,
  pub active_generation: Option<String>,
  pub state: LifecycleState,
  /// Store name and entry count
  pub stores: Vec<(String, usize)>,
  pub queues: Vec<(QueueName, usize)>,
  pub cache_size: u64,
}

/// All worker components, wired once at startup.
pub struct ServiceWorker<S, N, B> {
  pub(crate) generation: CacheGeneration,
  pub(crate) app_name: String,
  pub(crate) start_url: Url,
  pub(crate) window_match: String,
  classifier: Classifier,
  engine: StrategyEngine<S, N>,
  pub(crate) lifecycle: Lifecycle<S, N>,
  pub(crate) storage: Arc<S>,
  pub(crate) network: Arc<N>,
  sync: Arc<SyncQueue<S, B>>,
  triggers: TriggerRegistry,
  pub(crate) clients: Arc<dyn Clients>,
  pub(crate) notifier: Arc<dyn Notifier>,
}

impl<S, N, B> ServiceWorker<S, N, B>
where
  S: CacheStorage + SyncStore + 'static,
  N: Network + 'static,
  B: Backend + 'static,
{
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    network: Arc<N>,
    backend: Arc<B>,
    clients: Arc<dyn Clients>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let generation = CacheGeneration::new(config.cache_prefix.as_str(), config.version.as_str());
    let manifest = Manifest::resolve(&config.origin, &config.manifest_entries())?;
    let app_shell = config
      .origin
      .join(&config.app_shell)
      .map_err(|e| eyre!("Invalid app shell '{}': {}", config.app_shell, e))?;

    let offline_page = OfflinePage::new(
      &config.app_name,
      "./",
      config.schedule.connectivity_interval_secs,
    );
    let engine = StrategyEngine::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      generation.clone(),
      app_shell,
      offline_page,
    );
    let lifecycle = Lifecycle::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      Arc::clone(&clients),
      generation.clone(),
      manifest.clone(),
    );

    let sync = Arc::new(SyncQueue::new(Arc::clone(&storage), backend));
    let reminder = Arc::new(StudyReminder::new(
      Arc::clone(&notifier),
      &config.app_name,
      config.reminder_after()?,
    ));
    let triggers = standard_triggers(Arc::clone(&sync), reminder);

    Ok(Self {
      generation,
      app_name: config.app_name.clone(),
      start_url: config.origin.clone(),
      window_match: config.window_match.clone(),
      classifier: Classifier::new(manifest),
      engine,
      lifecycle,
      storage,
      network,
      sync,
      triggers,
      clients,
      notifier,
    })
  }

  /// Bring the configured cache generation into force. Returns whether a
  /// migration ran.
  pub async fn start(&self) -> Result<bool> {
    self.lifecycle.ensure_current().await
  }

  /// Install and activate the configured generation unconditionally.
  pub async fn install(&self) -> Result<(InstallReport, ActivateReport)> {
    self.lifecycle.install_and_activate().await
  }

  /// Answer an intercepted request.
  ///
  /// Never fails: when a strategy gives up, navigations get the offline page
  /// and everything else the synthetic offline response.
  pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
    if !Classifier::intercepts(request) {
      debug!(url = %request.url, method = %request.method, "not intercepted");
      return FetchOutcome::Bypass;
    }

    let category = self.classifier.classify(request);
    let strategy = Strategy::for_category(category);
    debug!(url = %request.url, category = category.as_str(), "classified request");

    match self.engine.respond(strategy, request).await {
      Ok(served) => FetchOutcome::Served(served),
      Err(err) => {
        warn!(url = %request.url, strategy = strategy.name(), error = %err, "strategy failed, serving fallback");
        FetchOutcome::Served(self.engine.fallback(request))
      }
    }
  }

  /// Perform a bypassed request directly.
  pub async fn passthrough(&self, request: &Request) -> Result<Response> {
    self.network.fetch(request).await
  }

  pub fn enqueue(&self, queue: QueueName, payload: Value) -> Result<PendingSyncRecord> {
    self.sync.enqueue(queue, payload)
  }

  /// Fire a background-sync or periodic tag. Unknown tags return `Ok(false)`.
  pub async fn fire_trigger(&self, tag: &str) -> Result<bool> {
    self.triggers.fire(tag).await
  }

  pub fn trigger_tags(&self) -> Vec<&str> {
    self.triggers.tags()
  }

  /// Wait for background work started so far.
  pub async fn settle(&self) {
    self.engine.settle().await;
  }

  pub fn status(&self) -> Result<WorkerStatus> {
    let mut stores = Vec::new();
    for name in self.storage.store_names()? {
      let count = self.storage.keys(&name)?.len();
      stores.push((name, count));
    }

    let mut queues = Vec::new();
    for queue in QueueName::ALL {
      queues.push((queue, self.sync.depth(queue)?));
    }

    Ok(WorkerStatus {
      version: self.generation.version().to_string(),
      active_generation: self.storage.active_generation()?,
      state: self.lifecycle.state(),
      stores,
      queues,
      cache_size: self.storage.total_size()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ResponseSource;
  use crate::http::Method;
  use crate::testing::harness;
  use serde_json::json;

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn served(outcome: FetchOutcome) -> Served {
    match outcome {
      FetchOutcome::Served(served) => served,
      FetchOutcome::Bypass => panic!("request was bypassed"),
    }
  }

  #[tokio::test]
  async fn test_static_asset_served_from_cache_without_network() {
    let h = harness();
    h.network.respond("https://studymate.test/app.js", Response::new(200, "console.log(1)"));
    h.worker.install().await.unwrap();
    let fetches = h.network.calls();

    let served = served(h.worker.handle_fetch(&get("https://studymate.test/app.js")).await);
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"console.log(1)");
    assert_eq!(h.network.calls(), fetches);
  }

  #[tokio::test]
  async fn test_api_success_then_offline_falls_back_to_cached_copy() {
    let h = harness();
    let url = "https://studymate.test/api/questions";
    h.network.respond(url, Response::new(200, "[1]"));

    let first = served(h.worker.handle_fetch(&get(url)).await);
    assert_eq!(first.source, ResponseSource::Network);

    h.network.set_offline(true);
    let second = served(h.worker.handle_fetch(&get(url)).await);
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body, b"[1]");
  }

  #[tokio::test]
  async fn test_cdn_resource_cached_then_served_offline() {
    let h = harness();
    let url = "https://cdnjs.cloudflare.com/ajax/libs/chart.js/4.4.0/chart.umd.min.js";
    h.network.respond(url, Response::new(200, "chart"));

    served(h.worker.handle_fetch(&get(url)).await);
    h.network.set_offline(true);
    let offline = served(h.worker.handle_fetch(&get(url)).await);
    h.worker.settle().await;

    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.response.body, b"chart");
  }

  #[tokio::test]
  async fn test_offline_navigation_with_empty_cache_gets_offline_page() {
    let h = harness();
    h.network.set_offline(true);

    let request = Request::navigate(Url::parse("https://studymate.test/index.html").unwrap());
    let served = served(h.worker.handle_fetch(&request).await);
    assert_eq!(served.source, ResponseSource::OfflinePage);
    assert_eq!(served.response.status, 200);
    assert_eq!(served.response.content_type(), Some("text/html; charset=utf-8"));
  }

  #[tokio::test]
  async fn test_failed_subresource_gets_synthetic_response() {
    let h = harness();
    h.network.set_offline(true);

    let served = served(h.worker.handle_fetch(&get("https://studymate.test/app.js")).await);
    assert_eq!(served.source, ResponseSource::OfflineFallback);
    assert_eq!(served.response.status, 200);
  }

  #[tokio::test]
  async fn test_non_get_and_non_http_are_bypassed() {
    let h = harness();
    let post = Request::new(Method::Post, Url::parse("https://studymate.test/api/notes").unwrap());
    assert!(matches!(h.worker.handle_fetch(&post).await, FetchOutcome::Bypass));

    let ext = get("chrome-extension://abc/script.js");
    assert!(matches!(h.worker.handle_fetch(&ext).await, FetchOutcome::Bypass));
    assert_eq!(h.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_start_migrates_and_status_reports() {
    let h = harness();
    assert!(h.worker.start().await.unwrap());
    assert!(!h.worker.start().await.unwrap());

    h.worker.enqueue(QueueName::Notes, json!({"text": "mitosis"})).unwrap();
    let status = h.worker.status().unwrap();
    assert_eq!(status.version, "2.0.0");
    assert_eq!(status.active_generation.as_deref(), Some("2.0.0"));
    assert_eq!(status.state, LifecycleState::Active);
    let names: Vec<_> = status.stores.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["studymate-v2.0.0", "studymate-dynamic-v2.0.0"]);
    assert!(status.queues.contains(&(QueueName::Notes, 1)));
    assert!(h.backend.delivered().is_empty());
    assert_eq!(h.clients.claims(), 1);
    assert!(h.notifier.shown().is_empty());
  }

  #[tokio::test]
  async fn test_trigger_delivers_queued_records() {
    let h = harness();
    h.worker.enqueue(QueueName::UserData, json!({"name": "Ada"})).unwrap();
    assert!(h.worker.fire_trigger("sync-user-data").await.unwrap());
    assert_eq!(h.backend.delivered().len(), 1);
    assert_eq!(h.backend.delivered()[0].0, "users");
    assert!(!h.worker.fire_trigger("sync-everything").await.unwrap());
  }

  #[tokio::test]
  async fn test_new_rejects_out_of_range_reminder_window() {
    let mut config = crate::testing::test_config();
    config.reminder_after_hours = i64::MAX;
    let built = ServiceWorker::new(
      &config,
      Arc::new(crate::cache::MemoryStorage::new()),
      Arc::new(crate::testing::MockNetwork::new()),
      Arc::new(crate::testing::MockBackend::new()),
      Arc::new(crate::testing::RecordingClients::new()),
      Arc::new(crate::testing::RecordingNotifier::new()),
    );
    assert!(built.is_err());
  }
}
