//! Caching strategies and the engine that runs them.

use color_eyre::Result;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use url::Url;

use super::classify::RequestCategory;
use super::offline::{offline_fallback, OfflinePage};
use crate::cache::{CacheGeneration, CacheStorage, CachedEntry, ResponseSource, Served};
use crate::http::{Request, Response};
use crate::net::Network;

/// Which of the generation's stores a strategy writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
  Current,
  Dynamic,
}

/// How a response is produced and how the cache is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from cache; on miss fetch and store
  CacheFirst(StoreRole),
  /// Fetch and store; on failure serve from cache
  NetworkFirst,
  /// Serve from cache now, refresh the copy in the background
  StaleWhileRevalidate,
  /// Network-first that always resolves, with a synthetic response last
  NetworkFirstWithFallback,
  /// Page loads: network, then cached page or app shell, then offline page
  Navigation,
}

impl Strategy {
  pub fn for_category(category: RequestCategory) -> Self {
    match category {
      RequestCategory::StaticAsset => Strategy::CacheFirst(StoreRole::Current),
      RequestCategory::CdnResource => Strategy::StaleWhileRevalidate,
      RequestCategory::Document => Strategy::CacheFirst(StoreRole::Dynamic),
      RequestCategory::Api => Strategy::NetworkFirst,
      RequestCategory::Navigation => Strategy::Navigation,
      RequestCategory::Other => Strategy::NetworkFirstWithFallback,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Strategy::CacheFirst(_) => "cache-first",
      Strategy::NetworkFirst => "network-first",
      Strategy::StaleWhileRevalidate => "stale-while-revalidate",
      Strategy::NetworkFirstWithFallback => "network-first-with-fallback",
      Strategy::Navigation => "navigation",
    }
  }
}

/// Runs strategies against an injected cache storage and network.
pub struct StrategyEngine<S, N> {
  storage: Arc<S>,
  network: Arc<N>,
  generation: CacheGeneration,
  /// Request for the app shell served to offline navigations
  app_shell: Request,
  offline_page: OfflinePage,
  /// Background revalidations still in flight
  revalidations: TaskTracker,
}

impl<S, N> StrategyEngine<S, N>
where
  S: CacheStorage + 'static,
  N: Network + 'static,
{
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    generation: CacheGeneration,
    app_shell: Url,
    offline_page: OfflinePage,
  ) -> Self {
    Self {
      storage,
      network,
      generation,
      app_shell: Request::get(app_shell),
      offline_page,
      revalidations: TaskTracker::new(),
    }
  }

  fn store_name(&self, role: StoreRole) -> String {
    match role {
      StoreRole::Current => self.generation.current_store(),
      StoreRole::Dynamic => self.generation.dynamic_store(),
    }
  }

  /// Produce a response for `request` using `strategy`.
  ///
  /// Cache-first, network-first and stale-while-revalidate propagate a
  /// network failure when nothing else can answer a non-navigation request.
  pub async fn respond(&self, strategy: Strategy, request: &Request) -> Result<Served> {
    debug!(url = %request.url, strategy = strategy.name(), "handling request");
    match strategy {
      Strategy::CacheFirst(role) => self.cache_first(request, role).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      Strategy::NetworkFirstWithFallback => self.network_first_with_fallback(request).await,
      Strategy::Navigation => self.navigation(request).await,
    }
  }

  /// Last-resort answer when a strategy failed outright.
  pub fn fallback(&self, request: &Request) -> Served {
    if request.is_navigation() {
      self.offline_page()
    } else {
      Served::synthesized(offline_fallback(), ResponseSource::OfflineFallback)
    }
  }

  /// Wait for background revalidations started so far.
  pub async fn settle(&self) {
    self.revalidations.close();
    self.revalidations.wait().await;
    self.revalidations.reopen();
  }

  fn offline_page(&self) -> Served {
    Served::synthesized(self.offline_page.response(), ResponseSource::OfflinePage)
  }

  /// Look in the preferred store first, then anywhere.
  fn lookup(&self, store: &str, request: &Request) -> Result<Option<CachedEntry>> {
    if let Some(entry) = self.storage.lookup(store, request)? {
      return Ok(Some(entry));
    }
    self.storage.match_any(request)
  }

  /// Store a copy of a successful response. Failures are logged, not raised:
  /// the caller still gets the network response.
  fn store_copy(&self, store: &str, request: &Request, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(err) = self
      .storage
      .put(store, CachedEntry::new(request, response.clone()))
    {
      warn!(url = %request.url, store, error = %err, "failed to cache response");
    }
  }

  async fn cache_first(&self, request: &Request, role: StoreRole) -> Result<Served> {
    let store = self.store_name(role);
    if let Some(entry) = self.lookup(&store, request)? {
      return Ok(Served::from_cache(entry));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_copy(&store, request, &response);
        Ok(Served::from_network(response))
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "cache-first fetch failed");

        // Another request may have filled the cache meanwhile
        if let Some(entry) = self.lookup(&store, request)? {
          return Ok(Served::from_cache(entry));
        }
        if request.is_navigation() {
          return Ok(self.offline_page());
        }
        Err(err)
      }
    }
  }

  async fn network_first(&self, request: &Request) -> Result<Served> {
    let store = self.generation.dynamic_store();
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_copy(&store, request, &response);
        Ok(Served::from_network(response))
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "network request failed, trying cache");

        if let Some(entry) = self.lookup(&store, request)? {
          return Ok(Served::from_cache(entry));
        }
        if request.is_navigation() {
          return Ok(self.offline_page());
        }
        Err(err)
      }
    }
  }

  async fn stale_while_revalidate(&self, request: &Request) -> Result<Served> {
    let store = self.generation.dynamic_store();

    if let Some(entry) = self.lookup(&store, request)? {
      self.spawn_revalidation(store, request.clone());
      return Ok(Served::from_cache(entry));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_copy(&store, request, &response);
        Ok(Served::from_network(response))
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "fetch failed with nothing cached");
        if request.is_navigation() {
          return Ok(self.offline_page());
        }
        Err(err)
      }
    }
  }

  /// Refresh the cached copy after the stale one has been served. Errors are
  /// logged and never reach the original caller.
  fn spawn_revalidation(&self, store: String, request: Request) {
    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);

    self.revalidations.spawn(async move {
      match network.fetch(&request).await {
        Ok(response) if response.is_success() => {
          if let Err(err) = storage.put(&store, CachedEntry::new(&request, response)) {
            warn!(url = %request.url, store, error = %err, "failed to store revalidated copy");
          } else {
            debug!(url = %request.url, "revalidated cached copy");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "revalidation not successful, keeping cached copy");
        }
        Err(err) => {
          warn!(url = %request.url, error = %err, "background revalidation failed");
        }
      }
    });
  }

  async fn network_first_with_fallback(&self, request: &Request) -> Result<Served> {
    let store = self.generation.dynamic_store();
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store_copy(&store, request, &response);
        Ok(Served::from_network(response))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "network failed, falling back");
        if let Some(entry) = self.lookup(&store, request)? {
          return Ok(Served::from_cache(entry));
        }
        Ok(Served::synthesized(
          offline_fallback(),
          ResponseSource::OfflineFallback,
        ))
      }
    }
  }

  async fn navigation(&self, request: &Request) -> Result<Served> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(Served::from_network(response)),
      Err(err) => {
        warn!(url = %request.url, error = %err, "navigation request failed");

        if let Some(entry) = self.storage.match_any(request)? {
          return Ok(Served::from_cache(entry));
        }
        if let Some(entry) = self.storage.match_any(&self.app_shell)? {
          return Ok(Served::from_cache(entry));
        }
        Ok(self.offline_page())
      }
    }
  }
}
