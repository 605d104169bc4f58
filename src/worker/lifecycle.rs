//! Install, activation and version migration of cache generations.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use url::Url;

use super::clients::Clients;
use super::manifest::Manifest;
use crate::cache::{CacheGeneration, CacheStorage, CachedEntry};
use crate::http::Request;
use crate::net::Network;

/// Worker lifecycle states relevant to caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Not installed yet
  Parsed,
  Installing,
  /// Installed, waiting to activate
  Waiting,
  Active,
  /// Failed to install, or superseded
  Redundant,
}

impl LifecycleState {
  pub fn as_str(&self) -> &'static str {
    match self {
      LifecycleState::Parsed => "parsed",
      LifecycleState::Installing => "installing",
      LifecycleState::Waiting => "waiting",
      LifecycleState::Active => "active",
      LifecycleState::Redundant => "redundant",
    }
  }
}

/// Result of pre-populating the current store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: Vec<Url>,
  /// Assets that could not be fetched, with the reason
  pub failed: Vec<(Url, String)>,
}

/// Result of activating a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  /// Condemned stores that were deleted
  pub deleted: Vec<String>,
  pub claimed: usize,
}

/// Moves a cache generation through install and activation.
pub struct Lifecycle<S, N> {
  storage: Arc<S>,
  network: Arc<N>,
  clients: Arc<dyn Clients>,
  generation: CacheGeneration,
  manifest: Manifest,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStorage, N: Network> Lifecycle<S, N> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<N>,
    clients: Arc<dyn Clients>,
    generation: CacheGeneration,
    manifest: Manifest,
  ) -> Self {
    Self {
      storage,
      network,
      clients,
      generation,
      manifest,
      state: Mutex::new(LifecycleState::Parsed),
    }
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: LifecycleState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  /// Install then activate immediately, without waiting for old pages to close.
  pub async fn install_and_activate(&self) -> Result<(InstallReport, ActivateReport)> {
    let installed = self.install().await?;
    let activated = self.activate().await?;
    Ok((installed, activated))
  }

  /// Bring the configured generation into force if it isn't already.
  /// Returns whether a migration ran.
  pub async fn ensure_current(&self) -> Result<bool> {
    let active = self.storage.active_generation()?;
    if active.as_deref() == Some(self.generation.version()) {
      self.set_state(LifecycleState::Active);
      return Ok(false);
    }

    info!(
      from = active.as_deref().unwrap_or("none"),
      to = self.generation.version(),
      "migrating cache generation"
    );
    self.install_and_activate().await?;
    Ok(true)
  }

  /// Populate the current store from the manifest.
  ///
  /// Individual assets that fail are logged and skipped; only a storage
  /// failure fails the install.
  pub async fn install(&self) -> Result<InstallReport> {
    self.set_state(LifecycleState::Installing);
    info!(
      version = self.generation.version(),
      assets = self.manifest.len(),
      "installing"
    );

    let store = self.generation.current_store();
    if let Err(err) = self.storage.open_store(&store) {
      self.set_state(LifecycleState::Redundant);
      return Err(err);
    }

    let results = join_all(
      self
        .manifest
        .entries()
        .iter()
        .map(|url| self.precache(&store, url)),
    )
    .await;

    let mut report = InstallReport::default();
    for (url, result) in self.manifest.entries().iter().zip(results) {
      match result {
        Ok(()) => report.cached.push(url.clone()),
        Err(err) => {
          warn!(url = %url, error = %err, "failed to cache static asset, skipping");
          report.failed.push((url.clone(), err.to_string()));
        }
      }
    }

    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "static asset caching completed"
    );
    self.set_state(LifecycleState::Waiting);
    Ok(report)
  }

  async fn precache(&self, store: &str, url: &Url) -> Result<()> {
    let request = Request::get(url.clone()).with_header("cache-control", "no-cache");
    let response = self.network.fetch(&request).await?;
    if !response.is_success() {
      return Err(eyre!("Request for {} returned status {}", url, response.status));
    }
    self.storage.put(store, CachedEntry::new(&request, response))
  }

  /// Skip the waiting phase. Returns whether a waiting generation activated.
  pub async fn skip_waiting(&self) -> Result<bool> {
    if self.state() != LifecycleState::Waiting {
      return Ok(false);
    }
    self.activate().await?;
    Ok(true)
  }

  /// Delete every store this generation doesn't own, then claim open pages.
  pub async fn activate(&self) -> Result<ActivateReport> {
    info!(version = self.generation.version(), "activating");
    let mut report = ActivateReport::default();

    for store in self.storage.store_names()? {
      if self.generation.owns(&store) {
        continue;
      }
      match self.storage.delete_store(&store) {
        Ok(_) => {
          info!(store = %store, "deleted old cache");
          report.deleted.push(store);
        }
        Err(err) => warn!(store = %store, error = %err, "failed to delete old cache"),
      }
    }

    self.storage.open_store(&self.generation.dynamic_store())?;
    self
      .storage
      .set_active_generation(self.generation.version())?;

    report.claimed = self.clients.claim()?;
    self.set_state(LifecycleState::Active);
    info!(
      deleted = report.deleted.len(),
      claimed = report.claimed,
      "activated"
    );
    Ok(report)
  }
}
