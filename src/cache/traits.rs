//! Core traits and types for the cache stores.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::collections::BTreeMap;

use crate::http::{Request, RequestKey, Response};

/// A cached response together with the request context it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: Response,
  /// Request header values for every header named in the response's `Vary`.
  /// `None` records that the header was absent.
  pub vary: BTreeMap<String, Option<String>>,
  /// When the entry was stored
  pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
  /// Build an entry for `response` as fetched for `request`.
  pub fn new(request: &Request, response: Response) -> Self {
    let vary = response
      .vary()
      .into_iter()
      .map(|name| {
        let value = request.header(&name).map(String::from);
        (name, value)
      })
      .collect();

    Self {
      key: request.key(),
      response,
      vary,
      cached_at: Utc::now(),
    }
  }

  /// Whether this entry can answer `request`.
  ///
  /// Same URL is assumed; this only checks the headers the response varies on.
  pub fn matches(&self, request: &Request) -> bool {
    if self.vary.contains_key("*") {
      return false;
    }
    self
      .vary
      .iter()
      .all(|(name, value)| request.header(name) == value.as_deref())
  }
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores (one per cache generation role),
/// each mapping request identity to a cached response. Every method is atomic
/// on its own; nothing here spans two stores.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it doesn't exist yet.
  fn open_store(&self, store: &str) -> Result<()>;

  /// Names of every existing store, in creation order.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns whether it existed.
  fn delete_store(&self, store: &str) -> Result<bool>;

  /// Get an entry by key from one store.
  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or replace an entry, creating the store if needed.
  fn put(&self, store: &str, entry: CachedEntry) -> Result<()>;

  /// Delete a single entry. Returns whether it existed.
  #[allow(dead_code)]
  fn delete(&self, store: &str, key: &RequestKey) -> Result<bool>;

  /// Keys of every entry in one store.
  fn keys(&self, store: &str) -> Result<Vec<RequestKey>>;

  /// Version of the generation that last finished activating.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Record the version of the generation that just activated.
  fn set_active_generation(&self, version: &str) -> Result<()>;

  /// Look up `request` in one store, honoring `Vary`.
  fn lookup(&self, store: &str, request: &Request) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .get(store, &request.key())?
        .filter(|entry| entry.matches(request)),
    )
  }

  /// Look up `request` across all stores, oldest store first.
  fn match_any(&self, request: &Request) -> Result<Option<CachedEntry>> {
    for store in self.store_names()? {
      if let Some(entry) = self.lookup(&store, request)? {
        return Ok(Some(entry));
      }
    }
    Ok(None)
  }

  /// Sum of cached body sizes across all stores.
  fn total_size(&self) -> Result<u64> {
    let mut total = 0;
    for store in self.store_names()? {
      for key in self.keys(&store)? {
        if let Some(entry) = self.get(&store, &key)? {
          total += entry.response.size();
        }
      }
    }
    Ok(total)
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Copy from a cache store
  Cache,
  /// Self-contained offline page synthesized for a navigation
  OfflinePage,
  /// Synthetic "content not available" response
  OfflineFallback,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::OfflinePage => "offline-page",
      ResponseSource::OfflineFallback => "offline-fallback",
    }
  }
}

/// A response handed back to the page, including metadata about its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// When the copy was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ResponseSource::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  pub fn synthesized(response: Response, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      cached_at: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  #[test]
  fn test_entry_without_vary_matches_any_headers() {
    let url = Url::parse("https://studymate.test/styles.css").unwrap();
    let entry = CachedEntry::new(&Request::get(url.clone()), Response::new(200, "body{}"));
    let other = Request::get(url).with_header("accept-language", "de");
    assert!(entry.matches(&other));
  }

  #[test]
  fn test_entry_honors_vary() {
    let url = Url::parse("https://api.studymate.test/quote").unwrap();
    let en = Request::get(url.clone()).with_header("accept-language", "en");
    let de = Request::get(url.clone()).with_header("accept-language", "de");
    let response = Response::new(200, "hello").with_header("vary", "Accept-Language");

    let entry = CachedEntry::new(&en, response);
    assert!(entry.matches(&en));
    assert!(!entry.matches(&de));
    assert!(!entry.matches(&Request::get(url)));
  }

  #[test]
  fn test_vary_star_never_matches() {
    let url = Url::parse("https://studymate.test/x").unwrap();
    let request = Request::get(url);
    let entry = CachedEntry::new(&request, Response::new(200, "x").with_header("vary", "*"));
    assert!(!entry.matches(&request));
  }
}
