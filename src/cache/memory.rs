//! In-memory storage, used for ephemeral runs and tests.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, CachedEntry};
use crate::http::RequestKey;
use crate::sync::{PendingSyncRecord, QueueName, SyncStore};

#[derive(Default)]
struct State {
  /// Stores in creation order; entries keyed by request hash
  stores: Vec<(String, BTreeMap<String, CachedEntry>)>,
  records: Vec<PendingSyncRecord>,
  next_record_id: i64,
  active_generation: Option<String>,
  last_activity: Option<DateTime<Utc>>,
}

impl State {
  fn store(&self, name: &str) -> Option<&BTreeMap<String, CachedEntry>> {
    self
      .stores
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, entries)| entries)
  }

  fn store_mut(&mut self, name: &str) -> &mut BTreeMap<String, CachedEntry> {
    let index = match self.stores.iter().position(|(n, _)| n == name) {
      Some(index) => index,
      None => {
        self.stores.push((name.to_string(), BTreeMap::new()));
        self.stores.len() - 1
      }
    };
    &mut self.stores[index].1
  }
}

/// Storage that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryStorage {
  state: Mutex<State>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> Result<MutexGuard<'_, State>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open_store(&self, store: &str) -> Result<()> {
    self.state()?.store_mut(store);
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    Ok(self.state()?.stores.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut state = self.state()?;
    let before = state.stores.len();
    state.stores.retain(|(n, _)| n != store);
    Ok(state.stores.len() != before)
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .state()?
        .store(store)
        .and_then(|entries| entries.get(key.hash()))
        .cloned(),
    )
  }

  fn put(&self, store: &str, entry: CachedEntry) -> Result<()> {
    self
      .state()?
      .store_mut(store)
      .insert(entry.key.hash().to_string(), entry);
    Ok(())
  }

  fn delete(&self, store: &str, key: &RequestKey) -> Result<bool> {
    let mut state = self.state()?;
    if state.store(store).is_none() {
      return Ok(false);
    }
    Ok(state.store_mut(store).remove(key.hash()).is_some())
  }

  fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    Ok(
      self
        .state()?
        .store(store)
        .map(|entries| entries.values().map(|e| e.key.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn active_generation(&self) -> Result<Option<String>> {
    Ok(self.state()?.active_generation.clone())
  }

  fn set_active_generation(&self, version: &str) -> Result<()> {
    self.state()?.active_generation = Some(version.to_string());
    Ok(())
  }
}

impl SyncStore for MemoryStorage {
  fn push_record(
    &self,
    queue: QueueName,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<PendingSyncRecord> {
    let mut state = self.state()?;
    state.next_record_id += 1;
    let record = PendingSyncRecord {
      id: state.next_record_id,
      queue,
      payload: payload.clone(),
      enqueued_at,
    };
    state.records.push(record.clone());
    Ok(record)
  }

  fn pending(&self, queue: QueueName) -> Result<Vec<PendingSyncRecord>> {
    Ok(
      self
        .state()?
        .records
        .iter()
        .filter(|r| r.queue == queue)
        .cloned()
        .collect(),
    )
  }

  fn remove_record(&self, id: i64) -> Result<bool> {
    let mut state = self.state()?;
    let before = state.records.len();
    state.records.retain(|r| r.id != id);
    Ok(state.records.len() != before)
  }

  fn record_activity(&self, at: DateTime<Utc>) -> Result<()> {
    self.state()?.last_activity = Some(at);
    Ok(())
  }

  fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
    Ok(self.state()?.last_activity)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Request, Response};
  use url::Url;

  #[test]
  fn test_match_any_searches_stores_in_creation_order() {
    let storage = MemoryStorage::new();
    let request = Request::get(Url::parse("https://studymate.test/app.js").unwrap());
    storage.open_store("first").unwrap();
    storage
      .put("second", CachedEntry::new(&request, Response::new(200, "second")))
      .unwrap();
    assert_eq!(
      storage.match_any(&request).unwrap().unwrap().response.body,
      b"second"
    );

    storage
      .put("first", CachedEntry::new(&request, Response::new(200, "first")))
      .unwrap();
    assert_eq!(
      storage.match_any(&request).unwrap().unwrap().response.body,
      b"first"
    );
  }

  #[test]
  fn test_default_total_size() {
    let storage = MemoryStorage::new();
    let a = Request::get(Url::parse("https://studymate.test/a").unwrap());
    let b = Request::get(Url::parse("https://studymate.test/b").unwrap());
    storage.put("x", CachedEntry::new(&a, Response::new(200, "abc"))).unwrap();
    storage.put("y", CachedEntry::new(&b, Response::new(200, "de"))).unwrap();
    assert_eq!(storage.total_size().unwrap(), 5);
  }

  #[test]
  fn test_delete_from_missing_store_does_not_create_it() {
    let storage = MemoryStorage::new();
    let key = RequestKey::for_url(&Url::parse("https://studymate.test/a").unwrap());
    assert!(!storage.delete("ghost", &key).unwrap());
    assert!(storage.store_names().unwrap().is_empty());
  }
}
