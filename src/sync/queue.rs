//! Pending-mutation queues and their drain loop.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::net::Backend;

/// The user-data queues the app can defer mutations into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
  UserData,
  StudyProgress,
  Notes,
}

impl QueueName {
  pub const ALL: [QueueName; 3] = [QueueName::UserData, QueueName::StudyProgress, QueueName::Notes];

  pub fn as_str(&self) -> &'static str {
    match self {
      QueueName::UserData => "user-data",
      QueueName::StudyProgress => "study-progress",
      QueueName::Notes => "notes",
    }
  }

  /// Backend collection that receives this queue's records.
  pub fn collection(&self) -> &'static str {
    match self {
      QueueName::UserData => "users",
      QueueName::StudyProgress => "progress",
      QueueName::Notes => "notes",
    }
  }

  /// Background-sync tag that drains this queue.
  pub fn sync_tag(&self) -> &'static str {
    match self {
      QueueName::UserData => "sync-user-data",
      QueueName::StudyProgress => "sync-study-progress",
      QueueName::Notes => "sync-notes",
    }
  }

  fn index(&self) -> usize {
    match self {
      QueueName::UserData => 0,
      QueueName::StudyProgress => 1,
      QueueName::Notes => 2,
    }
  }
}

impl FromStr for QueueName {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    QueueName::ALL
      .into_iter()
      .find(|q| q.as_str() == s)
      .ok_or_else(|| eyre!("Unknown sync queue '{}' (expected user-data, study-progress or notes)", s))
  }
}

impl fmt::Display for QueueName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A mutation that could not reach the backend when it was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncRecord {
  /// Monotonic id; defines enqueue order
  pub id: i64,
  pub queue: QueueName,
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
}

/// Storage for pending sync records.
pub trait SyncStore: Send + Sync {
  /// Append a record to a queue.
  fn push_record(
    &self,
    queue: QueueName,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<PendingSyncRecord>;

  /// Pending records of one queue, in enqueue order.
  fn pending(&self, queue: QueueName) -> Result<Vec<PendingSyncRecord>>;

  /// Remove a delivered record. Returns whether it existed.
  fn remove_record(&self, id: i64) -> Result<bool>;

  /// Remember that the user studied at `at`.
  fn record_activity(&self, at: DateTime<Utc>) -> Result<()>;

  /// Last recorded study activity.
  fn last_activity(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Outcome of draining one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
  pub queue: QueueName,
  pub delivered: usize,
  pub remaining: usize,
  /// Delivery error that stopped the drain, if any
  pub failure: Option<String>,
}

impl DrainReport {
  fn empty(queue: QueueName) -> Self {
    Self {
      queue,
      delivered: 0,
      remaining: 0,
      failure: None,
    }
  }

  pub fn is_complete(&self) -> bool {
    self.failure.is_none()
  }
}

/// Sync queue that owns pending records and delivers them to the backend.
///
/// Delivery is at-least-once: a record is removed only after the backend
/// confirms it, so a crash between delivery and removal re-sends it.
pub struct SyncQueue<Q, B> {
  store: Arc<Q>,
  backend: Arc<B>,
  /// One drain at a time per queue
  drain_locks: [Mutex<()>; 3],
}

impl<Q: SyncStore, B: Backend> SyncQueue<Q, B> {
  pub fn new(store: Arc<Q>, backend: Arc<B>) -> Self {
    Self {
      store,
      backend,
      drain_locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
    }
  }

  /// Queue a mutation for later delivery.
  pub fn enqueue(&self, queue: QueueName, payload: Value) -> Result<PendingSyncRecord> {
    let now = Utc::now();
    let record = self.store.push_record(queue, &payload, now)?;
    if queue == QueueName::StudyProgress {
      self.store.record_activity(now)?;
    }
    debug!(queue = %queue, id = record.id, "enqueued pending sync record");
    Ok(record)
  }

  #[allow(dead_code)]
  pub fn pending(&self, queue: QueueName) -> Result<Vec<PendingSyncRecord>> {
    self.store.pending(queue)
  }

  pub fn depth(&self, queue: QueueName) -> Result<usize> {
    Ok(self.store.pending(queue)?.len())
  }

  /// When study progress was last recorded.
  pub fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
    self.store.last_activity()
  }

  /// Deliver every pending record of `queue` in enqueue order.
  ///
  /// Stops at the first delivery failure. Records delivered before it are
  /// removed; the failed one and everything after it stay queued. A delivery
  /// failure is reported in the returned [`DrainReport`]; only storage errors
  /// surface as `Err`.
  pub async fn drain(&self, queue: QueueName) -> Result<DrainReport> {
    let _guard = self.drain_locks[queue.index()].lock().await;

    let pending = self.store.pending(queue)?;
    let mut report = DrainReport::empty(queue);
    if pending.is_empty() {
      debug!(queue = %queue, "nothing to sync");
      return Ok(report);
    }

    info!(queue = %queue, count = pending.len(), "syncing pending records");

    for record in &pending {
      match self.backend.deliver(queue.collection(), record).await {
        Ok(()) => {
          self.store.remove_record(record.id)?;
          report.delivered += 1;
        }
        Err(err) => {
          error!(
            queue = %queue,
            record = record.id,
            error = %err,
            "sync delivery failed, keeping remaining records queued"
          );
          report.failure = Some(err.to_string());
          break;
        }
      }
    }

    report.remaining = pending.len() - report.delivered;
    if report.is_complete() {
      info!(queue = %queue, delivered = report.delivered, "queue synced");
    }
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::testing::MockBackend;
  use serde_json::json;

  fn queue(backend: MockBackend) -> (Arc<MemoryStorage>, Arc<MockBackend>, SyncQueue<MemoryStorage, MockBackend>) {
    let store = Arc::new(MemoryStorage::new());
    let backend = Arc::new(backend);
    let queue = SyncQueue::new(Arc::clone(&store), Arc::clone(&backend));
    (store, backend, queue)
  }

  #[test]
  fn test_queue_name_round_trip() {
    for q in QueueName::ALL {
      assert_eq!(q.as_str().parse::<QueueName>().unwrap(), q);
    }
    assert!("todos".parse::<QueueName>().is_err());
    assert_eq!(QueueName::StudyProgress.collection(), "progress");
    assert_eq!(QueueName::Notes.sync_tag(), "sync-notes");
  }

  #[tokio::test]
  async fn test_drain_delivers_in_order_and_empties_queue() {
    let (_, backend, queue) = queue(MockBackend::new());
    for i in 0..3 {
      queue.enqueue(QueueName::Notes, json!({ "note": i })).unwrap();
    }

    let report = queue.drain(QueueName::Notes).await.unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.remaining, 0);
    assert!(report.is_complete());
    assert_eq!(queue.depth(QueueName::Notes).unwrap(), 0);

    let delivered = backend.delivered();
    let notes: Vec<_> = delivered.iter().map(|(_, r)| r.payload["note"].clone()).collect();
    assert_eq!(notes, vec![json!(0), json!(1), json!(2)]);
    assert!(delivered.iter().all(|(collection, _)| collection == "notes"));
  }

  #[tokio::test]
  async fn test_partial_failure_keeps_remainder() {
    // Fails on the 3rd delivery of 5
    let (_, backend, queue) = queue(MockBackend::failing_on(3));
    for i in 1..=5 {
      queue.enqueue(QueueName::Notes, json!({ "n": i })).unwrap();
    }

    let report = queue.drain(QueueName::Notes).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 3);
    assert!(report.failure.is_some());

    let left: Vec<_> = queue
      .pending(QueueName::Notes)
      .unwrap()
      .into_iter()
      .map(|r| r.payload["n"].clone())
      .collect();
    assert_eq!(left, vec![json!(3), json!(4), json!(5)]);
    assert_eq!(backend.delivered().len(), 2);
  }

  #[tokio::test]
  async fn test_retry_after_failure_resumes_from_failed_record() {
    let (_, backend, queue) = queue(MockBackend::failing_on(2));
    for i in 1..=3 {
      queue.enqueue(QueueName::UserData, json!({ "n": i })).unwrap();
    }

    queue.drain(QueueName::UserData).await.unwrap();
    backend.recover();
    let report = queue.drain(QueueName::UserData).await.unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(queue.depth(QueueName::UserData).unwrap(), 0);
    let order: Vec<_> = backend
      .delivered()
      .iter()
      .map(|(_, r)| r.payload["n"].clone())
      .collect();
    assert_eq!(order, vec![json!(1), json!(2), json!(3)]);
  }

  #[tokio::test]
  async fn test_drain_only_touches_its_queue() {
    let (_, _, queue) = queue(MockBackend::new());
    queue.enqueue(QueueName::Notes, json!("n")).unwrap();
    queue.enqueue(QueueName::UserData, json!("u")).unwrap();

    queue.drain(QueueName::Notes).await.unwrap();
    assert_eq!(queue.depth(QueueName::Notes).unwrap(), 0);
    assert_eq!(queue.depth(QueueName::UserData).unwrap(), 1);
  }

  #[test]
  fn test_study_progress_records_activity() {
    let (store, _, queue) = queue(MockBackend::new());
    assert!(store.last_activity().unwrap().is_none());
    queue.enqueue(QueueName::Notes, json!({})).unwrap();
    assert!(store.last_activity().unwrap().is_none());
    queue.enqueue(QueueName::StudyProgress, json!({ "minutes": 25 })).unwrap();
    assert!(store.last_activity().unwrap().is_some());
  }
}
