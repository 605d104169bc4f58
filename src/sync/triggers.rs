//! Background-sync and periodic-sync dispatch by tag name.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::queue::{QueueName, SyncQueue, SyncStore};
use super::schedule::StudyReminder;
use crate::net::Backend;

/// Periodic tag: remind the user to study.
pub const PERIODIC_STUDY_REMINDER: &str = "study-reminder";
/// Periodic tag: drain every queue.
pub const PERIODIC_DATA_BACKUP: &str = "data-backup";

/// A boxed future for one handler run
type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A factory that starts a handler run each time its tag fires
type HandlerFn = Box<dyn Fn() -> BoxFuture + Send + Sync>;

/// Maps trigger tags to async handlers.
#[derive(Default)]
pub struct TriggerRegistry {
  handlers: HashMap<String, HandlerFn>,
}

impl TriggerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F, Fut>(&mut self, tag: &str, handler: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    self
      .handlers
      .insert(tag.to_string(), Box::new(move || Box::pin(handler())));
  }

  pub fn tags(&self) -> Vec<&str> {
    let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
    tags.sort_unstable();
    tags
  }

  /// Run the handler for `tag`.
  ///
  /// Unknown tags are logged and ignored (`Ok(false)`). A handler error is
  /// logged and returned so the host can retry at the next trigger.
  pub async fn fire(&self, tag: &str) -> Result<bool> {
    let Some(handler) = self.handlers.get(tag) else {
      info!(tag, "unknown sync tag, ignoring");
      return Ok(false);
    };

    info!(tag, "sync triggered");
    if let Err(err) = handler().await {
      error!(tag, error = %err, "sync handler failed, will retry on next trigger");
      return Err(err);
    }
    Ok(true)
  }
}

/// Registry with the worker's standard tags: one connectivity tag per queue,
/// plus the `study-reminder` and `data-backup` periodic tags.
pub fn standard_triggers<Q, B>(sync: Arc<SyncQueue<Q, B>>, reminder: Arc<StudyReminder>) -> TriggerRegistry
where
  Q: SyncStore + 'static,
  B: Backend + 'static,
{
  let mut registry = TriggerRegistry::new();

  for queue in QueueName::ALL {
    let sync = Arc::clone(&sync);
    registry.register(queue.sync_tag(), move || {
      let sync = Arc::clone(&sync);
      async move {
        let report = sync.drain(queue).await?;
        match report.failure {
          None => Ok(()),
          Some(failure) => Err(eyre!(
            "{} sync incomplete ({} left): {}",
            queue,
            report.remaining,
            failure
          )),
        }
      }
    });
  }

  {
    let sync = Arc::clone(&sync);
    registry.register(PERIODIC_DATA_BACKUP, move || {
      let sync = Arc::clone(&sync);
      async move {
        info!("performing data backup");
        let results = join_all(QueueName::ALL.map(|queue| sync.drain(queue))).await;
        for result in results {
          match result {
            Ok(report) if report.is_complete() => {}
            Ok(report) => warn!(queue = %report.queue, remaining = report.remaining, "backup left records queued"),
            Err(err) => warn!(error = %err, "backup of a queue failed"),
          }
        }
        Ok(())
      }
    });
  }

  registry.register(PERIODIC_STUDY_REMINDER, move || {
    let sync = Arc::clone(&sync);
    let reminder = Arc::clone(&reminder);
    async move {
      let last = sync.last_activity()?;
      reminder.run(last)?;
      Ok(())
    }
  });

  registry
}
