//! Page-facing surface of the worker: messages, push and notification clicks.

mod messages;
mod push;

pub use messages::{parse_message, Message, Reply};
pub use push::{ClickOutcome, ConsoleNotifier, Notification, Notifier};

use color_eyre::Result;
use tracing::{info, warn};

use crate::cache::{CacheStorage, CachedEntry};
use crate::http::Request;
use crate::net::{Backend, Network};
use crate::sync::{QueueName, SyncStore};
use crate::worker::ServiceWorker;

/// Notification action that only closes the notification.
const DISMISS_ACTION: &str = "dismiss";

impl<S, N, B> ServiceWorker<S, N, B>
where
  S: CacheStorage + SyncStore + 'static,
  N: Network + 'static,
  B: Backend + 'static,
{
  /// Handle a message from a page. Returns the reply to post back, if the
  /// message has one.
  pub async fn handle_message(&self, message: Message) -> Result<Option<Reply>> {
    info!(message = ?message, "message received");

    match message {
      Message::SkipWaiting => {
        if !self.lifecycle.skip_waiting().await? {
          info!("no waiting generation to activate");
        }
        Ok(None)
      }
      Message::GetVersion => Ok(Some(Reply::Version {
        version: self.generation.version().to_string(),
      })),
      Message::CacheDocument { url } => {
        self.cache_document(&url).await;
        Ok(None)
      }
      Message::SyncUserData => {
        if let Err(err) = self.fire_trigger(QueueName::UserData.sync_tag()).await {
          warn!(error = %err, "user data sync requested by page did not complete");
        }
        Ok(None)
      }
      Message::ClearCache => {
        self.clear_caches();
        Ok(None)
      }
      Message::GetCacheSize => {
        let size = self.storage.total_size().unwrap_or_else(|err| {
          warn!(error = %err, "failed to compute cache size");
          0
        });
        Ok(Some(Reply::CacheSize { size }))
      }
    }
  }

  /// Fetch a document into the dynamic store. Failures are logged only.
  async fn cache_document(&self, url: &str) {
    let url = match self.start_url.join(url) {
      Ok(url) => url,
      Err(err) => {
        warn!(url, error = %err, "invalid document URL");
        return;
      }
    };

    let request = Request::get(url);
    let store = self.generation.dynamic_store();
    match self.network.fetch(&request).await {
      Ok(response) if response.is_success() => {
        match self.storage.put(&store, CachedEntry::new(&request, response)) {
          Ok(()) => info!(url = %request.url, store, "document cached for offline use"),
          Err(err) => warn!(url = %request.url, store, error = %err, "failed to cache document"),
        }
      }
      Ok(response) => {
        warn!(url = %request.url, status = response.status, "document not cached, bad status")
      }
      Err(err) => warn!(url = %request.url, error = %err, "failed to fetch document"),
    }
  }

  fn clear_caches(&self) {
    let names = match self.storage.store_names() {
      Ok(names) => names,
      Err(err) => {
        warn!(error = %err, "failed to list caches");
        return;
      }
    };

    for name in names {
      if let Err(err) = self.storage.delete_store(&name) {
        warn!(store = %name, error = %err, "failed to delete cache");
      }
    }
    info!("all caches cleared");
  }

  /// Show a notification for a push message.
  pub fn handle_push(&self, data: Option<&[u8]>) -> Result<Notification> {
    let notification = Notification::from_push(&self.app_name, data);
    self.notifier.show(&notification)?;
    Ok(notification)
  }

  /// React to a notification click. `action` is the clicked button, `None`
  /// for the notification body.
  pub fn handle_notification_click(&self, action: Option<&str>) -> Result<ClickOutcome> {
    info!(action = action.unwrap_or("default"), "notification clicked");

    if action == Some(DISMISS_ACTION) {
      return Ok(ClickOutcome::Dismissed);
    }

    if let Some(window) = self
      .clients
      .windows()?
      .into_iter()
      .find(|w| w.url.contains(&self.window_match))
    {
      self.clients.focus(&window.id)?;
      return Ok(ClickOutcome::Focused(window.id));
    }

    self.clients.open_window(&self.start_url)?;
    Ok(ClickOutcome::Opened(self.start_url.clone()))
  }
}
