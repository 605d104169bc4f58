//! Test doubles for the network, backend, pages and notifications.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::MemoryStorage;
use crate::config::Config;
use crate::gateway::{Notification, Notifier};
use crate::http::{Request, Response};
use crate::net::{Backend, Network};
use crate::sync::PendingSyncRecord;
use crate::worker::{Clients, ServiceWorker, WindowClient};

fn canonical(url: &str) -> String {
  Url::parse(url).expect("test URL").to_string()
}

/// Scripted network. URLs without a scripted response fail like an
/// unreachable host.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
  calls: AtomicUsize,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self.routes.lock().unwrap().insert(canonical(url), response);
  }

  /// Make `url` fail at the network level.
  pub fn fail(&self, url: &str) {
    self.routes.lock().unwrap().remove(&canonical(url));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Fetches attempted so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network is offline", request.url));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(request.key().url())
      .cloned()
      .ok_or_else(|| eyre!("Failed to fetch {}: connection refused", request.url))
  }
}

/// Backend that records deliveries and can fail on a chosen attempt.
#[derive(Default)]
pub struct MockBackend {
  delivered: Mutex<Vec<(String, PendingSyncRecord)>>,
  attempts: AtomicUsize,
  /// 1-based delivery attempt that fails
  fail_on: Mutex<Option<usize>>,
  offline: AtomicBool,
}

impl MockBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing_on(attempt: usize) -> Self {
    let backend = Self::default();
    *backend.fail_on.lock().unwrap() = Some(attempt);
    backend
  }

  /// Stop failing.
  pub fn recover(&self) {
    *self.fail_on.lock().unwrap() = None;
  }

  pub fn set_online(&self, online: bool) {
    self.offline.store(!online, Ordering::SeqCst);
  }

  /// Successful deliveries, in order.
  pub fn delivered(&self) -> Vec<(String, PendingSyncRecord)> {
    self.delivered.lock().unwrap().clone()
  }
}

#[async_trait]
impl Backend for MockBackend {
  async fn deliver(&self, collection: &str, record: &PendingSyncRecord) -> Result<()> {
    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Backend unreachable"));
    }
    if *self.fail_on.lock().unwrap() == Some(attempt) {
      return Err(eyre!("Backend rejected record {} with status 503", record.id));
    }
    self
      .delivered
      .lock()
      .unwrap()
      .push((collection.to_string(), record.clone()));
    Ok(())
  }

  async fn probe(&self) -> Result<()> {
    if self.offline.load(Ordering::SeqCst) {
      Err(eyre!("Backend unreachable"))
    } else {
      Ok(())
    }
  }
}

#[derive(Default)]
pub struct RecordingClients {
  windows: Mutex<Vec<WindowClient>>,
  claims: AtomicUsize,
  focused: Mutex<Vec<String>>,
  opened: Mutex<Vec<Url>>,
}

impl RecordingClients {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_window(&self, id: &str, url: &str) {
    self.windows.lock().unwrap().push(WindowClient {
      id: id.to_string(),
      url: url.to_string(),
    });
  }

  /// Number of claim calls.
  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }

  pub fn focused(&self) -> Vec<String> {
    self.focused.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<Url> {
    self.opened.lock().unwrap().clone()
  }
}

impl Clients for RecordingClients {
  fn claim(&self) -> Result<usize> {
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(self.windows.lock().unwrap().len())
  }

  fn windows(&self) -> Result<Vec<WindowClient>> {
    Ok(self.windows.lock().unwrap().clone())
  }

  fn focus(&self, id: &str) -> Result<()> {
    self.focused.lock().unwrap().push(id.to_string());
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }
}

/// A worker wired to test doubles, with handles to each of them.
pub struct Harness {
  pub storage: Arc<MemoryStorage>,
  pub network: Arc<MockNetwork>,
  pub backend: Arc<MockBackend>,
  pub clients: Arc<RecordingClients>,
  pub notifier: Arc<RecordingNotifier>,
  pub worker: ServiceWorker<MemoryStorage, MockNetwork, MockBackend>,
}

pub fn test_config() -> Config {
  let yaml = r#"
origin: "https://studymate.test/"
backend_url: "https://api.studymate.test/v1/"
manifest:
  - ./
  - ./index.html
  - ./app.js
  - ./styles.css
"#;
  Config::from_yaml(yaml).unwrap()
}

pub fn harness() -> Harness {
  let storage = Arc::new(MemoryStorage::new());
  let network = Arc::new(MockNetwork::new());
  let backend = Arc::new(MockBackend::new());
  let clients = Arc::new(RecordingClients::new());
  let notifier = Arc::new(RecordingNotifier::new());
  let worker = ServiceWorker::new(
    &test_config(),
    Arc::clone(&storage),
    Arc::clone(&network),
    Arc::clone(&backend),
    Arc::clone(&clients) as Arc<dyn Clients>,
    Arc::clone(&notifier) as Arc<dyn Notifier>,
  )
  .unwrap();

  Harness {
    storage,
    network,
    backend,
    clients,
    notifier,
    worker,
  }
}
