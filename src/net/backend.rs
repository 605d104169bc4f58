use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use crate::sync::PendingSyncRecord;

/// The remote database that receives queued mutations.
#[async_trait]
pub trait Backend: Send + Sync {
  /// Deliver one record to `collection`. Must tolerate duplicate delivery.
  async fn deliver(&self, collection: &str, record: &PendingSyncRecord) -> Result<()>;

  /// Cheap reachability check used by the connectivity monitor.
  async fn probe(&self) -> Result<()>;
}

/// Backend reached over a JSON REST API.
///
/// Records are POSTed to `{base}/{collection}` with an `Idempotency-Key`
/// derived from the record content, so the server can drop re-deliveries.
#[derive(Clone)]
pub struct RestBackend {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl RestBackend {
  pub fn new(base: Url, token: Option<String>, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create backend client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  fn collection_url(&self, collection: &str) -> Result<Url> {
    self
      .base
      .join(collection)
      .map_err(|e| eyre!("Invalid collection URL for {}: {}", collection, e))
  }
}

/// Content hash of a record, stable across re-deliveries.
pub fn idempotency_key(collection: &str, record: &PendingSyncRecord) -> String {
  let mut hasher = Sha256::new();
  hasher.update(collection.as_bytes());
  hasher.update(b":");
  hasher.update(record.payload.to_string().as_bytes());
  hasher.update(b":");
  hasher.update(record.enqueued_at.to_rfc3339().as_bytes());
  hex::encode(hasher.finalize())
}

#[async_trait]
impl Backend for RestBackend {
  async fn deliver(&self, collection: &str, record: &PendingSyncRecord) -> Result<()> {
    let url = self.collection_url(collection)?;
    let body = json!({
      "queue": record.queue,
      "data": record.payload,
      "enqueuedAt": record.enqueued_at,
    });

    let mut request = self
      .client
      .post(url.clone())
      .header("Idempotency-Key", idempotency_key(collection, record))
      .json(&body);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to deliver to {}: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Backend rejected {} record {}: {}", collection, record.id, status));
    }

    Ok(())
  }

  async fn probe(&self) -> Result<()> {
    self
      .client
      .head(self.base.clone())
      .send()
      .await
      .map_err(|e| eyre!("Backend {} unreachable: {}", self.base, e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::QueueName;
  use chrono::Utc;

  fn record(id: i64, payload: serde_json::Value) -> PendingSyncRecord {
    PendingSyncRecord {
      id,
      queue: QueueName::Notes,
      payload,
      enqueued_at: Utc::now(),
    }
  }

  #[test]
  fn test_idempotency_key_depends_on_content_not_id() {
    let a = record(1, json!({"title": "Cells"}));
    let mut b = a.clone();
    b.id = 7;
    assert_eq!(idempotency_key("notes", &a), idempotency_key("notes", &b));

    let c = PendingSyncRecord {
      payload: json!({"title": "Mitosis"}),
      ..a.clone()
    };
    assert_ne!(idempotency_key("notes", &a), idempotency_key("notes", &c));
    assert_ne!(idempotency_key("notes", &a), idempotency_key("users", &a));
  }

  #[test]
  fn test_collection_url() {
    let backend = RestBackend::new(
      Url::parse("https://api.studymate.test/v1/").unwrap(),
      None,
      Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(
      backend.collection_url("progress").unwrap().as_str(),
      "https://api.studymate.test/v1/progress"
    );
  }
}
