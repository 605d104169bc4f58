//! SQLite implementation of the cache and sync stores.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, CachedEntry};
use crate::http::{RequestKey, Response};
use crate::sync::{PendingSyncRecord, QueueName, SyncStore};

const META_ACTIVE_GENERATION: &str = "active_generation";
const META_LAST_ACTIVITY: &str = "last_study_activity";

/// SQLite-based storage for cache stores, the sync queue and worker metadata.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open offline database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run offline database migrations: {}", e))?;
    Ok(())
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>> {
    self
      .conn()?
      .query_row(
        "SELECT value FROM worker_meta WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read worker metadata '{}': {}", key, e))
  }

  fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO worker_meta (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write worker metadata '{}': {}", key, e))?;
    Ok(())
  }
}

/// Schema for the offline database.
const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache stores, one per generation role
CREATE TABLE IF NOT EXISTS cache_store (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Cached responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entry (
    store TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    vary TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (store, request_hash),
    FOREIGN KEY (store) REFERENCES cache_store(name) ON DELETE CASCADE
);

-- Mutations waiting for delivery (id preserves enqueue order)
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_queue ON sync_queue(queue, id);

CREATE TABLE IF NOT EXISTS worker_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn open_store(&self, store: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_store (name, created_at) VALUES (?, ?)",
        params![store, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_store ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entry WHERE store = ?", params![store])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;
    let deleted = tx
      .execute("DELETE FROM cache_store WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;

    let row: Option<(String, u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, vary, body, cached_at FROM cache_entry
         WHERE store = ? AND request_hash = ?",
        params![store, key.hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {} from {}: {}", key, store, e))?;

    let Some((url, status, headers, vary, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers for {}: {}", url, e))?;
    let vary = serde_json::from_str(&vary)
      .map_err(|e| eyre!("Failed to deserialize vary data for {}: {}", url, e))?;

    Ok(Some(CachedEntry {
      key: RequestKey::from_parts(url, key.hash().to_string()),
      response: Response {
        status,
        headers,
        body,
      },
      vary,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, store: &str, entry: CachedEntry) -> Result<()> {
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let vary =
      serde_json::to_string(&entry.vary).map_err(|e| eyre!("Failed to serialize vary: {}", e))?;

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_store (name, created_at) VALUES (?, ?)",
      params![store, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to open cache store {}: {}", store, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entry
         (store, request_hash, url, status, headers, vary, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        store,
        entry.key.hash(),
        entry.key.url(),
        entry.response.status,
        headers,
        vary,
        entry.response.body,
        entry.cached_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", entry.key, store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, store: &str, key: &RequestKey) -> Result<bool> {
    let deleted = self
      .conn()?
      .execute(
        "DELETE FROM cache_entry WHERE store = ? AND request_hash = ?",
        params![store, key.hash()],
      )
      .map_err(|e| eyre!("Failed to delete {} from {}: {}", key, store, e))?;
    Ok(deleted > 0)
  }

  fn keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT url, request_hash FROM cache_entry WHERE store = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| {
        Ok(RequestKey::from_parts(row.get(0)?, row.get(1)?))
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key of {}: {}", store, e))?;

    Ok(keys)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    self.get_meta(META_ACTIVE_GENERATION)
  }

  fn set_active_generation(&self, version: &str) -> Result<()> {
    self.set_meta(META_ACTIVE_GENERATION, version)
  }

  fn total_size(&self) -> Result<u64> {
    let total: i64 = self
      .conn()?
      .query_row(
        "SELECT COALESCE(SUM(length(body)), 0) FROM cache_entry",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to compute cache size: {}", e))?;
    Ok(total.max(0) as u64)
  }
}

impl SyncStore for SqliteStorage {
  fn push_record(
    &self,
    queue: QueueName,
    payload: &Value,
    enqueued_at: DateTime<Utc>,
  ) -> Result<PendingSyncRecord> {
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO sync_queue (queue, payload, enqueued_at) VALUES (?, ?, ?)",
        params![queue.as_str(), data, enqueued_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to enqueue {} record: {}", queue, e))?;

    Ok(PendingSyncRecord {
      id: conn.last_insert_rowid(),
      queue,
      payload: payload.clone(),
      enqueued_at,
    })
  }

  fn pending(&self, queue: QueueName) -> Result<Vec<PendingSyncRecord>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, payload, enqueued_at FROM sync_queue WHERE queue = ? ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![queue.as_str()], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query {} queue: {}", queue, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read {} queue: {}", queue, e))?;

    rows
      .into_iter()
      .map(|(id, payload, enqueued_at)| {
        Ok(PendingSyncRecord {
          id,
          queue,
          payload: serde_json::from_str(&payload)
            .map_err(|e| eyre!("Failed to deserialize {} record {}: {}", queue, id, e))?,
          enqueued_at: parse_datetime(&enqueued_at)?,
        })
      })
      .collect()
  }

  fn remove_record(&self, id: i64) -> Result<bool> {
    let deleted = self
      .conn()?
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove sync record {}: {}", id, e))?;
    Ok(deleted > 0)
  }

  fn record_activity(&self, at: DateTime<Utc>) -> Result<()> {
    self.set_meta(META_LAST_ACTIVITY, &at.to_rfc3339())
  }

  fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
    self
      .get_meta(META_LAST_ACTIVITY)?
      .map(|s| parse_datetime(&s))
      .transpose()
  }
}

/// Parse an RFC 3339 timestamp as written by this storage.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
