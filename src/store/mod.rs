//! Local persistent key-value store.
//!
//! Small durable facts live here, namespaced by peer identity and app so
//! several identities can share one database file. The main customer is
//! the wallet link flow, which records which address an identity paired
//! with so a returning session can skip re-linking.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{SyncError, SyncResult};

/// Namespace prefix for store slots: one peer identity plus one app.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreScope {
  identity: String,
  app: String,
}

impl StoreScope {
  pub fn new(identity: impl Into<String>, app: impl Into<String>) -> Self {
    Self {
      identity: identity.into(),
      app: app.into(),
    }
  }

  fn namespace(&self) -> String {
    format!("{}/{}", self.identity, self.app)
  }
}

pub trait KvStore: Send + Sync {
  fn get(&self, scope: &StoreScope, key: &str) -> SyncResult<Option<Value>>;

  fn set(&self, scope: &StoreScope, key: &str, value: &Value) -> SyncResult<()>;
}

/// SQLite-backed store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Slots are keyed by a fixed-length digest of namespace and key, with
/// the raw columns kept alongside for inspection.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    slot_hash TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_kv_store_namespace ON kv_store(namespace);
"#;

impl SqliteStore {
  /// Open (or create) the store at `path`, creating parent directories
  /// and running migrations as needed.
  pub fn open(path: &Path) -> SyncResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| SyncError::Store(format!("failed to create store directory: {e}")))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| SyncError::Store(format!("failed to open store at {}: {e}", path.display())))?;
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| SyncError::Store(format!("failed to run store migrations: {e}")))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock_conn(&self) -> SyncResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| SyncError::Store("connection lock poisoned".to_string()))
  }

  fn slot_hash(scope: &StoreScope, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.namespace().as_bytes());
    hasher.update([0x1f]);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl KvStore for SqliteStore {
  fn get(&self, scope: &StoreScope, key: &str) -> SyncResult<Option<Value>> {
    let conn = self.lock_conn()?;
    let slot = Self::slot_hash(scope, key);

    let raw: Option<Vec<u8>> = conn
      .query_row("SELECT value FROM kv_store WHERE slot_hash = ?", params![slot], |row| {
        row.get(0)
      })
      .optional()?;

    match raw {
      Some(bytes) => {
        let value = serde_json::from_slice(&bytes)
          .map_err(|e| SyncError::Store(format!("corrupt value for {key}: {e}")))?;
        Ok(Some(value))
      }
      None => Ok(None),
    }
  }

  fn set(&self, scope: &StoreScope, key: &str, value: &Value) -> SyncResult<()> {
    let conn = self.lock_conn()?;
    let slot = Self::slot_hash(scope, key);
    let bytes =
      serde_json::to_vec(value).map_err(|e| SyncError::Store(format!("serialize {key}: {e}")))?;

    conn.execute(
      "INSERT OR REPLACE INTO kv_store (slot_hash, namespace, key, value, updated_at)
       VALUES (?, ?, ?, ?, datetime('now'))",
      params![slot, scope.namespace(), key, bytes],
    )?;

    Ok(())
  }
}

/// In-memory store for tests and sessions that should not persist.
#[derive(Default)]
pub struct MemoryStore {
  slots: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  fn get(&self, scope: &StoreScope, key: &str) -> SyncResult<Option<Value>> {
    let slots = self
      .slots
      .lock()
      .map_err(|_| SyncError::Store("store lock poisoned".to_string()))?;
    Ok(slots.get(&(scope.namespace(), key.to_string())).cloned())
  }

  fn set(&self, scope: &StoreScope, key: &str, value: &Value) -> SyncResult<()> {
    let mut slots = self
      .slots
      .lock()
      .map_err(|_| SyncError::Store("store lock poisoned".to_string()))?;
    slots.insert((scope.namespace(), key.to_string()), value.clone());
    Ok(())
  }
}
