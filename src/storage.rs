//! State store bridge
//!
//! The engine persists named values scoped to (conversation, scope, name)
//! through the [`KeyValueStore`] seam. [`StateBridge`] owns the scoping
//! discipline: canonical key construction, lazy default materialization,
//! per-cycle read caching, and version tracking. Writes go through to the
//! backing store before returning, so everything written during a render
//! cycle is durable before that cycle's operations are dispatched.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Scope reserved for engine bookkeeping (the conversation context
/// document). Author components never see it.
pub const ENGINE_SCOPE: &str = "__engine";

/// Persistent key-value backend.
///
/// Keys are canonical strings built by the bridge; values are opaque JSON.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        (**self).set(key, value).await
    }
}

/// A stored entry: the value plus a version that increments on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: Value,
    pub version: u64,
}

fn storage_key(conversation: &str, scope: &str, name: &str) -> String {
    format!("{conversation}:{scope}:{name}")
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory backend for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys; test convenience.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// SQL schema for initialization
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// SQLite-backed key-value store.
///
/// The connection sits behind a mutex; calls are short single-row
/// statements, so holding it across an async boundary is never necessary.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|e| StorageError::backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StorageError::backend(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT value FROM kv WHERE key = ?1")
            .map_err(|e| StorageError::backend(e.to_string()))?;
        let raw: Option<String> = stmt
            .query_row(params![key], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StorageError::backend(other.to_string())),
            })?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let text = serde_json::to_string(&value)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, text, now],
        )
        .map_err(|e| StorageError::backend(e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// State bridge
// ============================================================================

/// Scoped view over a [`KeyValueStore`] for one conversation.
///
/// A fresh bridge is created per render cycle; its cache is therefore
/// cycle-scoped, which keeps reads coherent within a cycle while the
/// backing store remains the source of truth between cycles.
#[derive(Clone)]
pub struct StateBridge {
    store: Arc<dyn KeyValueStore>,
    conversation: String,
    cache: Arc<Mutex<HashMap<String, StateEntry>>>,
}

impl StateBridge {
    pub fn new(store: Arc<dyn KeyValueStore>, conversation: impl Into<String>) -> Self {
        Self {
            store,
            conversation: conversation.into(),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn conversation(&self) -> &str {
        &self.conversation
    }

    /// Read a named value, materializing it with the default on first read.
    ///
    /// The materialized default is written through to the store, so the
    /// entry exists (at version 1) from the moment it is first observed.
    pub async fn read(
        &self,
        scope: &str,
        name: &str,
        default: Value,
    ) -> Result<Value, StorageError> {
        let key = storage_key(&self.conversation, scope, name);
        if let Some(entry) = self.cache.lock().unwrap().get(&key) {
            return Ok(entry.value.clone());
        }

        let entry = match self.store.get(&key).await? {
            Some(raw) => decode_entry(raw),
            None => {
                let entry = StateEntry {
                    value: default,
                    version: 1,
                };
                self.store
                    .set(&key, serde_json::to_value(&entry)?)
                    .await?;
                entry
            }
        };

        let value = entry.value.clone();
        self.cache.lock().unwrap().insert(key, entry);
        Ok(value)
    }

    /// Write a named value, bumping its version. Durable on return.
    pub async fn write(
        &self,
        scope: &str,
        name: &str,
        value: Value,
    ) -> Result<u64, StorageError> {
        let key = storage_key(&self.conversation, scope, name);
        let current = self.cache.lock().unwrap().get(&key).map(|e| e.version);
        let version = match current {
            Some(v) => v + 1,
            None => match self.store.get(&key).await? {
                Some(raw) => decode_entry(raw).version + 1,
                None => 1,
            },
        };

        let entry = StateEntry {
            value: value.clone(),
            version,
        };
        self.store.set(&key, serde_json::to_value(&entry)?).await?;
        self.cache.lock().unwrap().insert(key, entry);
        Ok(version)
    }

    /// Value from the cycle cache, if this cycle has touched it.
    pub fn cached(&self, scope: &str, name: &str) -> Option<Value> {
        let key = storage_key(&self.conversation, scope, name);
        self.cache
            .lock()
            .unwrap()
            .get(&key)
            .map(|entry| entry.value.clone())
    }

    /// Version from the cycle cache, if this cycle has touched the entry.
    pub fn cached_version(&self, scope: &str, name: &str) -> Option<u64> {
        let key = storage_key(&self.conversation, scope, name);
        self.cache.lock().unwrap().get(&key).map(|e| e.version)
    }

    /// Every cached entry under one scope, keyed by name. Event handlers
    /// get their read snapshot from here.
    pub fn cached_scope(&self, scope: &str) -> HashMap<String, Value> {
        let prefix = storage_key(&self.conversation, scope, "");
        self.cache
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(key, entry)| {
                key.strip_prefix(&prefix)
                    .map(|name| (name.to_string(), entry.value.clone()))
            })
            .collect()
    }

    /// Load a raw engine document (no envelope, no default materialization).
    pub async fn load_raw(&self, scope: &str, name: &str) -> Result<Option<Value>, StorageError> {
        let key = storage_key(&self.conversation, scope, name);
        self.store.get(&key).await
    }

    /// Store a raw engine document.
    pub async fn save_raw(&self, scope: &str, name: &str, value: Value) -> Result<(), StorageError> {
        let key = storage_key(&self.conversation, scope, name);
        self.store.set(&key, value).await
    }
}

/// Entries written by older deployments may predate the envelope; treat
/// anything that does not decode as a bare value at version 1.
fn decode_entry(raw: Value) -> StateEntry {
    match serde_json::from_value::<StateEntry>(raw.clone()) {
        Ok(entry) => entry,
        Err(_) => {
            tracing::debug!("state entry without envelope, adopting as version 1");
            StateEntry {
                value: raw,
                version: 1,
            }
        }
    }
}
