//! Storage abstraction layer for the local caches.
//!
//! The caches only need an opaque string-keyed blob store. Each cache keeps
//! its whole contents as one JSON list under one key, plus one key holding the
//! RFC 3339 timestamp of its last successful write.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::TrackerError;

/// Formal contract for the local durable key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Lists every stored key in ascending order.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;
}

/// Volatile store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

const DB_FILE: &str = "./price_tracker.db";

#[derive(FromRow)]
struct KvRow {
    value: String,
}

#[derive(FromRow)]
struct KeyRow {
    key: String,
}

/// SQLite implementation of the KeyValueStore trait.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Opens the default database file, creating it when missing.
    pub async fn new(max_connections: u32) -> Result<Arc<Self>> {
        Self::connect(&format!("sqlite:{}?mode=rwc", DB_FILE), max_connections).await
    }

    /// Opens a private in-memory database.
    ///
    /// Every sqlite memory connection is its own database, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;

        Self::with_pool(pool).await
    }

    /// Connects to `url` (e.g. `sqlite:prices.db?mode=rwc`).
    pub async fn connect(url: &str, max_connections: u32) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self::with_pool(pool).await?;
        info!("SqliteStore initialized and connected to {}", url);
        Ok(store)
    }

    async fn with_pool(pool: Pool<Sqlite>) -> Result<Arc<Self>> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create kv_store table")?;

        Ok(Arc::new(Self { pool }))
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<KvRow> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context(format!("Failed to read key {}", key))?;

        Ok(row.map(|r| r.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        debug!("Writing {} bytes under key {}", value.len(), key);

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context(format!("Failed to write key {}", key))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context(format!("Failed to remove key {}", key))?;

        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows: Vec<KeyRow> = sqlx::query_as("SELECT key FROM kv_store ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list keys")?;

        Ok(rows.into_iter().map(|r| r.key).collect())
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

/// Load a JSON list stored under `key`.
///
/// Missing, unreadable or unparseable blobs all yield an empty list.
pub(crate) async fn load_list<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    let blob = match store.get(key).await {
        Ok(Some(blob)) => blob,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("Failed to read cache key {}, starting empty: {:#}", key, e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<T>>(&blob) {
        Ok(items) => items,
        Err(e) => {
            let err = TrackerError::CacheCorrupt {
                key: key.to_string(),
                reason: e.to_string(),
            };
            warn!("{}; starting empty", err);
            Vec::new()
        }
    }
}

/// Load an RFC 3339 timestamp stored under `key`.
pub(crate) async fn load_timestamp(store: &dyn KeyValueStore, key: &str) -> Option<DateTime<Utc>> {
    let raw = match store.get(key).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!("Failed to read sync key {}: {:#}", key, e);
            return None;
        }
    };

    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!("Ignoring malformed sync timestamp under {}: {}", key, e);
            None
        }
    }
}

/// Persist `items` as a JSON list and stamp the sync key.
pub(crate) async fn save_list<T: Serialize>(
    store: &dyn KeyValueStore,
    list_key: &str,
    sync_key: &str,
    items: &[T],
    at: DateTime<Utc>,
) -> Result<()> {
    let blob = serde_json::to_string(items).context(format!("Failed to serialize {}", list_key))?;
    store.set(list_key, &blob).await?;
    store.set(sync_key, &at.to_rfc3339()).await?;
    Ok(())
}

/// Remove a cache's list and sync keys.
pub(crate) async fn remove_list(store: &dyn KeyValueStore, list_key: &str, sync_key: &str) -> Result<()> {
    store.remove(list_key).await?;
    store.remove(sync_key).await?;
    Ok(())
}
