//! TTL cache in front of the remote artifact fetches.
//!
//! The storage backend is a collaborator behind [`CacheStore`]; entries carry
//! their own expiry instant so a restarted process honors the TTL of entries
//! written by an earlier run. Store failures never fail the caller: a read
//! error is a miss, a write error is logged and dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logging::{log, obj, v_str, Domain, Level};

/// One stored record: the payload plus an optional expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    /// Epoch milliseconds; `None` never expires.
    pub expire: Option<i64>,
}

/// Persistent key-value collaborator. Values are opaque JSON.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// TTL layer over a [`CacheStore`].
pub struct ExpireCache<S> {
    store: S,
}

impl<S: CacheStore> ExpireCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// A value is absent if never stored or if its expiry has passed; an
    /// expired entry is removed on the way out.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, crate::logging::ts_epoch_ms()).await
    }

    pub async fn set(&self, key: &str, value: Value, ttl_secs: Option<u64>) {
        self.set_at(key, value, ttl_secs, crate::logging::ts_epoch_ms())
            .await;
    }

    // Expiry decisions take `now_ms` explicitly so tests can simulate elapsed
    // time without sleeping.

    pub(crate) async fn get_at(&self, key: &str, now_ms: i64) -> Option<Value> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Cache,
                    "read_failed",
                    obj(&[("key", v_str(key)), ("error", v_str(&format!("{err:#}")))]),
                );
                return None;
            }
        };

        let entry: CacheEntry = match raw {
            Some(raw) => serde_json::from_value(raw).ok()?,
            None => return None,
        };

        if let Some(expire) = entry.expire {
            if expire < now_ms {
                if let Err(err) = self.store.remove(key).await {
                    log(
                        Level::Warn,
                        Domain::Cache,
                        "evict_failed",
                        obj(&[("key", v_str(key)), ("error", v_str(&format!("{err:#}")))]),
                    );
                }
                return None;
            }
        }

        Some(entry.value)
    }

    pub(crate) async fn set_at(&self, key: &str, value: Value, ttl_secs: Option<u64>, now_ms: i64) {
        let expire = match ttl_secs {
            Some(ttl) if ttl > 0 => Some(now_ms + ttl as i64 * 1000),
            _ => None,
        };
        let entry = CacheEntry { value, expire };

        let raw = match serde_json::to_value(&entry) {
            Ok(raw) => raw,
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Cache,
                    "encode_failed",
                    obj(&[("key", v_str(key)), ("error", v_str(&format!("{err:#}")))]),
                );
                return;
            }
        };

        if let Err(err) = self.store.set(key, raw).await {
            log(
                Level::Warn,
                Domain::Cache,
                "write_failed",
                obj(&[("key", v_str(key)), ("error", v_str(&format!("{err:#}")))]),
            );
        }
    }
}

// =============================================================================
// Store implementations
// =============================================================================

/// SQLite-backed store: one table, JSON text per key.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
        })
    }

    pub fn init(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS artifacts (
                key TEXT PRIMARY KEY,
                entry TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        let text: Option<String> = conn
            .query_row(
                "SELECT entry FROM artifacts WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        conn.execute(
            "INSERT OR REPLACE INTO artifacts (key, entry) VALUES (?1, ?2)",
            params![key, value.to_string()],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("cache store lock poisoned"))?;
        conn.execute("DELETE FROM artifacts WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// In-memory store, for tests and offline runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Err(anyhow!("backend unavailable"))
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<()> {
            Err(anyhow!("backend unavailable"))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow!("backend unavailable"))
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_is_returned() {
        let cache = ExpireCache::new(MemoryStore::new());
        cache.set_at("k", json!({"n": 1}), Some(1), 0).await;
        // 0.5 simulated seconds later
        assert_eq!(cache.get_at("k", 500).await, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let cache = ExpireCache::new(MemoryStore::new());
        cache.set_at("k", json!("v"), Some(1), 0).await;
        // 1.1 simulated seconds later
        assert_eq!(cache.get_at("k", 1100).await, None);
        // the entry was removed from the backing store, not just masked
        assert_eq!(cache.store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let cache = ExpireCache::new(MemoryStore::new());
        cache.set_at("k", json!("v"), None, 0).await;
        assert_eq!(cache.get_at("k", i64::MAX - 1).await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_store_read_error_is_a_miss() {
        let cache = ExpireCache::new(FailingStore);
        assert_eq!(cache.get_at("k", 0).await, None);
    }

    #[tokio::test]
    async fn test_store_write_error_is_swallowed() {
        let cache = ExpireCache::new(FailingStore);
        // must not panic or propagate
        cache.set_at("k", json!("v"), Some(60), 0).await;
    }

    #[tokio::test]
    async fn test_never_stored_is_a_miss() {
        let cache = ExpireCache::new(MemoryStore::new());
        assert_eq!(cache.get_at("missing", 0).await, None);
    }
}
