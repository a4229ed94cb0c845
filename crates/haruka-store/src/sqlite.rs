//! SQLite implementation of [`KvStore`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use haruka_core::{KvStore, SharedClock, StoreError, StoreResult, SystemClock, validate_key};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Settings for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    /// Database file, or `:memory:`.
    pub path: String,
    /// Largest serialized value accepted by `set`.
    pub max_value_bytes: usize,
    /// Bound on waiting for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            path: "haruka_data.db".to_string(),
            max_value_bytes: 1024 * 1024,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteStoreOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Key-value store over a single SQLite table.
///
/// Schema: `kv(key TEXT PRIMARY KEY, value TEXT NOT NULL, expires_at INTEGER)`,
/// where `expires_at` is Unix milliseconds or `NULL` for "never". Databases
/// created before expiry support lack the column; it is added on open and
/// existing rows keep `NULL`.
///
/// Writes are serialized in-process. A connection-level failure drops the
/// pool so the next call reconnects.
pub struct SqliteStore {
    options: SqliteStoreOptions,
    /// Resolved connection target (a shared-cache URI for `:memory:`).
    target: String,
    in_memory: bool,
    pool: Mutex<Option<SqlitePool>>,
    connect_lock: tokio::sync::Mutex<()>,
    write_lock: tokio::sync::Mutex<()>,
    clock: SharedClock,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and prepares the schema.
    pub async fn open(options: SqliteStoreOptions) -> StoreResult<Self> {
        Self::open_with_clock(options, Arc::new(SystemClock)).await
    }

    /// Like [`open`](Self::open) with an injected clock.
    pub async fn open_with_clock(options: SqliteStoreOptions, clock: SharedClock) -> StoreResult<Self> {
        let in_memory = options.path == ":memory:";
        let target = if in_memory {
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            format!(
                "file:haruka-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            )
        } else {
            if let Some(parent) = Path::new(&options.path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                warn!(path = %parent.display(), error = %e, "Failed to create store directory");
            }
            options.path.clone()
        };

        let store = Self {
            options,
            target,
            in_memory,
            pool: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            write_lock: tokio::sync::Mutex::new(()),
            clock,
        };
        store.pool().await?;
        info!(path = %store.options.path, "Store opened");
        Ok(store)
    }

    pub fn options(&self) -> &SqliteStoreOptions {
        &self.options
    }

    /// Returns the live pool, connecting first if there is none.
    async fn pool(&self) -> StoreResult<SqlitePool> {
        if let Some(pool) = self.pool.lock().clone() {
            return Ok(pool);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(pool) = self.pool.lock().clone() {
            return Ok(pool);
        }

        let pool = self.connect().await?;
        *self.pool.lock() = Some(pool.clone());
        Ok(pool)
    }

    async fn connect(&self) -> StoreResult<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(&self.target)
            .shared_cache(self.in_memory)
            .create_if_missing(true);

        let pool_options = if self.in_memory {
            // A shared-cache memory database is freed with its last
            // connection, so that connection is never reaped.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options
            .acquire_timeout(self.options.acquire_timeout)
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if !self.in_memory {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&pool)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
        }
        Self::prepare_schema(&pool).await?;
        debug!(target = %self.target, "Store connected");
        Ok(pool)
    }

    /// Creates the table and adds `expires_at` to legacy tables.
    async fn prepare_schema(pool: &SqlitePool) -> StoreResult<()> {
        let backend = |e: sqlx::Error| StoreError::Backend(e.to_string());

        sqlx::query("CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(pool)
            .await
            .map_err(backend)?;

        let columns = sqlx::query("PRAGMA table_info(kv)")
            .fetch_all(pool)
            .await
            .map_err(backend)?;
        let has_expiry = columns
            .iter()
            .any(|row| row.try_get::<String, _>("name").is_ok_and(|n| n == "expires_at"));

        if !has_expiry {
            sqlx::query("ALTER TABLE kv ADD COLUMN expires_at INTEGER")
                .execute(pool)
                .await
                .map_err(backend)?;
            info!("Added expires_at column to kv table");
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv (expires_at)")
            .execute(pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    /// Maps a query error, dropping the pool when the connection itself is
    /// gone.
    fn query_error(&self, err: sqlx::Error) -> StoreError {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                warn!(error = %err, "Store connection lost, will reconnect");
                self.pool.lock().take();
                StoreError::Connection(err.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }

    fn expiry_for(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| {
            let ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            self.clock.now_millis().saturating_add(ms)
        })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn set_raw(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        validate_key(key)?;
        let encoded = serde_json::to_string(&value)?;
        if encoded.len() > self.options.max_value_bytes {
            return Err(StoreError::ValueTooLarge {
                key: key.to_string(),
                size: encoded.len(),
                limit: self.options.max_value_bytes,
            });
        }
        let expires_at = self.expiry_for(ttl);

        let pool = self.pool().await?;
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(&encoded)
        .bind(expires_at)
        .execute(&pool)
        .await
        .map_err(|e| self.query_error(e))?;
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> StoreResult<Option<Value>> {
        validate_key(key)?;
        let pool = self.pool().await?;
        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT value, expires_at FROM kv WHERE key = ?1")
                .bind(key)
                .fetch_optional(&pool)
                .await
                .map_err(|e| self.query_error(e))?;

        let Some((encoded, expires_at)) = row else {
            return Ok(None);
        };
        if expires_at.is_some_and(|at| at <= self.clock.now_millis()) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&encoded)?))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let pool = self.pool().await?;
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        let now = self.clock.now_millis();
        let pool = self.pool().await?;
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(now)
            .execute(&pool)
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.close().await;
            info!(path = %self.options.path, "Store closed");
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.options.path)
            .field("connected", &self.pool.lock().is_some())
            .finish_non_exhaustive()
    }
}
