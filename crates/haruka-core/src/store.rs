//! Key-value store with lazy expiration.
//!
//! [`KvStore`] is the object-safe interface handlers reach through their
//! context. Values are stored as JSON; [`KvStoreExt`] adds typed
//! `set`/`get` on top of the raw methods.
//!
//! Expiration is lazy: a record whose expiry has passed is reported as absent
//! by `get_raw` but stays on disk until [`purge_expired`](KvStore::purge_expired)
//! removes it. [`spawn_purge_task`] runs that cleanup on a fixed interval until
//! its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Object-safe key-value store interface.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Writes `value` under `key`, replacing any previous record.
    ///
    /// `ttl` is converted to an absolute expiry at write time; `None` means
    /// the record never expires.
    async fn set_raw(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()>;

    /// Reads the value under `key`. Expired records read as `None`.
    async fn get_raw(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Removes `key`. Returns `true` if a record existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Physically removes every expired record. Returns how many were removed.
    async fn purge_expired(&self) -> StoreResult<u64>;

    /// Releases the underlying resources. Later calls may reconnect.
    async fn close(&self) {}
}

/// A shared store trait object.
pub type BoxedStore = Arc<dyn KvStore>;

/// Typed helpers over [`KvStore`].
#[async_trait]
pub trait KvStoreExt: KvStore {
    /// Serializes `value` and stores it.
    ///
    /// Values that cannot be represented as JSON (e.g. maps with non-string
    /// keys) are rejected with [`StoreError::Serialization`] before anything
    /// is written.
    async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> StoreResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.set_raw(key, value, ttl).await
    }

    /// Reads and deserializes the value under `key`, falling back to
    /// `default` when the record is absent or expired.
    async fn get_or<T>(&self, key: &str, default: T) -> StoreResult<T>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_raw(key).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(default),
        }
    }

    /// Reads and deserializes the value under `key`.
    async fn get<T>(&self, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_raw(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// Rejects keys the store cannot address.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.trim().is_empty() {
        return Err(StoreError::Validation("key must not be empty".into()));
    }
    Ok(())
}

/// Spawns a task that calls [`KvStore::purge_expired`] every `every` until
/// `token` is cancelled.
///
/// Purge failures are logged and the loop keeps going; correctness never
/// depends on the purge having run.
pub fn spawn_purge_task(
    store: BoxedStore,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Store purge task stopped");
                    break;
                }
                _ = interval.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "Purged expired store records"),
                        Err(e) => warn!(error = %e, "Store purge failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Minimal map-backed store; expiry is ignored.
    #[derive(Default)]
    struct MapStore {
        map: Mutex<HashMap<String, Value>>,
        purges: AtomicU64,
    }

    #[async_trait]
    impl KvStore for MapStore {
        async fn set_raw(&self, key: &str, value: Value, _ttl: Option<Duration>) -> StoreResult<()> {
            validate_key(key)?;
            self.map.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }

        async fn get_raw(&self, key: &str) -> StoreResult<Option<Value>> {
            Ok(self.map.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            Ok(self.map.lock().unwrap().remove(key).is_some())
        }

        async fn purge_expired(&self) -> StoreResult<u64> {
            self.purges.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_typed_roundtrip_and_default() {
        let store = MapStore::default();
        store.set("afk", &vec!["a", "b"], None).await.unwrap();

        let got: Vec<String> = store.get_or("afk", Vec::new()).await.unwrap();
        assert_eq!(got, vec!["a", "b"]);

        let missing: u32 = store.get_or("missing", 7).await.unwrap();
        assert_eq!(missing, 7);
    }

    #[tokio::test]
    async fn test_non_serializable_value_rejected() {
        let store = MapStore::default();
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);

        let err = store.set("bad", &bad, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert!(store.get_raw("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_key_is_validation_error() {
        let store = MapStore::default();
        let err = store.set("  ", &1, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_runs_until_cancelled() {
        let store = Arc::new(MapStore::default());
        let token = CancellationToken::new();
        let handle = spawn_purge_task(
            Arc::clone(&store) as BoxedStore,
            Duration::from_secs(10),
            token.clone(),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 3);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 3);
    }
}
