//! # Haruka Store
//!
//! Persistent [`KvStore`](haruka_core::KvStore) backed by SQLite.
//!
//! ```rust,ignore
//! use haruka_core::KvStoreExt;
//! use haruka_store::{SqliteStore, SqliteStoreOptions};
//!
//! let store = SqliteStore::open(SqliteStoreOptions::new("haruka_data.db")).await?;
//! store.set("afk", &"brb", Some(Duration::from_secs(600))).await?;
//! let reason: Option<String> = store.get("afk").await?;
//! ```

mod sqlite;

pub use sqlite::{SqliteStore, SqliteStoreOptions};
