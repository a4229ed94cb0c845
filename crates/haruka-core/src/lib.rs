//! # Haruka Core
//!
//! Foundation types for the Haruka command router.
//!
//! This crate holds everything the routing layers agree on but none of them
//! own:
//!
//! - **Events**: the inbound [`MessageEvent`] the transport produces.
//! - **Transport**: the outbound [`Transport`] trait implemented by chat
//!   clients.
//! - **Backoff**: [`RetryExecutor`], which absorbs "retry after N seconds"
//!   signals within configured caps.
//! - **Storage**: the [`KvStore`] trait for the lazily-expiring key-value
//!   store, plus the periodic purge task.
//! - **Errors**: [`TransportError`] and [`StoreError`].
//!
//! ```text
//! ┌───────────┐   MessageEvent   ┌────────────┐   respond()   ┌───────────────┐
//! │ Transport │ ───────────────▶ │ Dispatcher │ ────────────▶ │ RetryExecutor │──▶ Transport
//! └───────────┘                  └────────────┘               └───────────────┘
//! ```

pub mod clock;
pub mod error;
pub mod event;
pub mod retry;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{StoreError, StoreResult, TransportError, TransportResult};
pub use event::{MessageEvent, SentMessage};
pub use retry::{QuotaReason, RetryAfter, RetryError, RetryExecutor, RetryPolicy};
pub use store::{BoxedStore, KvStore, KvStoreExt, spawn_purge_task, validate_key};
pub use transport::{BoxedTransport, Transport};

/// Prelude for common imports.
pub mod prelude {
    pub use super::event::{MessageEvent, SentMessage};
    pub use super::retry::{RetryExecutor, RetryPolicy};
    pub use super::store::{KvStore, KvStoreExt};
    pub use super::transport::Transport;
}
