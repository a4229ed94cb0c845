//! Unified error types for the Haruka core.
//!
//! Framework-level errors (registry, loader, dispatch) are defined in
//! `haruka-framework`; configuration errors live in `haruka-runtime`.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryAfter;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The chat service asked us to back off before trying again.
    #[error("rate limited, retry after {}s", retry_after.as_secs_f64())]
    RateLimited {
        /// Server-declared wait.
        retry_after: Duration,
    },

    /// The transport is not connected.
    #[error("transport is not connected")]
    NotConnected,

    /// The target message no longer exists (deleted, or never visible).
    #[error("message {message_id} not found in chat {chat_id}")]
    MessageNotFound {
        /// Chat the message was expected in.
        chat_id: i64,
        /// Missing message identifier.
        message_id: i64,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

impl RetryAfter for TransportError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors that can occur in key-value store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Empty or malformed input (e.g. an empty key).
    #[error("invalid store input: {0}")]
    Validation(String),

    /// The backing store could not be reached. The next call reconnects.
    #[error("store unreachable: {0}")]
    Connection(String),

    /// The value could not be encoded or decoded. Writes are rejected and
    /// the previously stored value is left untouched.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The encoded value exceeds the configured size limit.
    #[error("value for '{key}' is {size} bytes, limit is {limit}")]
    ValueTooLarge {
        /// Key being written.
        key: String,
        /// Encoded size in bytes.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
