//! Transport trait.
//!
//! The chat client is an external collaborator: it authenticates, keeps the
//! connection alive and turns wire updates into [`MessageEvent`]s. The router
//! only needs the outbound half defined here.
//!
//! Implementations report server-imposed backoff as
//! [`TransportError::RateLimited`]; callers wrap sends in a
//! [`RetryExecutor`](crate::retry::RetryExecutor) to absorb it.
//!
//! [`MessageEvent`]: crate::event::MessageEvent
//! [`TransportError::RateLimited`]: crate::error::TransportError::RateLimited

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::event::SentMessage;

/// Outbound operations against the chat service.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Returns the identifier of the controlling account.
    fn self_id(&self) -> i64;

    /// Sends a new message into `chat_id`, optionally as a reply.
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> TransportResult<SentMessage>;

    /// Replaces the text of an existing message owned by the controlling
    /// account.
    async fn edit(&self, chat_id: i64, message_id: i64, text: &str)
    -> TransportResult<SentMessage>;

    /// Deletes a message.
    async fn delete(&self, chat_id: i64, message_id: i64) -> TransportResult<()>;
}

/// A shared transport trait object.
pub type BoxedTransport = Arc<dyn Transport>;
