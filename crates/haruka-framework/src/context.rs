//! Per-event contexts handed to listeners and command handlers.
//!
//! - [`EventContext`]: one per inbound message. Holds the event, the
//!   [`Responder`], the store and the shared services.
//! - [`CommandContext`]: what a command handler receives. Wraps an
//!   `Arc<EventContext>` together with the parsed trigger, arguments and
//!   the matched [`CommandMeta`].
//!
//! Neither derefs to the other; accessors forward explicitly.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use haruka_core::{
    BoxedStore, BoxedTransport, MessageEvent, RetryError, RetryExecutor, SentMessage,
    TransportError, TransportResult,
};

use crate::command::CommandMeta;
use crate::services::Services;
use crate::split::ParsedCommand;

/// Error returned by [`Responder`] methods.
pub type ResponseError = RetryError<TransportError>;

// =============================================================================
// Responder
// =============================================================================

/// Sends replies for one inbound message.
///
/// Every outbound call goes through the [`RetryExecutor`], so a rate-limit
/// signal from the transport is absorbed within the configured caps.
#[derive(Clone)]
pub struct Responder {
    transport: BoxedTransport,
    retry: RetryExecutor,
    chat_id: i64,
    message_id: i64,
    outgoing: bool,
}

impl Responder {
    /// Creates a responder for `event`.
    pub fn new(transport: BoxedTransport, retry: RetryExecutor, event: &MessageEvent) -> Self {
        Self {
            transport,
            retry,
            chat_id: event.chat_id,
            message_id: event.message_id,
            outgoing: event.outgoing,
        }
    }

    /// Answers the triggering message.
    ///
    /// The account's own messages are edited in place; anyone else's get a
    /// reply.
    pub async fn respond(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.retry.execute(|| self.respond_once(text)).await
    }

    /// Like [`respond`](Self::respond) but a single attempt: a rate limit is
    /// returned to the caller instead of waited out.
    pub async fn respond_once(&self, text: &str) -> TransportResult<SentMessage> {
        if self.outgoing {
            self.transport.edit(self.chat_id, self.message_id, text).await
        } else {
            self.transport
                .send(self.chat_id, text, Some(self.message_id))
                .await
        }
    }

    /// Sends a new message into the chat, not tied to the trigger.
    pub async fn send(&self, text: &str) -> Result<SentMessage, ResponseError> {
        let chat_id = self.chat_id;
        self.retry
            .execute(|| self.transport.send(chat_id, text, None))
            .await
    }

    /// Deletes a message in this chat.
    pub async fn delete(&self, message_id: i64) -> Result<(), ResponseError> {
        let chat_id = self.chat_id;
        self.retry
            .execute(|| self.transport.delete(chat_id, message_id))
            .await
    }

    /// Responds with an error notice.
    pub async fn err(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.respond(&error_notice(text)).await
    }

    /// Single-attempt [`err`](Self::err), for reporting failures.
    pub async fn err_once(&self, text: &str) -> TransportResult<SentMessage> {
        self.respond_once(&error_notice(text)).await
    }

    /// Responds with a success notice.
    pub async fn ok(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.respond(&format!("✅ Success: {text}")).await
    }

    /// Responds with a warning notice.
    pub async fn warn(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.respond(&format!("⚠️ Warning: {text}")).await
    }

    /// Responds, then deletes the response after `delay` in the background.
    pub async fn respond_then_delete(
        &self,
        text: &str,
        delay: Duration,
    ) -> Result<SentMessage, ResponseError> {
        let sent = self.respond(text).await?;
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let chat_id = sent.chat_id;
            let result = this
                .retry
                .execute(|| this.transport.delete(chat_id, sent.message_id))
                .await;
            if let Err(e) = result {
                debug!(chat = chat_id, message = sent.message_id, error = %e, "Auto-delete failed");
            }
        });
        Ok(sent)
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }
}

fn error_notice(text: &str) -> String {
    format!("⛔ Error: {text}")
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("chat_id", &self.chat_id)
            .field("message_id", &self.message_id)
            .field("outgoing", &self.outgoing)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// EventContext
// =============================================================================

/// Shared context for one inbound message.
pub struct EventContext {
    event: MessageEvent,
    responder: Responder,
    store: BoxedStore,
    services: Arc<Services>,
}

impl EventContext {
    pub fn new(
        event: MessageEvent,
        responder: Responder,
        store: BoxedStore,
        services: Arc<Services>,
    ) -> Self {
        Self {
            event,
            responder,
            store,
            services,
        }
    }

    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn store(&self) -> &BoxedStore {
        &self.store
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Shorthand for `services().get::<T>()`.
    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CommandContext
// =============================================================================

/// Context handed to a command handler.
pub struct CommandContext {
    base: Arc<EventContext>,
    parsed: ParsedCommand,
    meta: Arc<CommandMeta>,
}

impl CommandContext {
    pub fn new(base: Arc<EventContext>, parsed: ParsedCommand, meta: Arc<CommandMeta>) -> Self {
        Self { base, parsed, meta }
    }

    pub fn base(&self) -> &Arc<EventContext> {
        &self.base
    }

    pub fn event(&self) -> &MessageEvent {
        self.base.event()
    }

    /// The case-folded trigger that matched, which may be an alias.
    pub fn trigger(&self) -> &str {
        &self.parsed.trigger
    }

    /// The prefix the message started with.
    pub fn prefix(&self) -> &str {
        &self.parsed.prefix
    }

    /// Shell-split arguments after the trigger.
    pub fn args(&self) -> &[String] {
        &self.parsed.args
    }

    /// Raw text after the trigger, leading whitespace removed.
    pub fn input(&self) -> &str {
        &self.parsed.input
    }

    pub fn command(&self) -> &Arc<CommandMeta> {
        &self.meta
    }

    pub fn responder(&self) -> &Responder {
        self.base.responder()
    }

    pub fn store(&self) -> &BoxedStore {
        self.base.store()
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.base.service::<T>()
    }

    pub async fn respond(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.base.responder.respond(text).await
    }

    pub async fn err(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.base.responder.err(text).await
    }

    pub async fn ok(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.base.responder.ok(text).await
    }

    pub async fn warn(&self, text: &str) -> Result<SentMessage, ResponseError> {
        self.base.responder.warn(text).await
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("trigger", &self.parsed.trigger)
            .field("args", &self.parsed.args)
            .field("module", &self.meta.module_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport and store shared by the crate's tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    use haruka_core::{KvStore, StoreResult, TransportResult, Transport};

    use super::*;

    /// One recorded transport call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Send { chat_id: i64, text: String, reply_to: Option<i64> },
        Edit { chat_id: i64, message_id: i64, text: String },
        Delete { chat_id: i64, message_id: i64 },
    }

    /// Records every call; can be told to rate-limit the next N sends.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub calls: Mutex<Vec<Call>>,
        pub rate_limit_next: Mutex<Vec<Duration>>,
        next_id: AtomicI64,
    }

    impl RecordingTransport {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Send { text, .. } | Call::Edit { text, .. } => Some(text),
                    Call::Delete { .. } => None,
                })
                .collect()
        }

        fn throttle(&self) -> TransportResult<()> {
            let mut pending = self.rate_limit_next.lock();
            if pending.is_empty() {
                Ok(())
            } else {
                Err(TransportError::RateLimited {
                    retry_after: pending.remove(0),
                })
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn self_id(&self) -> i64 {
            1
        }

        async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> TransportResult<SentMessage> {
            self.throttle()?;
            self.calls.lock().push(Call::Send {
                chat_id,
                text: text.to_string(),
                reply_to,
            });
            let message_id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(SentMessage { chat_id, message_id })
        }

        async fn edit(&self, chat_id: i64, message_id: i64, text: &str) -> TransportResult<SentMessage> {
            self.throttle()?;
            self.calls.lock().push(Call::Edit {
                chat_id,
                message_id,
                text: text.to_string(),
            });
            Ok(SentMessage { chat_id, message_id })
        }

        async fn delete(&self, chat_id: i64, message_id: i64) -> TransportResult<()> {
            self.calls.lock().push(Call::Delete { chat_id, message_id });
            Ok(())
        }
    }

    /// Map-backed store without expiry.
    #[derive(Default)]
    pub struct MemoryStore {
        map: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl KvStore for MemoryStore {
        async fn set_raw(&self, key: &str, value: Value, _ttl: Option<Duration>) -> StoreResult<()> {
            haruka_core::validate_key(key)?;
            self.map.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn get_raw(&self, key: &str) -> StoreResult<Option<Value>> {
            Ok(self.map.lock().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            Ok(self.map.lock().remove(key).is_some())
        }

        async fn purge_expired(&self) -> StoreResult<u64> {
            Ok(0)
        }
    }

    pub fn event_context(transport: Arc<RecordingTransport>, event: MessageEvent) -> Arc<EventContext> {
        let responder = Responder::new(transport, RetryExecutor::default(), &event);
        Arc::new(EventContext::new(
            event,
            responder,
            Arc::new(MemoryStore::default()),
            Arc::new(Services::new()),
        ))
    }
}
