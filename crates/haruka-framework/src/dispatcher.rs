//! Routing inbound messages to command handlers.
//!
//! For every message the [`Dispatcher`]:
//!
//! 1. runs passive listeners;
//! 2. matches the longest configured prefix and case-folds the trigger;
//! 3. looks the trigger up in the current registry snapshot;
//! 4. checks permission: the account's own messages always pass, others only
//!    for commands flagged `allow_external`;
//! 5. applies the per-sender cooldown;
//! 6. runs the handler in its own task under a timeout.
//!
//! Gates 2-5 reject silently. Handler errors, panics and timeouts are logged
//! and reported back to the chat; a failure to deliver that report is only
//! logged. Nothing a handler does can take the dispatcher down.

use std::sync::Arc;
use std::time::Duration;

use tower::ServiceExt;
use tracing::{debug, error, warn};

use haruka_core::{BoxedStore, BoxedTransport, MessageEvent, RetryExecutor};

use crate::context::{CommandContext, EventContext, Responder};
use crate::cooldown::CooldownTracker;
use crate::listener::ListenerRegistry;
use crate::registry::Registry;
use crate::services::Services;
use crate::split::{ParseMiss, parse_command};

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Command prefixes; the longest match wins.
    pub prefixes: Vec<String>,
    /// Minimum gap between accepted commands per sender.
    pub cooldown: Duration,
    /// Wall-clock bound on a single handler run.
    pub command_timeout: Duration,
    /// Error text longer than this is truncated before reporting.
    pub max_error_len: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            prefixes: vec![".".to_string()],
            cooldown: Duration::from_millis(500),
            command_timeout: Duration::from_secs(240),
            max_error_len: 300,
        }
    }
}

/// Why a message did not reach a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoPrefix,
    EmptyTrigger,
    UnknownTrigger,
    NotPermitted,
    CoolingDown,
}

impl From<ParseMiss> for IgnoreReason {
    fn from(miss: ParseMiss) -> Self {
        match miss {
            ParseMiss::NoPrefix => Self::NoPrefix,
            ParseMiss::EmptyTrigger => Self::EmptyTrigger,
        }
    }
}

/// Result of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored(IgnoreReason),
    Completed,
    /// The handler returned an error or panicked.
    Failed,
    /// The handler did not finish within the timeout.
    TimedOut,
}

/// Routes messages to registered commands.
pub struct Dispatcher {
    registry: Arc<Registry>,
    listeners: Arc<ListenerRegistry>,
    cooldowns: CooldownTracker,
    transport: BoxedTransport,
    store: BoxedStore,
    services: Arc<Services>,
    retry: RetryExecutor,
    config: DispatchConfig,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    registry: Arc<Registry>,
    transport: BoxedTransport,
    store: BoxedStore,
    listeners: Option<Arc<ListenerRegistry>>,
    services: Option<Arc<Services>>,
    retry: RetryExecutor,
    config: DispatchConfig,
}

impl DispatcherBuilder {
    pub fn listeners(mut self, listeners: Arc<ListenerRegistry>) -> Self {
        self.listeners = Some(listeners);
        self
    }

    pub fn services(mut self, services: Arc<Services>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            registry: self.registry,
            listeners: self.listeners.unwrap_or_default(),
            cooldowns: CooldownTracker::new(self.config.cooldown),
            transport: self.transport,
            store: self.store,
            services: self.services.unwrap_or_default(),
            retry: self.retry,
            config: self.config,
        }
    }
}

impl Dispatcher {
    pub fn builder(
        registry: Arc<Registry>,
        transport: BoxedTransport,
        store: BoxedStore,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            transport,
            store,
            listeners: None,
            services: None,
            retry: RetryExecutor::default(),
            config: DispatchConfig::default(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Processes one inbound message.
    pub async fn dispatch(&self, event: MessageEvent) -> DispatchOutcome {
        let responder = Responder::new(Arc::clone(&self.transport), self.retry, &event);
        let base = Arc::new(EventContext::new(
            event,
            responder,
            Arc::clone(&self.store),
            Arc::clone(&self.services),
        ));

        self.listeners.notify(&base).await;

        let event = base.event();
        let parsed = match parse_command(&self.config.prefixes, event.text()) {
            Ok(parsed) => parsed,
            Err(miss) => return DispatchOutcome::Ignored(miss.into()),
        };

        let Some(meta) = self.registry.snapshot().lookup(&parsed.trigger).cloned() else {
            debug!(trigger = %parsed.trigger, "Unknown trigger");
            return DispatchOutcome::Ignored(IgnoreReason::UnknownTrigger);
        };

        if !event.outgoing && !meta.flags().allow_external {
            debug!(trigger = %parsed.trigger, sender = event.sender_id, "External sender not permitted");
            return DispatchOutcome::Ignored(IgnoreReason::NotPermitted);
        }

        if !self.cooldowns.try_acquire(event.sender_id) {
            debug!(trigger = %parsed.trigger, sender = event.sender_id, "Sender cooling down");
            return DispatchOutcome::Ignored(IgnoreReason::CoolingDown);
        }

        let (sender, chat) = (event.sender_id, event.chat_id);
        let trigger = parsed.trigger.clone();
        let module = meta.module_name().to_string();
        let handler = meta.handler().clone();
        let ctx = Arc::new(CommandContext::new(Arc::clone(&base), parsed, meta));

        // A timed-out task is detached, not aborted: the handler may be
        // midway through a non-repeatable send.
        let task = tokio::spawn(handler.oneshot(Arc::clone(&ctx)));
        match tokio::time::timeout(self.config.command_timeout, task).await {
            Ok(Ok(Ok(()))) => DispatchOutcome::Completed,
            Ok(Ok(Err(e))) => {
                error!(trigger = %trigger, module = %module, sender, chat, error = %e, "Command failed");
                let text = truncate(&e.to_string(), self.config.max_error_len);
                self.report(&ctx, &text).await;
                DispatchOutcome::Failed
            }
            Ok(Err(join)) => {
                error!(trigger = %trigger, module = %module, sender, chat, error = %join, "Command panicked");
                self.report(&ctx, "command crashed").await;
                DispatchOutcome::Failed
            }
            Err(_) => {
                warn!(
                    trigger = %trigger,
                    module = %module,
                    sender,
                    chat,
                    timeout_secs = self.config.command_timeout.as_secs(),
                    "Command timed out"
                );
                self.report(&ctx, "Execution time exceeded!").await;
                DispatchOutcome::TimedOut
            }
        }
    }

    /// One attempt only: a failed report is logged, never retried.
    async fn report(&self, ctx: &CommandContext, text: &str) {
        if let Err(e) = ctx.responder().err_once(text).await {
            warn!(trigger = %ctx.trigger(), error = %e, "Failed to deliver error report");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Cuts `text` to at most `max` characters, marking the cut.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandMeta, handler_fn};
    use crate::context::testing::{Call, MemoryStore, RecordingTransport};
    use crate::listener::listener_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::BoxError;

    struct Harness {
        dispatcher: Dispatcher,
        transport: Arc<RecordingTransport>,
        calls: Arc<AtomicUsize>,
        seen: Arc<parking_lot::Mutex<Vec<(String, Vec<String>, String)>>>,
    }

    async fn harness(config: DispatchConfig) -> Harness {
        let registry = Arc::new(Registry::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (c, s) = (Arc::clone(&calls), Arc::clone(&seen));
        let echo = handler_fn(move |ctx: Arc<CommandContext>| {
            let (c, s) = (Arc::clone(&c), Arc::clone(&s));
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                s.lock().push((
                    ctx.trigger().to_string(),
                    ctx.args().to_vec(),
                    ctx.input().to_string(),
                ));
                ctx.respond(ctx.input()).await?;
                Ok::<_, BoxError>(())
            }
        });
        let fail = handler_fn(|_ctx| async { Err::<(), _>("x".repeat(50)) });
        let crash = handler_fn(|ctx: Arc<CommandContext>| async move {
            if ctx.args().is_empty() {
                panic!("handler bug");
            }
            Ok::<_, BoxError>(())
        });
        let slow = handler_fn(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok::<_, BoxError>(())
        });

        registry
            .register(
                "plugins.test",
                vec![
                    CommandMeta::new("echo", echo).alias("say"),
                    CommandMeta::new("public", handler_fn(|_ctx| async { Ok::<_, BoxError>(()) }))
                        .allow_external(),
                    CommandMeta::new("fail", fail),
                    CommandMeta::new("crash", crash),
                    CommandMeta::new("slow", slow),
                ],
            )
            .await
            .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::builder(
            registry,
            Arc::clone(&transport) as BoxedTransport,
            Arc::new(MemoryStore::default()),
        )
        .config(config)
        .build();

        Harness {
            dispatcher,
            transport,
            calls,
            seen,
        }
    }

    fn own(text: &str) -> MessageEvent {
        MessageEvent::new(10, 1, 100, text, true)
    }

    fn foreign(text: &str) -> MessageEvent {
        MessageEvent::new(10, 42, 100, text, false)
    }

    #[tokio::test]
    async fn test_quoted_args_reach_handler() {
        let h = harness(DispatchConfig::default()).await;

        let outcome = h.dispatcher.dispatch(own(".echo \"hi there\"")).await;

        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(
            h.seen.lock()[0],
            ("echo".into(), vec!["hi there".into()], "\"hi there\"".into())
        );
        assert_eq!(
            h.transport.calls(),
            vec![Call::Edit {
                chat_id: 10,
                message_id: 100,
                text: "\"hi there\"".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_gates_reject_silently() {
        let h = harness(DispatchConfig::default()).await;

        assert_eq!(
            h.dispatcher.dispatch(own("hello")).await,
            DispatchOutcome::Ignored(IgnoreReason::NoPrefix)
        );
        assert_eq!(
            h.dispatcher.dispatch(own(".")).await,
            DispatchOutcome::Ignored(IgnoreReason::EmptyTrigger)
        );
        assert_eq!(
            h.dispatcher.dispatch(own(".nope")).await,
            DispatchOutcome::Ignored(IgnoreReason::UnknownTrigger)
        );
        assert_eq!(
            h.dispatcher.dispatch(foreign(".echo hi")).await,
            DispatchOutcome::Ignored(IgnoreReason::NotPermitted)
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_external_allowed_command_replies() {
        let h = harness(DispatchConfig::default()).await;
        assert_eq!(
            h.dispatcher.dispatch(foreign(".PUBLIC")).await,
            DispatchOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_cooldown_blocks_rapid_repeat() {
        let config = DispatchConfig {
            cooldown: Duration::from_millis(200),
            ..DispatchConfig::default()
        };
        let h = harness(config).await;

        assert_eq!(h.dispatcher.dispatch(own(".say a")).await, DispatchOutcome::Completed);
        assert_eq!(
            h.dispatcher.dispatch(own(".say b")).await,
            DispatchOutcome::Ignored(IgnoreReason::CoolingDown)
        );
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(h.dispatcher.dispatch(own(".say c")).await, DispatchOutcome::Completed);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_error_is_reported_truncated() {
        let config = DispatchConfig {
            max_error_len: 20,
            ..DispatchConfig::default()
        };
        let h = harness(config).await;

        assert_eq!(h.dispatcher.dispatch(own(".fail")).await, DispatchOutcome::Failed);

        let texts = h.transport.texts();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0], format!("⛔ Error: {}…", "x".repeat(19)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_report_is_dropped() {
        let h = harness(DispatchConfig::default()).await;
        h.transport.rate_limit_next.lock().push(Duration::from_secs(30));
        let start = tokio::time::Instant::now();

        assert_eq!(h.dispatcher.dispatch(own(".fail")).await, DispatchOutcome::Failed);

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(h.transport.texts().is_empty());
        assert!(h.transport.rate_limit_next.lock().is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let config = DispatchConfig {
            cooldown: Duration::ZERO,
            ..DispatchConfig::default()
        };
        let h = harness(config).await;

        assert_eq!(h.dispatcher.dispatch(own(".crash")).await, DispatchOutcome::Failed);
        assert_eq!(h.transport.texts(), vec!["⛔ Error: command crashed"]);

        assert_eq!(h.dispatcher.dispatch(own(".echo ok")).await, DispatchOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let config = DispatchConfig {
            command_timeout: Duration::from_secs(5),
            ..DispatchConfig::default()
        };
        let h = harness(config).await;
        let start = tokio::time::Instant::now();

        assert_eq!(h.dispatcher.dispatch(own(".slow")).await, DispatchOutcome::TimedOut);

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(h.transport.texts(), vec!["⛔ Error: Execution time exceeded!"]);
    }

    #[tokio::test]
    async fn test_listeners_see_every_message() {
        let h = harness(DispatchConfig::default()).await;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        h.dispatcher.listeners.replace(
            "plugins.watch",
            vec![listener_fn(move |_ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            })],
        );

        h.dispatcher.dispatch(own("plain text")).await;
        h.dispatcher.dispatch(foreign(".echo nope")).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }
}
