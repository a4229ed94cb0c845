//! Runtime orchestration: configuration, store, module loading, the inbound
//! event loop and shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use haruka_runtime::HarukaRuntime;
//!
//! // Loads haruka.toml from the current directory
//! let runtime = HarukaRuntime::new();
//! let (tx, rx) = runtime.event_channel();
//!
//! // Feed `tx` from the transport, then run until Ctrl+C
//! runtime.run(transport, rx).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::builtin;
use crate::config::{ConfigLoader, ConfigResult, HarukaConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::packages::{HttpSource, RepoManager};
use haruka_core::{
    BoxedStore, BoxedTransport, MessageEvent, RetryExecutor, spawn_purge_task,
};
use haruka_framework::{
    BulkLoadReport, DispatchOutcome, Dispatcher, ListenerRegistry, Loader, ModuleCatalog,
    Registry, Services,
};
use haruka_store::SqliteStore;

/// Process-wide facts handed to modules through [`Services`].
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    started_at: Instant,
    shutdown: CancellationToken,
}

impl RuntimeInfo {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            started_at: Instant::now(),
            shutdown,
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Cancelled when the runtime begins shutting down.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Entry point: owns the configuration and the module catalog.
///
/// # Custom Configuration
///
/// ```rust,ignore
/// let runtime = HarukaRuntime::builder()
///     .config_file("config/haruka.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct HarukaRuntime {
    config: HarukaConfig,
    catalog: Arc<ModuleCatalog>,
    started: AtomicBool,
}

impl HarukaRuntime {
    /// Loads configuration from the current directory, falling back to
    /// defaults when loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                HarukaConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration and initializes logging.
    ///
    /// The catalog starts with every built-in module kind.
    pub fn from_config(config: &HarukaConfig) -> Self {
        logging::init_from_config(&config.logging);

        let catalog = Arc::new(ModuleCatalog::new());
        builtin::register_all(&catalog);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            prefixes = ?config.dispatch.prefixes,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            catalog,
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &HarukaConfig {
        &self.config
    }

    /// Module kinds available to manifests. Register extra kinds here
    /// before [`start`](Self::start).
    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    /// A channel sized by `dispatch.event_buffer` for feeding
    /// [`Engine::serve`].
    pub fn event_channel(&self) -> (mpsc::Sender<MessageEvent>, mpsc::Receiver<MessageEvent>) {
        mpsc::channel(self.config.dispatch.event_buffer)
    }

    /// Opens the store, wires the dispatcher and loads every module.
    ///
    /// A store that cannot be opened is fatal. Module load failures are
    /// logged and reported through [`Engine::load_report`].
    pub async fn start(&self, transport: BoxedTransport) -> RuntimeResult<Engine> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Runtime is already running");
            return Err(RuntimeError::AlreadyRunning);
        }

        let engine = self.assemble(transport).await;
        if engine.is_err() {
            self.started.store(false, Ordering::SeqCst);
        }
        engine
    }

    async fn assemble(&self, transport: BoxedTransport) -> RuntimeResult<Engine> {
        info!("Starting Haruka runtime");
        let config = &self.config;

        let store: BoxedStore = Arc::new(SqliteStore::open(config.store.to_options()).await?);

        let shutdown = CancellationToken::new();
        let info = Arc::new(RuntimeInfo::new(shutdown.clone()));
        let retry = RetryExecutor::new(config.retry.to_policy());

        let registry = Arc::new(Registry::new(config.registry.lock_timeout()));
        let listeners = Arc::new(ListenerRegistry::new());
        let loader = Arc::new(Loader::new(
            Arc::clone(&registry),
            Arc::clone(&listeners),
            Arc::clone(&self.catalog),
            config.modules.plugins_dir.clone(),
        ));
        let packages = Arc::new(RepoManager::new(
            config.modules.packages_file.clone(),
            Arc::new(HttpSource::new(config.modules.fetch_timeout())?),
            retry,
        ));

        let services = Arc::new(Services::new());
        services.insert(Arc::clone(&loader));
        services.insert(Arc::clone(&registry));
        services.insert(packages);
        services.insert(Arc::clone(&info));

        let dispatcher = Dispatcher::builder(registry, transport, Arc::clone(&store))
            .listeners(listeners)
            .services(Arc::clone(&services))
            .retry(retry)
            .config(config.dispatch.to_dispatch_config())
            .build();

        let load_report = loader.load_all().await;

        let purge = spawn_purge_task(
            Arc::clone(&store),
            config.store.purge_interval(),
            shutdown.child_token(),
        );

        info!(
            modules = load_report.loaded.len(),
            failed = load_report.failed.len(),
            "Runtime started"
        );

        Ok(Engine {
            dispatcher: Arc::new(dispatcher),
            loader,
            services,
            store,
            info,
            tracker: TaskTracker::new(),
            purge,
            grace: config.dispatch.shutdown_grace(),
            load_report,
        })
    }

    /// Serves `events` until Ctrl+C or SIGTERM, then shuts down.
    pub async fn run(&self, transport: BoxedTransport, events: mpsc::Receiver<MessageEvent>) -> RuntimeResult<()> {
        let engine = self.start(transport).await?;
        info!("Haruka is now running. Press Ctrl+C to stop.");

        let signal = engine.serve(events, wait_for_shutdown()).await;
        engine.shutdown().await;
        signal.unwrap_or(Ok(()))
    }

    /// Serves `events` until `shutdown` completes or the channel closes.
    pub async fn run_until<F>(
        &self,
        transport: BoxedTransport,
        events: mpsc::Receiver<MessageEvent>,
        shutdown: F,
    ) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let engine = self.start(transport).await?;
        engine.serve(events, shutdown).await;
        engine.shutdown().await;
        Ok(())
    }
}

impl Default for HarukaRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// A started runtime.
pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    loader: Arc<Loader>,
    services: Arc<Services>,
    store: BoxedStore,
    info: Arc<RuntimeInfo>,
    tracker: TaskTracker,
    purge: JoinHandle<()>,
    grace: Duration,
    load_report: BulkLoadReport,
}

impl Engine {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn store(&self) -> &BoxedStore {
        &self.store
    }

    pub fn info(&self) -> &Arc<RuntimeInfo> {
        &self.info
    }

    /// Result of the startup load pass.
    pub fn load_report(&self) -> &BulkLoadReport {
        &self.load_report
    }

    /// Dispatches one event inline.
    pub async fn dispatch(&self, event: MessageEvent) -> DispatchOutcome {
        self.dispatcher.dispatch(event).await
    }

    /// Dispatches each received event on its own task.
    ///
    /// Returns the output of `shutdown` if it finished first, or `None` when
    /// the channel closed or the runtime was cancelled.
    pub async fn serve<F>(&self, mut events: mpsc::Receiver<MessageEvent>, shutdown: F) -> Option<F::Output>
    where
        F: Future,
    {
        let token = self.info.shutdown_token().clone();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                out = &mut shutdown => return Some(out),
                _ = token.cancelled() => return None,
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Event channel closed");
                        return None;
                    };
                    let dispatcher = Arc::clone(&self.dispatcher);
                    self.tracker.spawn(async move {
                        let chat = event.chat_id;
                        let outcome = dispatcher.dispatch(event).await;
                        tracing::trace!(chat, ?outcome, "Event processed");
                    });
                }
            }
        }
    }

    /// Stops background work, waits up to the grace period for in-flight
    /// events, and closes the store.
    pub async fn shutdown(self) {
        info!("Stopping Haruka runtime");
        self.info.shutdown_token().cancel();

        self.tracker.close();
        if tokio::time::timeout(self.grace, self.tracker.wait()).await.is_err() {
            warn!(
                pending = self.tracker.len(),
                grace_secs = self.grace.as_secs(),
                "In-flight events did not finish before the grace period"
            );
        }

        if let Err(e) = self.purge.await {
            warn!(error = %e, "Store purge task ended abnormally");
        }
        self.store.close().await;
        info!("Runtime stopped");
    }
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(RuntimeError::Signal)?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(RuntimeError::Signal)?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`HarukaRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Loads this file instead of searching.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables `HARUKA_*` environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration on top of everything else.
    pub fn merge(mut self, config: HarukaConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<HarukaRuntime> {
        let config = self.config_loader.load()?;
        Ok(HarukaRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use haruka_core::{SentMessage, Transport, TransportResult};
    use haruka_framework::IgnoreReason;

    #[derive(Default)]
    struct Outbox {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Outbox {
        fn self_id(&self) -> i64 {
            1
        }

        async fn send(&self, chat_id: i64, text: &str, _reply_to: Option<i64>) -> TransportResult<SentMessage> {
            self.texts.lock().push(text.to_string());
            Ok(SentMessage { chat_id, message_id: 900 })
        }

        async fn edit(&self, chat_id: i64, message_id: i64, text: &str) -> TransportResult<SentMessage> {
            self.texts.lock().push(text.to_string());
            Ok(SentMessage { chat_id, message_id })
        }

        async fn delete(&self, _chat_id: i64, _message_id: i64) -> TransportResult<()> {
            Ok(())
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> HarukaConfig {
        let mut config = HarukaConfig::default();
        config.store.path = ":memory:".to_string();
        config.modules.plugins_dir = dir.path().join("plugins");
        config.modules.packages_file = dir.path().join("repos.json");
        config.dispatch.cooldown_ms = 0;
        config.dispatch.shutdown_grace_secs = 1;
        config
    }

    fn own(text: &str) -> MessageEvent {
        MessageEvent::new(10, 1, 42, text, true)
    }

    #[tokio::test]
    async fn test_start_loads_system_modules() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = HarukaRuntime::from_config(&test_config(&dir));
        let outbox = Arc::new(Outbox::default());

        let engine = runtime.start(outbox.clone()).await.unwrap();
        assert_eq!(engine.load_report().loaded.len(), 3);
        assert!(engine.load_report().failed.is_empty());
        assert!(engine.services().contains::<RuntimeInfo>());
        assert!(engine.services().contains::<RepoManager>());
        assert!(dir.path().join("plugins").is_dir());

        assert_eq!(engine.dispatch(own(".help")).await, DispatchOutcome::Completed);
        assert!(outbox.texts.lock()[0].starts_with("🌸 Haruka Help"));
        assert_eq!(
            engine.dispatch(own(".nope")).await,
            DispatchOutcome::Ignored(IgnoreReason::UnknownTrigger)
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = HarukaRuntime::from_config(&test_config(&dir));
        let engine = runtime.start(Arc::new(Outbox::default())).await.unwrap();

        let err = runtime.start(Arc::new(Outbox::default())).await.err().unwrap();
        assert!(matches!(err, RuntimeError::AlreadyRunning));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unopenable_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        // A directory is not a database file.
        config.store.path = dir.path().display().to_string();
        let runtime = HarukaRuntime::from_config(&config);

        let err = runtime.start(Arc::new(Outbox::default())).await.err().unwrap();
        assert!(matches!(err, RuntimeError::Store(_)));
    }

    #[tokio::test]
    async fn test_serve_until_channel_closes() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = HarukaRuntime::from_config(&test_config(&dir));
        let outbox = Arc::new(Outbox::default());
        let (tx, rx) = runtime.event_channel();

        tx.send(own(".info")).await.unwrap();
        tx.send(own("not a command")).await.unwrap();
        drop(tx);

        tokio_test::assert_ok!(
            runtime
                .run_until(outbox.clone(), rx, std::future::pending())
                .await
        );

        let texts = outbox.texts.lock().clone();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("⚙️ SYSTEM STATUS"));
        assert!(texts[1].contains("┣ Uptime: 0d 0h 0m"));
    }

    #[tokio::test]
    async fn test_shutdown_future_stops_serving() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = HarukaRuntime::from_config(&test_config(&dir));
        let engine = runtime.start(Arc::new(Outbox::default())).await.unwrap();
        let token = engine.info().shutdown_token().clone();
        let (_tx, rx) = runtime.event_channel();

        let out = engine.serve(rx, async { 7 }).await;
        assert_eq!(out, Some(7));
        assert!(!token.is_cancelled());

        engine.shutdown().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_repeat_sessions_stop_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        std::fs::write(
            dir.path().join("plugins/repeat.toml"),
            "kind = \"repeat\"\n[config]\nmin_interval_ms = 10\n",
        )
        .unwrap();
        let runtime = HarukaRuntime::from_config(&test_config(&dir));
        let outbox = Arc::new(Outbox::default());
        let engine = runtime.start(outbox.clone()).await.unwrap();

        engine.dispatch(own(".repeat 10 tick")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.shutdown().await;

        let count = || outbox.texts.lock().iter().filter(|t| *t == "tick").count();
        let after_shutdown = count();
        assert!(after_shutdown > 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(), after_shutdown);
    }

    #[test]
    fn test_runtime_info_uptime() {
        let info = RuntimeInfo::new(CancellationToken::new());
        assert!(info.uptime() < Duration::from_secs(5));
        assert!(info.started_at() <= Instant::now());
        assert!(!info.shutdown_token().is_cancelled());
    }
}
