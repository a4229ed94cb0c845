//! Modules shipped with the runtime.
//!
//! | Kind | Trust | Commands |
//! |------|-------|----------|
//! | `help` | system | `help` (`h`) |
//! | `info` | system | `info` (`stats`) |
//! | `packages` | system | `remove`, `reload`, `update`, `haruka` |
//! | `echo` | user | `echo` |
//! | `repeat` | user | `repeat`, `stop` |
//!
//! System kinds load as `system.<kind>` on startup. User kinds only load
//! when a manifest in the plugins directory names them.

use std::sync::Arc;

use haruka_framework::{BoxError, CommandContext, ModuleCatalog};

pub mod echo;
pub mod help;
pub mod info;
pub mod packages;
pub mod repeat;

/// Adds every built-in kind to `catalog`.
pub fn register_all(catalog: &ModuleCatalog) {
    catalog
        .register(help::DESCRIPTOR)
        .register(info::DESCRIPTOR)
        .register(packages::DESCRIPTOR)
        .register(echo::DESCRIPTOR)
        .register(repeat::DESCRIPTOR);
}

/// Fetches a runtime service a built-in command depends on.
pub(crate) fn require<T: Send + Sync + 'static>(ctx: &CommandContext) -> Result<Arc<T>, BoxError> {
    ctx.service::<T>()
        .ok_or_else(|| format!("{} is not available", std::any::type_name::<T>()).into())
}

/// Last segment of a module id: `plugins.greeter` → `greeter`.
pub(crate) fn short_module_name(module_id: &str) -> &str {
    module_id.rsplit('.').next().unwrap_or(module_id)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures for exercising built-in commands through a real dispatcher.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use haruka_core::{
        BoxedStore, MessageEvent, RetryExecutor, SentMessage, Transport, TransportResult,
    };
    use haruka_framework::{
        DispatchConfig, DispatchOutcome, Dispatcher, ListenerRegistry, Loader, ModuleCatalog,
        Registry, Services,
    };
    use haruka_store::{SqliteStore, SqliteStoreOptions};

    /// Keeps the text of every send and edit.
    #[derive(Default)]
    pub struct TextTransport {
        pub texts: Mutex<Vec<String>>,
        next_id: AtomicI64,
    }

    #[async_trait]
    impl Transport for TextTransport {
        fn self_id(&self) -> i64 {
            1
        }

        async fn send(&self, chat_id: i64, text: &str, _reply_to: Option<i64>) -> TransportResult<SentMessage> {
            self.texts.lock().push(text.to_string());
            let message_id = 500 + self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(SentMessage { chat_id, message_id })
        }

        async fn edit(&self, chat_id: i64, message_id: i64, text: &str) -> TransportResult<SentMessage> {
            self.texts.lock().push(text.to_string());
            Ok(SentMessage { chat_id, message_id })
        }

        async fn delete(&self, _chat_id: i64, _message_id: i64) -> TransportResult<()> {
            Ok(())
        }
    }

    impl TextTransport {
        pub fn last(&self) -> String {
            self.texts.lock().last().cloned().unwrap_or_default()
        }
    }

    pub struct Harness {
        pub dir: tempfile::TempDir,
        pub transport: Arc<TextTransport>,
        pub loader: Arc<Loader>,
        pub dispatcher: Dispatcher,
        pub services: Arc<Services>,
    }

    impl Harness {
        /// Loads the system modules; `plugins` are `(name, manifest)` pairs
        /// written before loading.
        pub async fn new(plugins: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let plugins_dir = dir.path().join("plugins");
            std::fs::create_dir_all(&plugins_dir).unwrap();
            for (name, body) in plugins {
                std::fs::write(plugins_dir.join(format!("{name}.toml")), body).unwrap();
            }

            let catalog = Arc::new(ModuleCatalog::new());
            super::register_all(&catalog);
            let registry = Arc::new(Registry::default());
            let listeners = Arc::new(ListenerRegistry::new());
            let loader = Arc::new(Loader::new(
                Arc::clone(&registry),
                Arc::clone(&listeners),
                catalog,
                plugins_dir,
            ));
            let report = loader.load_all().await;
            assert!(report.failed.is_empty(), "{:?}", report.failed);

            let services = Arc::new(Services::new());
            services.insert(Arc::clone(&loader));

            let store: BoxedStore = Arc::new(
                SqliteStore::open(SqliteStoreOptions::new(":memory:"))
                    .await
                    .unwrap(),
            );
            let transport = Arc::new(TextTransport::default());
            let dispatcher = Dispatcher::builder(registry, transport.clone(), store)
                .listeners(listeners)
                .services(Arc::clone(&services))
                .retry(RetryExecutor::default())
                .config(DispatchConfig {
                    cooldown: std::time::Duration::ZERO,
                    ..DispatchConfig::default()
                })
                .build();

            Self {
                dir,
                transport,
                loader,
                dispatcher,
                services,
            }
        }

        /// Dispatches `text` as the account's own message in chat 10.
        pub async fn run(&self, text: &str) -> DispatchOutcome {
            self.dispatcher
                .dispatch(MessageEvent::new(10, 1, 42, text, true))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_module_name() {
        assert_eq!(short_module_name("plugins.greeter"), "greeter");
        assert_eq!(short_module_name("system.help"), "help");
        assert_eq!(short_module_name("bare"), "bare");
    }

    #[test]
    fn test_catalog_contents() {
        let catalog = ModuleCatalog::new();
        register_all(&catalog);
        let system: Vec<_> = catalog.system().iter().map(|d| d.name).collect();
        assert_eq!(system, vec!["help", "info", "packages"]);
        assert_eq!(catalog.all().len(), 5);
    }
}
