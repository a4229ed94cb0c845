//! Module definitions, descriptors and manifests.
//!
//! A module is a named bundle of commands plus an optional setup hook. Code
//! for each module kind is compiled in and listed in a [`ModuleCatalog`] as a
//! [`ModuleDescriptor`]; a TOML manifest picks a kind and tunes it:
//!
//! ```toml
//! # plugins/greeter.toml  →  module id "plugins.greeter"
//! kind = "echo"
//! enabled = true
//! allow_external = ["echo"]
//!
//! [aliases]
//! echo = ["say"]
//!
//! [config]
//! greeting = "hi"
//! ```
//!
//! The descriptor's factory builds a fresh [`ModuleDefinition`] every time the
//! module is (re)loaded, so module state never survives a reload.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::BoxError;
use tracing::warn;

use crate::command::CommandMeta;
use crate::listener::Listener;

// ─── Trust ────────────────────────────────────────────────────────────────────

/// Where a module comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trust {
    /// Shipped with the router; loaded first, id `system.<name>`.
    System,
    /// Enabled through a manifest in the plugins directory.
    User,
}

// ─── Manifest ─────────────────────────────────────────────────────────────────

/// Parsed module manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Catalog name of the module kind to instantiate.
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Extra aliases per command name.
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Commands that non-owners may invoke.
    #[serde(default)]
    pub allow_external: Vec<String>,
    /// Free-form settings handed to the factory.
    #[serde(default = "default_config")]
    pub config: Value,
}

fn default_enabled() -> bool {
    true
}

fn default_config() -> Value {
    Value::Object(Default::default())
}

impl ModuleManifest {
    /// A manifest with defaults for `kind`.
    pub fn for_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            description: None,
            aliases: BTreeMap::new(),
            allow_external: Vec::new(),
            config: default_config(),
        }
    }

    /// Parses a TOML manifest.
    pub fn from_toml(text: &str) -> Result<Self, figment::Error> {
        use figment::Figment;
        use figment::providers::{Format, Toml};

        Figment::from(Toml::string(text)).extract()
    }

    /// Deserializes the `[config]` table into `T`, falling back to
    /// `T::default()` when the table is absent or malformed.
    pub fn config<T: DeserializeOwned + Default>(&self) -> T {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }
}

// ─── Setup hook ───────────────────────────────────────────────────────────────

/// Context given to a module's setup hook.
///
/// Listeners added here are installed only after the hook returns, replacing
/// the listeners of the module's previous version.
pub struct SetupContext {
    module_id: String,
    config: Arc<Value>,
    staged: Mutex<Vec<Listener>>,
}

impl SetupContext {
    pub(crate) fn new(module_id: &str, config: Value) -> Self {
        Self {
            module_id: module_id.to_string(),
            config: Arc::new(config),
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The manifest's `[config]` table.
    pub fn config(&self) -> &Arc<Value> {
        &self.config
    }

    /// Adds a passive listener owned by this module.
    pub fn add_listener(&self, listener: Listener) {
        self.staged.lock().push(listener);
    }

    pub(crate) fn take_listeners(&self) -> Vec<Listener> {
        std::mem::take(&mut *self.staged.lock())
    }
}

impl fmt::Debug for SetupContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupContext")
            .field("module_id", &self.module_id)
            .field("listeners", &self.staged.lock().len())
            .finish()
    }
}

type ImmediateHook = Box<dyn FnOnce(&SetupContext) -> Result<(), BoxError> + Send>;
type SuspendingHook =
    Box<dyn FnOnce(Arc<SetupContext>) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Post-registration hook; either form is accepted.
pub enum SetupHook {
    /// Runs to completion without yielding.
    Immediate(ImmediateHook),
    /// Awaited by the loader.
    Suspending(SuspendingHook),
}

impl SetupHook {
    pub(crate) async fn run(self, ctx: Arc<SetupContext>) -> Result<(), BoxError> {
        match self {
            Self::Immediate(hook) => hook(&ctx),
            Self::Suspending(hook) => hook(ctx).await,
        }
    }
}

impl fmt::Debug for SetupHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(_) => f.write_str("SetupHook::Immediate"),
            Self::Suspending(_) => f.write_str("SetupHook::Suspending"),
        }
    }
}

// ─── Definition ───────────────────────────────────────────────────────────────

/// What a module factory produces: ordered commands plus an optional hook.
#[derive(Debug, Default)]
pub struct ModuleDefinition {
    commands: Vec<CommandMeta>,
    setup: Option<SetupHook>,
}

impl ModuleDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command. Registration order is kept.
    pub fn command(mut self, command: CommandMeta) -> Self {
        self.commands.push(command);
        self
    }

    /// Sets a synchronous setup hook.
    pub fn on_setup<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&SetupContext) -> Result<(), BoxError> + Send + 'static,
    {
        self.setup = Some(SetupHook::Immediate(Box::new(hook)));
        self
    }

    /// Sets an asynchronous setup hook.
    pub fn on_setup_async<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Arc<SetupContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.setup = Some(SetupHook::Suspending(Box::new(move |ctx| {
            Box::pin(hook(ctx))
        })));
        self
    }

    pub fn commands(&self) -> &[CommandMeta] {
        &self.commands
    }

    pub(crate) fn into_parts(self) -> (Vec<CommandMeta>, Option<SetupHook>) {
        (self.commands, self.setup)
    }
}

// ─── Descriptor & catalog ─────────────────────────────────────────────────────

/// A static, `Copy` handle that names and instantiates a module kind.
#[derive(Debug, Clone, Copy)]
pub struct ModuleDescriptor {
    /// Catalog key; also the `<name>` in `system.<name>`.
    pub name: &'static str,
    pub trust: Trust,
    /// One-line summary for listings.
    pub summary: &'static str,
    /// Builds a fresh definition. Runs on a blocking thread.
    pub create: fn(&ModuleManifest) -> Result<ModuleDefinition, BoxError>,
}

impl ModuleDescriptor {
    #[inline]
    pub fn instantiate(&self, manifest: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
        (self.create)(manifest)
    }
}

/// All module kinds compiled into the binary.
#[derive(Debug, Default)]
pub struct ModuleCatalog {
    descriptors: RwLock<BTreeMap<&'static str, ModuleDescriptor>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor. A second descriptor with the same name replaces the
    /// first.
    pub fn register(&self, descriptor: ModuleDescriptor) -> &Self {
        if let Some(prev) = self.descriptors.write().insert(descriptor.name, descriptor) {
            warn!(kind = prev.name, "Duplicate module kind, last registration wins");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<ModuleDescriptor> {
        self.descriptors.read().get(name).copied()
    }

    /// System descriptors, sorted by name.
    pub fn system(&self) -> Vec<ModuleDescriptor> {
        self.descriptors
            .read()
            .values()
            .filter(|d| d.trust == Trust::System)
            .copied()
            .collect()
    }

    /// Every descriptor, sorted by name.
    pub fn all(&self) -> Vec<ModuleDescriptor> {
        self.descriptors.read().values().copied().collect()
    }
}

// ─── Instance ─────────────────────────────────────────────────────────────────

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// One loaded version of a module.
///
/// Each load creates a new instance with a fresh, process-unique version;
/// nothing carries over from the previous one.
#[derive(Debug)]
pub struct ModuleInstance {
    id: String,
    kind: String,
    trust: Trust,
    version: u64,
    source: Option<PathBuf>,
    loaded_at: Instant,
}

impl ModuleInstance {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, trust: Trust) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            trust,
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            source: None,
            loaded_at: Instant::now(),
        }
    }

    pub fn with_source(mut self, path: PathBuf) -> Self {
        self.source = Some(path);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn trust(&self) -> Trust {
        self.trust
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Manifest file this instance was loaded from, if any.
    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }
}
