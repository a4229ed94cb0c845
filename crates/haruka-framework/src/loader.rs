//! Loading, reloading and unloading modules at runtime.
//!
//! A *source id* names where a module comes from:
//!
//! - `builtin:<name>`: a system descriptor in the catalog, module id
//!   `system.<name>`.
//! - a bare name such as `greeter`: `<plugins_dir>/greeter.toml`, module id
//!   `plugins.greeter`.
//! - a path ending in `.toml`: that manifest, module id `plugins.<stem>`.
//!
//! Loading is success-gated. The manifest is read, the factory runs and the
//! command set is validated before the registry is touched; any failure up to
//! that point leaves the previously loaded version fully in place. Only then
//! does the registry swap the old commands for the new ones in one step.
//!
//! ```rust,ignore
//! let report = loader.load("greeter").await;
//! if !report.success {
//!     warn!("{}", report.detail);
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::command::CommandMeta;
use crate::error::{LoadError, RegistryError};
use crate::listener::ListenerRegistry;
use crate::module::{ModuleCatalog, ModuleDescriptor, ModuleInstance, ModuleManifest, SetupContext, Trust};
use crate::registry::Registry;

const BUILTIN_PREFIX: &str = "builtin:";
const MANIFEST_EXT: &str = "toml";

/// Outcome of one load attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source: String,
    pub success: bool,
    /// Human-readable summary or failure reason.
    pub detail: String,
    pub module_id: Option<String>,
}

/// Outcome of [`Loader::load_all`].
#[derive(Debug, Clone, Default)]
pub struct BulkLoadReport {
    pub loaded: Vec<LoadReport>,
    pub skipped: Vec<LoadReport>,
    pub failed: Vec<LoadReport>,
}

impl BulkLoadReport {
    pub fn total(&self) -> usize {
        self.loaded.len() + self.skipped.len() + self.failed.len()
    }
}

/// A resolved source.
struct Resolved {
    module_id: String,
    descriptor: ModuleDescriptor,
    manifest: ModuleManifest,
    path: Option<PathBuf>,
}

/// What a successful load did.
struct Loaded {
    module_id: String,
    version: u64,
    commands: usize,
    conflicts: usize,
    listeners: usize,
    hook_error: Option<String>,
}

/// Loads modules from the catalog and the plugins directory.
#[derive(Debug)]
pub struct Loader {
    registry: Arc<Registry>,
    listeners: Arc<ListenerRegistry>,
    catalog: Arc<ModuleCatalog>,
    plugins_dir: PathBuf,
}

impl Loader {
    pub fn new(
        registry: Arc<Registry>,
        listeners: Arc<ListenerRegistry>,
        catalog: Arc<ModuleCatalog>,
        plugins_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            listeners,
            catalog,
            plugins_dir: plugins_dir.into(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Maps a source id to the module id it would load as.
    pub fn module_id_for(&self, source: &str) -> Option<String> {
        if let Some(name) = source.strip_prefix(BUILTIN_PREFIX) {
            return (!name.is_empty()).then(|| format!("system.{name}"));
        }
        let path = self.manifest_path(source);
        let stem = path.file_stem()?.to_str()?;
        Some(format!("plugins.{stem}"))
    }

    /// Manifest path for a user source id.
    pub fn manifest_path(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        if path.extension().is_some_and(|e| e == MANIFEST_EXT) {
            if path.is_absolute() || path.starts_with(&self.plugins_dir) {
                path.to_path_buf()
            } else {
                self.plugins_dir.join(path)
            }
        } else {
            self.plugins_dir.join(format!("{source}.{MANIFEST_EXT}"))
        }
    }

    /// Loads (or reloads) one module.
    ///
    /// Never panics and never leaves the registry half-updated: on failure
    /// the previous version keeps serving.
    pub async fn load(&self, source: &str) -> LoadReport {
        let result = self.try_load(source).await;
        self.report(source, result)
    }

    fn report(&self, source: &str, result: Result<Loaded, LoadError>) -> LoadReport {
        match result {
            Ok(loaded) => {
                let mut detail = format!(
                    "loaded {} v{} ({} commands",
                    loaded.module_id, loaded.version, loaded.commands
                );
                if loaded.listeners > 0 {
                    detail.push_str(&format!(", {} listeners", loaded.listeners));
                }
                if loaded.conflicts > 0 {
                    detail.push_str(&format!(", {} triggers taken over", loaded.conflicts));
                }
                detail.push(')');
                if let Some(e) = &loaded.hook_error {
                    detail.push_str(&format!("; setup hook failed: {e}"));
                }
                info!(source, module = %loaded.module_id, version = loaded.version, "Module loaded");
                LoadReport {
                    source: source.to_string(),
                    success: true,
                    detail,
                    module_id: Some(loaded.module_id),
                }
            }
            Err(e) => {
                if e.is_skip() {
                    debug!(source, reason = %e, "Module skipped");
                } else {
                    error!(source, error = %e, "Module load failed");
                }
                LoadReport {
                    source: source.to_string(),
                    success: false,
                    detail: e.to_string(),
                    module_id: self.module_id_for(source),
                }
            }
        }
    }

    /// Alias of [`load`](Self::load); reloading is loading over the top.
    pub async fn reload(&self, source: &str) -> LoadReport {
        self.load(source).await
    }

    /// Removes a module's commands and listeners.
    pub async fn unload(&self, module_id: &str) -> Result<bool, RegistryError> {
        let removed = self.registry.unregister(module_id).await?;
        let listeners = self.listeners.remove(module_id);
        if removed || listeners > 0 {
            info!(module = %module_id, listeners, "Module unloaded");
        }
        Ok(removed || listeners > 0)
    }

    /// Loads every system module, then every manifest in the plugins
    /// directory.
    ///
    /// A failure is recorded and loading continues with the next source.
    pub async fn load_all(&self) -> BulkLoadReport {
        let mut sources: Vec<String> = self
            .catalog
            .system()
            .iter()
            .map(|d| format!("{BUILTIN_PREFIX}{}", d.name))
            .collect();

        match self.discover().await {
            Ok(found) => sources.extend(found),
            Err(e) => error!(dir = %self.plugins_dir.display(), error = %e, "Plugin discovery failed"),
        }

        let mut report = BulkLoadReport::default();
        for source in sources {
            let result = self.try_load(&source).await;
            let skipped = result.as_ref().is_err_and(LoadError::is_skip);
            let r = self.report(&source, result);
            if r.success {
                report.loaded.push(r);
            } else if skipped {
                report.skipped.push(r);
            } else {
                report.failed.push(r);
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Module load pass finished"
        );
        for f in &report.failed {
            warn!(source = %f.source, reason = %f.detail, "Module not loaded");
        }
        report
    }

    /// Lists manifest files in the plugins directory, sorted by name.
    ///
    /// Creates the directory when it does not exist. Names starting with `.`
    /// or `_` are ignored.
    pub async fn discover(&self) -> Result<Vec<String>, LoadError> {
        let dir = &self.plugins_dir;
        let io_err = |e: std::io::Error| LoadError::Io {
            path: dir.clone(),
            reason: e.to_string(),
        };

        if !tokio::fs::try_exists(dir).await.map_err(io_err)? {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
            debug!(dir = %dir.display(), "Created plugins directory");
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            if path.extension().is_some_and(|e| e == MANIFEST_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    // ─── internals ────────────────────────────────────────────────────────────

    async fn resolve(&self, source: &str) -> Result<Resolved, LoadError> {
        if let Some(name) = source.strip_prefix(BUILTIN_PREFIX) {
            let descriptor = self
                .catalog
                .get(name)
                .filter(|d| d.trust == Trust::System)
                .ok_or_else(|| LoadError::SourceNotFound(source.to_string()))?;
            return Ok(Resolved {
                module_id: format!("system.{name}"),
                descriptor,
                manifest: ModuleManifest::for_kind(name),
                path: None,
            });
        }

        let path = self.manifest_path(source);
        let module_id = self
            .module_id_for(source)
            .ok_or_else(|| LoadError::SourceNotFound(source.to_string()))?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoadError::SourceNotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(LoadError::Io {
                    path,
                    reason: e.to_string(),
                });
            }
        };
        let manifest = ModuleManifest::from_toml(&text).map_err(|e| LoadError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if !manifest.enabled {
            return Err(LoadError::Disabled(module_id));
        }
        let descriptor = self
            .catalog
            .get(&manifest.kind)
            .ok_or_else(|| LoadError::UnknownKind(manifest.kind.clone()))?;

        Ok(Resolved {
            module_id,
            descriptor,
            manifest,
            path: Some(path),
        })
    }

    async fn try_load(&self, source: &str) -> Result<Loaded, LoadError> {
        let Resolved {
            module_id,
            descriptor,
            manifest,
            path,
        } = self.resolve(source).await?;

        // Factories are user code: run them off the async workers and treat a
        // panic as an ordinary load failure.
        let factory_manifest = manifest.clone();
        let definition = tokio::task::spawn_blocking(move || descriptor.instantiate(&factory_manifest))
            .await
            .map_err(|e| LoadError::SetupPanicked(e.to_string()))?
            .map_err(|e| LoadError::Setup(e.to_string()))?;

        let (commands, hook) = definition.into_parts();
        let commands = apply_manifest(commands, &manifest);
        let commands = Registry::validate(&module_id, commands)?;

        let mut instance = ModuleInstance::new(&module_id, descriptor.name, descriptor.trust);
        if let Some(path) = path {
            instance = instance.with_source(path);
        }
        let instance = Arc::new(instance);
        let version = instance.version();
        let command_count = commands.len();

        let report = self.registry.register_instance(instance, commands).await?;

        // Commands are live from here on; the hook can only add listeners.
        let setup = Arc::new(SetupContext::new(&module_id, manifest.config.clone()));
        let hook_error = match hook {
            Some(hook) => hook.run(Arc::clone(&setup)).await.err().map(|e| {
                warn!(module = %module_id, error = %e, "Setup hook failed, commands stay registered");
                e.to_string()
            }),
            None => None,
        };
        let listeners = setup.take_listeners();
        let listener_count = listeners.len();
        self.listeners.replace(&module_id, listeners);

        Ok(Loaded {
            module_id,
            version,
            commands: command_count,
            conflicts: report.conflicts.len(),
            listeners: listener_count,
            hook_error,
        })
    }
}

/// Applies manifest alias and permission overrides.
fn apply_manifest(mut commands: Vec<CommandMeta>, manifest: &ModuleManifest) -> Vec<CommandMeta> {
    for cmd in &mut commands {
        let name = cmd.name().trim().to_lowercase();
        if let Some(extra) = manifest.aliases.get(&name) {
            cmd.aliases_mut().extend(extra.iter().cloned());
        }
        if manifest
            .allow_external
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&name))
        {
            cmd.flags_mut().allow_external = true;
        }
    }
    commands
}
