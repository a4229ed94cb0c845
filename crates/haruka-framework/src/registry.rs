//! The live command table.
//!
//! [`Registry`] maps case-folded triggers to the [`CommandMeta`] that handles
//! them and tracks which triggers each module owns.
//!
//! # Concurrency
//!
//! Readers never block writers for long: the table is an immutable
//! [`DispatchTable`] behind an `Arc`, and a lookup only clones that `Arc`.
//! Mutations are serialized by an async lock acquired with a timeout; each
//! builds a new table from the current one and swaps it in, so a reader
//! sees either the complete old table or the complete new one.
//!
//! # Ownership
//!
//! A trigger belongs to the module that registered it last. Unregistering a
//! module removes only triggers it still owns, so unloading a module whose
//! trigger was taken over by another module leaves the other module intact.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::command::CommandMeta;
use crate::error::RegistryError;
use crate::module::{ModuleInstance, Trust};

/// Default bound on waiting for the registry lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// DispatchTable
// =============================================================================

/// A registered module and the triggers it currently owns.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub instance: Arc<ModuleInstance>,
    pub triggers: BTreeSet<String>,
    /// Commands in registration order.
    pub commands: Vec<Arc<CommandMeta>>,
}

/// Immutable snapshot of the registry.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    commands: HashMap<String, Arc<CommandMeta>>,
    modules: BTreeMap<String, ModuleRecord>,
}

impl DispatchTable {
    /// Looks up an already case-folded trigger.
    pub fn lookup(&self, trigger: &str) -> Option<&Arc<CommandMeta>> {
        self.commands.get(trigger)
    }

    pub fn module(&self, id: &str) -> Option<&ModuleRecord> {
        self.modules.get(id)
    }

    /// Registered modules, sorted by id.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.values()
    }

    /// Number of live triggers.
    pub fn trigger_count(&self) -> usize {
        self.commands.len()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Removes every trigger `module_id` still owns, plus its record.
    fn remove_module(&mut self, module_id: &str) -> Option<ModuleRecord> {
        let record = self.modules.remove(module_id)?;
        for trigger in &record.triggers {
            if self
                .commands
                .get(trigger)
                .is_some_and(|m| m.module_name() == module_id)
            {
                self.commands.remove(trigger);
            }
        }
        Some(record)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// A trigger that moved from one module to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConflict {
    pub trigger: String,
    pub previous_owner: String,
    pub new_owner: String,
}

/// Outcome of a successful [`Registry::register`].
#[derive(Debug, Clone, Default)]
pub struct RegisterReport {
    pub module_id: String,
    /// Number of triggers now owned by the module.
    pub triggers: usize,
    /// Version of the instance this registration replaced, if any.
    pub replaced_version: Option<u64>,
    pub conflicts: Vec<TriggerConflict>,
}

/// The concurrent command registry.
#[derive(Debug)]
pub struct Registry {
    table: RwLock<Arc<DispatchTable>>,
    write_lock: Mutex<()>,
    lock_timeout: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl Registry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            table: RwLock::new(Arc::new(DispatchTable::default())),
            write_lock: Mutex::new(()),
            lock_timeout,
        }
    }

    /// Returns the current table.
    pub fn snapshot(&self) -> Arc<DispatchTable> {
        Arc::clone(&self.table.read())
    }

    /// Looks up `trigger`, case-insensitively.
    pub fn lookup(&self, trigger: &str) -> Option<Arc<CommandMeta>> {
        self.snapshot().lookup(&trigger.to_lowercase()).cloned()
    }

    /// Checks a module id and command set without touching the table.
    ///
    /// Returns the commands normalized for registration: triggers
    /// case-folded, owner stamped.
    pub fn validate(
        module_id: &str,
        commands: Vec<CommandMeta>,
    ) -> Result<Vec<CommandMeta>, RegistryError> {
        if module_id.trim().is_empty() {
            return Err(RegistryError::validation("module id must not be empty"));
        }
        commands
            .into_iter()
            .map(|cmd| {
                let cmd = cmd.normalized(module_id);
                for trigger in cmd.triggers() {
                    if trigger.is_empty() {
                        return Err(RegistryError::validation(format!(
                            "module '{module_id}' has a command with an empty name or alias"
                        )));
                    }
                    if trigger.chars().any(char::is_whitespace) {
                        return Err(RegistryError::validation(format!(
                            "trigger '{trigger}' in module '{module_id}' contains whitespace"
                        )));
                    }
                }
                Ok(cmd)
            })
            .collect()
    }

    /// Registers `commands` under a bare module id.
    ///
    /// Shorthand for [`register_instance`](Self::register_instance) with a
    /// new system-trust instance.
    pub async fn register(
        &self,
        module_id: &str,
        commands: Vec<CommandMeta>,
    ) -> Result<RegisterReport, RegistryError> {
        let instance = Arc::new(ModuleInstance::new(module_id, module_id, Trust::System));
        self.register_instance(instance, commands).await
    }

    /// Registers `commands` for `instance`, replacing whatever the module
    /// registered before.
    ///
    /// The old triggers are removed and the new ones inserted in a single
    /// swap, so no reader ever sees the module half-registered. A trigger
    /// owned by another module is taken over and reported as a conflict.
    pub async fn register_instance(
        &self,
        instance: Arc<ModuleInstance>,
        commands: Vec<CommandMeta>,
    ) -> Result<RegisterReport, RegistryError> {
        let module_id = instance.id().to_string();
        let commands = Self::validate(&module_id, commands)?;
        let _guard = self.acquire(&module_id).await?;

        let mut next = DispatchTable::clone(&self.snapshot());
        let replaced_version = next
            .remove_module(&module_id)
            .map(|old| old.instance.version());

        let mut record = ModuleRecord {
            instance,
            triggers: BTreeSet::new(),
            commands: Vec::with_capacity(commands.len()),
        };
        let mut conflicts = Vec::new();

        for cmd in commands {
            let cmd = Arc::new(cmd);
            for trigger in cmd.triggers() {
                if let Some(prev) = next.commands.get(trigger) {
                    if prev.module_name() == module_id {
                        debug!(module = %module_id, trigger, "Trigger repeated within module, last wins");
                    } else {
                        let previous_owner = prev.module_name().to_string();
                        if let Some(owner) = next.modules.get_mut(&previous_owner) {
                            owner.triggers.remove(trigger);
                        }
                        conflicts.push(TriggerConflict {
                            trigger: trigger.to_string(),
                            previous_owner,
                            new_owner: module_id.clone(),
                        });
                    }
                }
                next.commands.insert(trigger.to_string(), Arc::clone(&cmd));
                record.triggers.insert(trigger.to_string());
            }
            record.commands.push(cmd);
        }

        for c in &conflicts {
            warn!(
                trigger = %c.trigger,
                previous_owner = %c.previous_owner,
                new_owner = %c.new_owner,
                "Trigger conflict, new registration takes over"
            );
        }

        let report = RegisterReport {
            module_id: module_id.clone(),
            triggers: record.triggers.len(),
            replaced_version,
            conflicts,
        };
        next.modules.insert(module_id.clone(), record);
        *self.table.write() = Arc::new(next);

        info!(
            module = %module_id,
            triggers = report.triggers,
            replaced = report.replaced_version.is_some(),
            "Module registered"
        );
        Ok(report)
    }

    /// Removes every trigger `module_id` still owns.
    ///
    /// Returns `Ok(false)` if the module was not registered.
    pub async fn unregister(&self, module_id: &str) -> Result<bool, RegistryError> {
        if module_id.trim().is_empty() {
            return Err(RegistryError::validation("module id must not be empty"));
        }
        let _guard = self.acquire(module_id).await?;

        let mut next = DispatchTable::clone(&self.snapshot());
        let Some(record) = next.remove_module(module_id) else {
            debug!(module = %module_id, "Unregister of unknown module ignored");
            return Ok(false);
        };
        *self.table.write() = Arc::new(next);

        info!(module = %module_id, triggers = record.triggers.len(), "Module unregistered");
        Ok(true)
    }

    async fn acquire(&self, module_id: &str) -> Result<MutexGuard<'_, ()>, RegistryError> {
        match tokio::time::timeout(self.lock_timeout, self.write_lock.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                error!(
                    module = %module_id,
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Registry lock not acquired in time, mutation refused"
                );
                Err(RegistryError::LockTimeout(self.lock_timeout))
            }
        }
    }
}
