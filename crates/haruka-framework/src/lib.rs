//! # Haruka Framework
//!
//! Command routing with live module reload.
//!
//! - [`Registry`]: the concurrent trigger → command table. Readers work on
//!   immutable snapshots; writers swap whole tables under a bounded lock.
//! - [`Loader`]: turns source ids into loaded modules. Success-gated, so a
//!   broken reload never disturbs the running version.
//! - [`Dispatcher`]: prefix match, lookup, permission, cooldown, then runs
//!   the handler in an isolated task under a timeout.
//! - [`CommandContext`] / [`Responder`]: what handlers see; every outbound
//!   call goes through the retry executor.
//! - [`SessionSet`]: cancellable background work owned by a module.
//!
//! # Example
//!
//! ```rust,ignore
//! use haruka_framework::prelude::*;
//!
//! fn ping(_: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
//!     Ok(ModuleDefinition::new().command(
//!         CommandMeta::new("ping", handler_fn(|ctx: Arc<CommandContext>| async move {
//!             ctx.respond("Pong!").await?;
//!             Ok::<_, BoxError>(())
//!         }))
//!         .alias("p"),
//!     ))
//! }
//! ```

pub mod command;
pub mod context;
pub mod cooldown;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod loader;
pub mod module;
pub mod registry;
pub mod services;
pub mod session;
pub mod split;

pub use command::{CommandFlags, CommandHandler, CommandMeta, handler_fn};
pub use context::{CommandContext, EventContext, Responder, ResponseError};
pub use cooldown::CooldownTracker;
pub use dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher, DispatcherBuilder, IgnoreReason};
pub use error::{LoadError, RegistryError};
pub use listener::{Listener, ListenerRegistry, listener_fn};
pub use loader::{BulkLoadReport, LoadReport, Loader};
pub use module::{
    ModuleCatalog, ModuleDefinition, ModuleDescriptor, ModuleInstance, ModuleManifest,
    SetupContext, SetupHook, Trust,
};
pub use registry::{DispatchTable, ModuleRecord, RegisterReport, Registry, TriggerConflict};
pub use services::{ServiceArc, Services};
pub use session::{SessionHandle, SessionSet};
pub use split::{ParseMiss, ParsedCommand, UnbalancedQuote, parse_command, shell_split, split_args};

pub use tower::BoxError;

/// Prelude for module authors.
pub mod prelude {
    pub use std::sync::Arc;

    pub use tower::BoxError;

    pub use super::command::{CommandMeta, handler_fn};
    pub use super::context::{CommandContext, EventContext};
    pub use super::listener::listener_fn;
    pub use super::module::{ModuleDefinition, ModuleDescriptor, ModuleManifest, SetupContext, Trust};
    pub use super::session::SessionSet;
    pub use haruka_core::KvStoreExt;
}
