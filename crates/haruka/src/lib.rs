//! # Haruka
//!
//! A command router for a personal chat account ("userbot"): messages that
//! start with a prefix are matched against a live table of commands owned by
//! hot-reloadable modules.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  events  ┌────────────┐  snapshot  ┌──────────┐
//! │ Transport │─────────▶│ Dispatcher │───────────▶│ Registry │◀── Loader (load / reload / unload)
//! └───────────┘          └────────────┘            └──────────┘
//!       ▲                      │ one task per command, bounded by a timeout
//!       │  respond (retried)   ▼
//!       └──────────────── CommandContext ──▶ Services, Store, Sessions
//! ```
//!
//! - **Core**: event model, transport trait, retry executor, store trait
//! - **Framework**: commands, registry, loader, dispatcher, sessions
//! - **Store**: SQLite key-value store with per-record expiry
//! - **Runtime**: configuration, logging, package manager, built-in modules
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use haruka::prelude::*;
//!
//! fn ping(_: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
//!     Ok(ModuleDefinition::new().command(
//!         CommandMeta::new("ping", handler_fn(|ctx: Arc<CommandContext>| async move {
//!             ctx.respond("Pong!").await?;
//!             Ok::<_, BoxError>(())
//!         })),
//!     ))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = HarukaRuntime::new();
//!     runtime.catalog().register(ModuleDescriptor {
//!         name: "ping",
//!         trust: Trust::User,
//!         summary: "Replies with Pong",
//!         create: ping,
//!     });
//!
//!     let (tx, rx) = runtime.event_channel();
//!     // feed `tx` from your transport
//!     runtime.run(transport, rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use haruka_core as core;
pub use haruka_framework as framework;
pub use haruka_runtime as runtime;
pub use haruka_store as store;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use haruka::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use haruka_runtime::{HarukaRuntime, RuntimeInfo};

    // Module system
    pub use haruka_framework::prelude::*;
    pub use haruka_framework::{DispatchOutcome, ModuleCatalog, Responder};

    // Transport and events - for custom transports
    pub use haruka_core::{
        BoxedTransport, MessageEvent, SentMessage, Transport, TransportError, TransportResult,
    };
}
