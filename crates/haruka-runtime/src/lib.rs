//! Haruka Runtime - orchestration layer for the Haruka command router.
//!
//! This crate provides:
//! - Runtime orchestration (`HarukaRuntime`, `Engine`)
//! - Layered configuration (`HarukaConfig`, `ConfigLoader`)
//! - Logging setup from configuration (`logging::init_from_config`)
//! - The package manager for remote plugin repositories (`RepoManager`)
//! - Built-in modules: `help`, `info`, `packages`, `echo`, `repeat`
//!
//! ```ignore
//! use haruka_runtime::HarukaRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = HarukaRuntime::new();
//!     let (tx, rx) = runtime.event_channel();
//!
//!     // Hand `tx` to whatever receives messages for the account.
//!     spawn_receiver(tx);
//!
//!     // Run until Ctrl+C
//!     runtime.run(transport, rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Startup
//!
//! 1. Configuration is loaded and validated; logging is initialized.
//! 2. The store opens. Failure here stops startup.
//! 3. System modules load, then every manifest in the plugins directory.
//!    A broken manifest is logged and skipped.
//! 4. Events are dispatched, each on its own task, until shutdown.

pub mod builtin;
pub mod config;
pub mod error;
pub mod logging;
pub mod packages;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, HarukaConfig};
pub use error::{FetchError, PackageError, PackageResult, RuntimeError, RuntimeResult};
pub use packages::{HttpSource, PackageIndex, PackageSource, RepoManager};
pub use runtime::{Engine, HarukaRuntime, RuntimeBuilder, RuntimeInfo, wait_for_shutdown};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
