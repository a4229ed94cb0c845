//! Error types for the Haruka framework.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`Registry`](crate::registry::Registry) mutations.
///
/// Trigger conflicts are not errors; they are reported through
/// [`RegisterReport::conflicts`](crate::registry::RegisterReport::conflicts).
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The module id or a command descriptor is malformed.
    #[error("invalid registration: {0}")]
    Validation(String),

    /// Another mutation held the registry lock past the configured bound.
    #[error("registry busy: lock not acquired within {}ms", .0.as_millis())]
    LockTimeout(Duration),
}

impl RegistryError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Errors that keep a module from loading.
///
/// A load error only ever affects the module being loaded: the previously
/// registered version (if any) and every other module stay untouched.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The source id does not resolve to a file or catalog entry.
    #[error("module source not found: {0}")]
    SourceNotFound(String),

    /// Reading the source failed.
    #[error("failed to read {}: {reason}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        reason: String,
    },

    /// The manifest could not be parsed.
    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest {
        /// Manifest file.
        path: PathBuf,
        /// Parse error.
        reason: String,
    },

    /// The manifest names a module kind the catalog does not know.
    #[error("unknown module kind '{0}'")]
    UnknownKind(String),

    /// The manifest has `enabled = false`.
    #[error("module '{0}' is disabled")]
    Disabled(String),

    /// The module factory returned an error.
    #[error("module setup failed: {0}")]
    Setup(String),

    /// The module factory panicked.
    #[error("module setup panicked: {0}")]
    SetupPanicked(String),

    /// The registry rejected the command set.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LoadError {
    /// Returns `true` for sources that were skipped on purpose rather than
    /// broken.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Disabled(_))
    }
}
