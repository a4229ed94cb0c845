//! Runtime error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use haruka_core::{RetryAfter, RetryError, StoreError};

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that stop the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store could not be opened at startup.
    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Package(#[from] PackageError),

    /// Installing a signal handler failed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[source] std::io::Error),

    /// The engine was started twice.
    #[error("Runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failure of a single download attempt.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// HTTP 429; `retry_after` comes from the `Retry-After` header.
    #[error("rate limited, retry after {}s", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    /// Any other non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

impl RetryAfter for FetchError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Package manager errors.
#[derive(Error, Debug)]
pub enum PackageError {
    /// Plugin names are restricted to `[A-Za-z0-9_-]`.
    #[error("invalid plugin name: {0:?}")]
    InvalidName(String),

    #[error("I/O error on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    /// The index file exists but is not valid JSON of the expected shape.
    #[error("corrupt package index {path}: {reason}")]
    Index { path: PathBuf, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The remote kept asking us to back off.
    #[error("download quota exceeded: {0}")]
    Quota(String),

    #[error("no repositories configured")]
    NoRepositories,

    #[error("plugin {0} not found in connected repositories")]
    NotFound(String),

    /// More than one repository offers the plugin.
    #[error("plugin {name} found in several repositories: {}", candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    /// The plugin was not installed from a repository.
    #[error("plugin {0} was installed manually")]
    NotTracked(String),

    /// Written to disk, but the loader rejected it. The file change was
    /// undone.
    #[error("plugin {name} failed to load: {reason}")]
    Load { name: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl PackageError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl From<RetryError<FetchError>> for PackageError {
    fn from(err: RetryError<FetchError>) -> Self {
        match err {
            RetryError::Inner(e) => Self::Fetch(e),
            quota @ RetryError::QuotaExceeded { .. } => Self::Quota(quota.to_string()),
        }
    }
}

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limit_is_retryable() {
        let limited = FetchError::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));

        let status = FetchError::Status {
            url: "https://x".into(),
            status: 500,
        };
        assert_eq!(status.retry_after(), None);
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let err = PackageError::Ambiguous {
            name: "cute".into(),
            candidates: vec!["a/plugins".into(), "b/plugins".into()],
        };
        assert_eq!(
            err.to_string(),
            "plugin cute found in several repositories: a/plugins, b/plugins"
        );
    }
}
