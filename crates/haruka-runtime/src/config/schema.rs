//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use haruka_core::RetryPolicy;
use haruka_framework::DispatchConfig;
use haruka_store::SqliteStoreOptions;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarukaConfig {
    /// Command routing.
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Backoff caps for every outbound call.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Registry writer settings.
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Persistent key-value store.
    #[serde(default)]
    pub store: StoreSettings,

    /// Plugin and package locations.
    #[serde(default)]
    pub modules: ModulesConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Dispatch
// =============================================================================

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Command prefixes; the longest match wins.
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,

    /// Minimum gap between accepted commands of one sender, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Handler deadline in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Reported error text is cut to this many characters.
    #[serde(default = "default_max_error_len")]
    pub max_error_len: usize,

    /// Capacity of the inbound event queue.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long shutdown waits for in-flight handlers, in seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
            cooldown_ms: default_cooldown_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            max_error_len: default_max_error_len(),
            event_buffer: default_event_buffer(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl DispatchSettings {
    /// Converts to the dispatcher's config.
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            prefixes: self.prefixes.clone(),
            cooldown: Duration::from_millis(self.cooldown_ms),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            max_error_len: self.max_error_len,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_prefixes() -> Vec<String> {
    vec![".".to_string()]
}

fn default_cooldown_ms() -> u64 {
    500
}

fn default_command_timeout_secs() -> u64 {
    240
}

fn default_max_error_len() -> usize {
    300
}

fn default_event_buffer() -> usize {
    256
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

// =============================================================================
// Retry
// =============================================================================

/// Retry caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Longest single declared wait accepted, in seconds.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Longest accumulated wait per call, in seconds.
    #[serde(default = "default_max_total_wait_secs")]
    pub max_total_wait_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_wait_secs: default_max_wait_secs(),
            max_total_wait_secs: default_max_total_wait_secs(),
        }
    }
}

impl RetrySettings {
    /// Converts to the core retry policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            max_wait: Duration::from_secs(self.max_wait_secs),
            max_total_wait: Duration::from_secs(self.max_total_wait_secs),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_wait_secs() -> u64 {
    60
}

fn default_max_total_wait_secs() -> u64 {
    180
}

// =============================================================================
// Registry
// =============================================================================

/// Registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Bound on waiting for the registry writer lock, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl RegistrySettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

// =============================================================================
// Store
// =============================================================================

/// Key-value store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Database file, or `:memory:`.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Period of the expired-record purge, in seconds.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,

    /// Largest serialized value accepted.
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,

    /// Bound on waiting for a pooled connection, in seconds.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            purge_interval_secs: default_purge_interval_secs(),
            max_value_bytes: default_max_value_bytes(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl StoreSettings {
    /// Converts to the SQLite store's options.
    pub fn to_options(&self) -> SqliteStoreOptions {
        SqliteStoreOptions {
            path: self.path.clone(),
            max_value_bytes: self.max_value_bytes,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

fn default_store_path() -> String {
    "haruka_data.db".to_string()
}

fn default_purge_interval_secs() -> u64 {
    300
}

fn default_max_value_bytes() -> usize {
    1024 * 1024
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

// =============================================================================
// Modules
// =============================================================================

/// Plugin directory and package index locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directory scanned for module manifests.
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Package index file (`repos` and `installed`).
    #[serde(default = "default_packages_file")]
    pub packages_file: PathBuf,

    /// Request timeout for package downloads, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            packages_file: default_packages_file(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl ModulesConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_packages_file() -> PathBuf {
    PathBuf::from("configs/repos.json")
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines.
    #[cfg(feature = "json-log")]
    Json,
    #[default]
    Compact,
    Full,
    Pretty,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Requires `file_path`.
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for [`LogOutput::File`].
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `haruka_framework = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: BTreeMap::new(),
        }
    }
}
