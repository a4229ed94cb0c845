//! Configuration module for the Haruka runtime.
//!
//! Layered loading through figment (defaults, files, `HARUKA_*` environment,
//! programmatic overrides) followed by validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchSettings, HarukaConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ModulesConfig,
    RegistrySettings, RetrySettings, SpanEventConfig, StoreSettings,
};
pub use validation::validate_config;
