use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly named config file is missing. Searched files are optional.
    #[error("config file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    #[error("config files with extension {0:?} are not supported in this build")]
    UnsupportedFormat(String),

    /// A layer has the wrong shape for [`HarukaConfig`](super::HarukaConfig).
    #[error("cannot read configuration: {0}")]
    Extract(#[from] Box<figment::Error>),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }

    /// The dotted setting a validation failure refers to.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
