//! Checks that run after extraction, before anything is started.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    DispatchSettings, HarukaConfig, LogOutput, LoggingConfig, RetrySettings, StoreSettings,
};

pub fn validate_config(config: &HarukaConfig) -> ConfigResult<()> {
    validate_dispatch(&config.dispatch)?;
    validate_retry(&config.retry)?;
    if config.registry.lock_timeout_ms == 0 {
        return Err(ConfigError::invalid("registry.lock_timeout_ms", "must be greater than 0"));
    }
    validate_store(&config.store)?;
    if config.modules.plugins_dir.as_os_str().is_empty() {
        return Err(ConfigError::invalid("modules.plugins_dir", "must be set"));
    }
    if config.modules.packages_file.as_os_str().is_empty() {
        return Err(ConfigError::invalid("modules.packages_file", "must be set"));
    }
    validate_logging(&config.logging)
}

fn validate_dispatch(dispatch: &DispatchSettings) -> ConfigResult<()> {
    if dispatch.prefixes.is_empty() {
        return Err(ConfigError::invalid("dispatch.prefixes", "at least one prefix is required"));
    }
    for prefix in &dispatch.prefixes {
        if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "dispatch.prefixes",
                format!("{prefix:?} is empty or contains whitespace"),
            ));
        }
    }
    if dispatch.command_timeout_secs == 0 {
        return Err(ConfigError::invalid("dispatch.command_timeout_secs", "must be greater than 0"));
    }
    if dispatch.max_error_len == 0 {
        return Err(ConfigError::invalid("dispatch.max_error_len", "must be greater than 0"));
    }
    if dispatch.event_buffer == 0 {
        return Err(ConfigError::invalid("dispatch.event_buffer", "must hold at least one event"));
    }
    Ok(())
}

fn validate_retry(retry: &RetrySettings) -> ConfigResult<()> {
    if retry.max_wait_secs == 0 {
        return Err(ConfigError::invalid("retry.max_wait_secs", "must be greater than 0"));
    }
    if retry.max_total_wait_secs < retry.max_wait_secs {
        return Err(ConfigError::invalid(
            "retry.max_total_wait_secs",
            format!("must be at least retry.max_wait_secs ({})", retry.max_wait_secs),
        ));
    }
    Ok(())
}

fn validate_store(store: &StoreSettings) -> ConfigResult<()> {
    if store.path.trim().is_empty() {
        return Err(ConfigError::invalid("store.path", "must be set"));
    }
    let zero = [
        ("store.purge_interval_secs", store.purge_interval_secs == 0),
        ("store.max_value_bytes", store.max_value_bytes == 0),
        ("store.acquire_timeout_secs", store.acquire_timeout_secs == 0),
    ];
    if let Some((key, _)) = zero.into_iter().find(|(_, is_zero)| *is_zero) {
        return Err(ConfigError::invalid(key, "must be greater than 0"));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::invalid("logging.file_path", "required when output = \"file\""));
    }
    for target in logging.filters.keys() {
        if target.trim().is_empty() || target.contains('=') || target.contains(',') {
            return Err(ConfigError::invalid(
                "logging.filters",
                format!("{target:?} is not a log target"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&HarukaConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_blank_prefixes() {
        let mut config = HarukaConfig::default();
        config.dispatch.prefixes = vec![String::new()];
        assert!(validate_config(&config).is_err());

        config.dispatch.prefixes = vec!["! ".into()];
        assert!(validate_config(&config).is_err());

        config.dispatch.prefixes.clear();
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.key(), Some("dispatch.prefixes"));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let mut config = HarukaConfig::default();
        config.dispatch.command_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = HarukaConfig::default();
        config.registry.lock_timeout_ms = 0;
        assert_eq!(
            validate_config(&config).unwrap_err().key(),
            Some("registry.lock_timeout_ms")
        );

        let mut config = HarukaConfig::default();
        config.store.acquire_timeout_secs = 0;
        assert_eq!(
            validate_config(&config).unwrap_err().key(),
            Some("store.acquire_timeout_secs")
        );
    }

    #[test]
    fn test_total_wait_below_single_wait() {
        let mut config = HarukaConfig::default();
        config.retry.max_wait_secs = 60;
        config.retry.max_total_wait_secs = 30;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = HarukaConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("haruka.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_filter_target() {
        let mut config = HarukaConfig::default();
        config.logging.filters.insert("sqlx=debug".into(), LogLevel::Warn);
        assert!(validate_config(&config).is_err());
    }
}
