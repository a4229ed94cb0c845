//! Installs the global `tracing` subscriber from [`LoggingConfig`].
//!
//! `RUST_LOG`, when set, replaces the configured base level. Per-target
//! filters from `[logging.filters]` are added on top either way, so
//! `sqlx = "warn"` keeps query logs quiet even under `RUST_LOG=debug`.

use std::ffi::OsStr;
use std::path::Path;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

/// Installs the subscriber unless one is already set (tests, an embedding
/// binary), in which case the existing one is kept.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = try_init(config);
}

/// Installs the subscriber, failing if one is already set.
pub fn try_init(config: &LoggingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt_layer(config))
        .with(env_filter(config))
        .try_init()
}

fn fmt_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_writer(make_writer(config))
        .with_span_events(span_events(&config.span_events))
        .with_thread_ids(config.thread_ids)
        .with_file(config.file_location)
        .with_line_number(config.file_location);

    match config.format {
        #[cfg(feature = "json-log")]
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Full => layer.boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

fn make_writer(config: &LoggingConfig) -> BoxMakeWriter {
    match (config.output, &config.file_path) {
        (LogOutput::Stderr, _) => BoxMakeWriter::new(std::io::stderr),
        (LogOutput::File, Some(path)) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file = path.file_name().unwrap_or_else(|| OsStr::new("haruka.log"));
            BoxMakeWriter::new(tracing_appender::rolling::never(dir, file))
        }
        // File output without a path is rejected by validation.
        _ => BoxMakeWriter::new(std::io::stdout),
    }
}

fn span_events(config: &SpanEventConfig) -> FmtSpan {
    [
        (config.new, FmtSpan::NEW),
        (config.enter, FmtSpan::ENTER),
        (config.exit, FmtSpan::EXIT),
        (config.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(on, _)| *on)
    .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
}

/// `target=level` directives for `[logging.filters]`, in key order.
fn directives(config: &LoggingConfig) -> Vec<String> {
    config
        .filters
        .iter()
        .map(|(target, level)| format!("{target}={}", level.as_str()))
        .collect()
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    for directive in directives(config) {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("Ignoring invalid log directive {directive:?}: {e}"),
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_span_events_from_config() {
        assert_eq!(span_events(&SpanEventConfig::default()), FmtSpan::NONE);
        let lifecycle = span_events(&SpanEventConfig {
            new: true,
            enter: false,
            exit: false,
            close: true,
        });
        assert_eq!(lifecycle, FmtSpan::NEW | FmtSpan::CLOSE);
    }

    #[test]
    fn test_filters_become_directives() {
        let mut config = LoggingConfig::default();
        config.level = LogLevel::Warn;
        config.filters.insert("sqlx".into(), LogLevel::Error);
        config.filters.insert("haruka_store".into(), LogLevel::Trace);

        assert_eq!(directives(&config), vec!["haruka_store=trace", "sqlx=error"]);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig::default();
        init_from_config(&config);
        assert!(try_init(&config).is_err());
    }
}
