//! Tracing initialization with configurable logging formats.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Crates whose logs are kept at `warn` unless asked for explicitly.
const QUIET_TARGETS: &str = "regex=warn";

/// Initialize the global tracing subscriber.
///
/// Logs are written to stderr. Calling this twice fails with
/// [`TracingError::Init`].
pub fn init_tracing(logging: &LoggingConfig) -> Result<(), TracingError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_env_filter(logging, rust_log.as_deref());

    let registry = tracing_subscriber::registry().with(filter);
    let result = match (logging.format, logging.timestamps) {
        (LogFormat::Pretty, true) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line),
            )
            .try_init(),
        (LogFormat::Pretty, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line)
                    .without_time(),
            )
            .try_init(),
        (LogFormat::Compact, true) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line),
            )
            .try_init(),
        (LogFormat::Compact, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line)
                    .without_time(),
            )
            .try_init(),
        (LogFormat::Json, true) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line),
            )
            .try_init(),
        (LogFormat::Json, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(logging.file_line)
                    .with_line_number(logging.file_line)
                    .without_time(),
            )
            .try_init(),
    };

    result.map_err(|e| TracingError::Init(e.to_string()))
}

/// Build the log filter.
///
/// `RUST_LOG` wins over the configured level and filter directives. Invalid
/// directives fall back to the configured level alone.
fn build_env_filter(config: &LoggingConfig, rust_log: Option<&str>) -> EnvFilter {
    let base_level = config.level.as_str();
    let directives = filter_directives(config, rust_log);
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(base_level))
}

fn filter_directives(config: &LoggingConfig, rust_log: Option<&str>) -> String {
    let base_level = config.level.as_str();
    match (rust_log, &config.filter) {
        (Some(env), _) => env.to_string(),
        (None, Some(filter)) => format!("{base_level},{filter}"),
        (None, None) => format!("{base_level},{QUIET_TARGETS}"),
    }
}

/// Errors during tracing initialization.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}
