//! Structured logging setup
//!
//! Installs a `tracing-subscriber` registry with JSON or human-readable
//! output, optionally mirrored into a log file.  Library code only emits
//! `tracing` events; calling [`init_logging`] is left to the application.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{AuthloomError, Result};

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// # Errors
///
/// Returns [`AuthloomError::Config`] when the level directive is invalid,
/// the log file cannot be opened, or a global subscriber is already
/// installed.
///
/// # Examples
///
/// ```no_run
/// use authloom::config::LoggingConfig;
/// use authloom::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "authloom=debug".to_string(),
///     json_format: true,
///     file_path: None,
/// };
///
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level)?;
    let file = config
        .file_path
        .as_deref()
        .map(open_log_file)
        .transpose()?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json_format {
        let file_layer = file.map(|f| {
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(Arc::new(f))
        });
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(file_layer)
            .try_init()
    } else {
        let file_layer = file.map(|f| {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Arc::new(f))
        });
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .with(file_layer)
            .try_init()
    };

    installed.map_err(|e| {
        AuthloomError::Config(format!("failed to install tracing subscriber: {e}")).into()
    })
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AuthloomError::Config(format!("invalid log level '{level}': {e}")).into())
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AuthloomError::Config(format!("cannot open log file {}: {e}", path.display())).into()
        })
}
