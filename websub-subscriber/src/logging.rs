//! Logging setup for applications embedding the subscriber
//!
//! The engine only emits `tracing` events. This module installs a
//! `tracing-subscriber` registry for binaries that do not bring their own.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber installed
    Silent,
    /// Compact stderr output for development
    Development,
    /// Verbose diagnostics with source locations
    Debug,
    /// One JSON object per line, for log shippers
    Json,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
}

/// Initialize logging with the specified mode
///
/// Call once, early, before subscriptions are created.
///
/// ```rust,ignore
/// websub_subscriber::logging::init_logging(LoggingMode::Development)?;
/// ```
///
/// # Environment Variables
///
/// - `WEBSUB_LOG_LEVEL`: filter directive overriding the mode's default level,
///   e.g. `debug` or `websub_subscriber::engine=trace`
/// - `RUST_LOG`: used when `WEBSUB_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(fmt::layer().with_target(false).compact())
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Json => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(fmt::layer().json().with_current_span(false))
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Initialize logging from `WEBSUB_LOG_MODE`
///
/// Accepts `development`, `debug` and `json`; anything else is Silent.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("WEBSUB_LOG_MODE").as_deref() {
        Ok("development") => LoggingMode::Development,
        Ok("debug") => LoggingMode::Debug,
        Ok("json") => LoggingMode::Json,
        _ => LoggingMode::Silent,
    };

    init_logging(mode)
}

/// Create an environment filter with fallback to default level
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var("WEBSUB_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter(format!("{directives}: {e}")))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
