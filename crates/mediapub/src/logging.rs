//! Global tracing subscriber setup.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("Failed to bridge log records: {0}")]
    LogBridge(String),
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Records emitted through the `log` facade (the database layer) are
/// forwarded to the same subscriber.
pub fn init_logging(level: &str, json: bool) -> Result<(), LoggingError> {
    let default_level: LevelFilter = level
        .parse()
        .map_err(|_| LoggingError::InvalidLevel(level.to_string()))?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let fmt_layer = if json {
        fmt::layer().json().with_current_span(true).with_target(true).boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
    };

    let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::Subscriber(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| LoggingError::LogBridge(e.to_string()))
}

pub fn init_from_config(config: &Config) -> Result<(), LoggingError> {
    init_logging(&config.log_level, config.log_json)
}
