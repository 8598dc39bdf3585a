//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for master and workers
//! - Apply console options (level, timestamps, colors, silent)
//!
//! # Design Decisions
//! - Output goes to stderr: a worker's stdout carries IPC messages
//! - `RUST_LOG` takes precedence over the configured level
//! - Critical events are `error` events carrying `severity = "critical"`

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::BootstrapError;

/// Filter directive for the configured console options.
pub fn filter_directive(config: &LoggingConfig) -> String {
    if config.silent || config.level.eq_ignore_ascii_case("none") {
        "off".to_string()
    } else {
        format!("{},tower_http={}", config.level, config.level)
    }
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<(), BootstrapError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(config)))
        .map_err(|e| BootstrapError::Logging(e.to_string()))?;

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colorize);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.timestamps {
        registry.with(layer).try_init()
    } else {
        registry.with(layer.without_time()).try_init()
    };
    result.map_err(|e| BootstrapError::Logging(e.to_string()))
}
