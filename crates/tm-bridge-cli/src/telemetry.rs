//! Stderr logging for the bridge.
//!
//! stdout carries only the JSON response, so every event goes to stderr.
//! The bridge runs once per request under a parent process that captures
//! stderr, so lines carry no timestamps or colour.

use std::io;

use once_cell::sync::OnceCell;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, fmt};

use tm_bridge_config::{Config, LogFormat};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Errors encountered while installing the stderr logger.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TelemetryError {
    /// The configured filter is not a valid `EnvFilter` directive.
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        /// Filter text as configured.
        filter: String,
        /// Parser failure.
        #[source]
        source: ParseError,
    },
    /// Another global subscriber is already installed.
    #[error("failed to install the stderr logger: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the stderr logger once per process; later calls are no-ops.
pub(crate) fn initialise(config: &Config) -> Result<(), TelemetryError> {
    INSTALLED.get_or_try_init(|| install(config)).map(|_| ())
}

fn install(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter()).map_err(|source| {
        TelemetryError::Filter {
            filter: config.log_filter().to_owned(),
            source,
        }
    })?;
    let stderr = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .without_time();

    match config.log_format() {
        LogFormat::Json => set_global_default(stderr.json().flatten_event(true).finish()),
        LogFormat::Compact => set_global_default(stderr.compact().finish()),
    }
    .map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_filter_is_rejected_before_installing() {
        let config = Config {
            log_filter: String::from("tm_bridge=loudest"),
            ..Config::default()
        };
        let error = install(&config).expect_err("filter rejected");
        assert!(
            error.to_string().starts_with("invalid log filter 'tm_bridge=loudest'"),
            "{error}"
        );
    }
}
