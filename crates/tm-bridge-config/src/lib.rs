//! Shared configuration for the tm bridge.
//!
//! Configuration is layered by `ortho_config`: defaults, then the optional
//! configuration file, then `TM_`-prefixed environment variables, then the
//! leading command-line flags. Logging settings carry built-in defaults and
//! the backend settings are optional, so an unconfigured bridge still runs
//! `node tm.mjs` from the current directory.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_ENTRYPOINT, DEFAULT_LOG_FILTER, DEFAULT_NODE_BIN, MODULES_ROOT_ENV,
    MODULES_ROOT_FALLBACK_ENV, default_log_filter, default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TM")]
pub struct Config {
    /// Executable used to run the backend entrypoint.
    #[serde(default)]
    pub node_bin: Option<String>,
    /// Backend entrypoint script; relative paths resolve against `repo_root`.
    #[serde(default)]
    pub entrypoint: Option<Utf8PathBuf>,
    /// Repository root used as the backend working directory.
    #[serde(default)]
    pub repo_root: Option<Utf8PathBuf>,
    /// Deadline for a single backend invocation, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// `tracing` filter directive for the bridge's own diagnostics.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for the bridge's own diagnostics.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_bin: None,
            entrypoint: None,
            repo_root: None,
            timeout_secs: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Executable used to run the backend, defaulting to `node`.
    #[must_use]
    pub fn node_bin(&self) -> &str {
        self.node_bin
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_NODE_BIN)
    }

    /// Explicit repository root, when configured.
    #[must_use]
    pub fn repo_root(&self) -> Option<&Utf8Path> {
        self.repo_root.as_deref()
    }

    /// Backend entrypoint resolved against `repo_root`.
    #[must_use]
    pub fn entrypoint_in(&self, repo_root: &Utf8Path) -> Utf8PathBuf {
        match self.entrypoint.as_deref() {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => repo_root.join(path),
            None => repo_root.join(DEFAULT_ENTRYPOINT),
        }
    }

    /// Backend deadline, if one is configured.
    ///
    /// A zero value disables the deadline.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Log filter directive; a blank value falls back to
    /// [`DEFAULT_LOG_FILTER`].
    #[must_use]
    pub fn log_filter(&self) -> &str {
        match self.log_filter.trim() {
            "" => DEFAULT_LOG_FILTER,
            filter => filter,
        }
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
