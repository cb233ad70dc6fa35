/// Executable used to run the backend when none is configured.
pub const DEFAULT_NODE_BIN: &str = "node";

/// Backend entrypoint, relative to the repository root.
pub const DEFAULT_ENTRYPOINT: &str = "tm.mjs";

/// Default log filter expression used by the bridge.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Environment variable consulted first for the default modules root.
pub const MODULES_ROOT_ENV: &str = "TM_MCP_MODULES_ROOT";

/// Environment variable consulted when [`MODULES_ROOT_ENV`] is unset.
pub const MODULES_ROOT_FALLBACK_ENV: &str = "TM_MODULES_ROOT";

/// Default log filter expression used by the bridge.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the bridge.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}
