//! Resolution of the backend's modules root.
//!
//! Sources are consulted in order: the payload's `modules_root`, the CLI
//! `--modules-root` override, `TM_MCP_MODULES_ROOT`, then `TM_MODULES_ROOT`.
//! Empty values are skipped. Absolute values are used as given; relative
//! ones are joined to the repository root with `.` and `..` folded away.
//! The same resolved path is returned on success and reported on failure.

use std::fs;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tm_bridge_config::{MODULES_ROOT_ENV, MODULES_ROOT_FALLBACK_ENV};

use crate::error::{BridgeError, INPUT_EXIT_CODE, codes, error_data};
use crate::payload::{JsonObject, field, json_type_name};

/// Payload key naming the modules root.
pub const MODULES_ROOT_FIELD: &str = "modules_root";

/// Non-payload sources for the modules root, captured once at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulesRootSources {
    /// Value of the CLI `--modules-root` flag.
    pub cli_override: Option<String>,
    /// Value of `TM_MCP_MODULES_ROOT`.
    pub env_primary: Option<String>,
    /// Value of `TM_MODULES_ROOT`.
    pub env_fallback: Option<String>,
}

impl ModulesRootSources {
    /// Captures the environment variables alongside the CLI override.
    #[must_use]
    pub fn from_env(cli_override: Option<String>) -> Self {
        Self {
            cli_override,
            env_primary: std::env::var(MODULES_ROOT_ENV).ok(),
            env_fallback: std::env::var(MODULES_ROOT_FALLBACK_ENV).ok(),
        }
    }
}

/// Resolves the modules root for a request.
///
/// Relative values are resolved against `repo_root`.
///
/// # Errors
///
/// Returns `E_INPUT` when the payload value is not a string,
/// `E_MODULES_ROOT_REQUIRED` when no source supplies a value, and
/// `E_MODULES_ROOT` when the path is missing or not a directory.
pub fn resolve_modules_root(
    payload: &JsonObject,
    sources: &ModulesRootSources,
    repo_root: &Utf8Path,
) -> Result<Utf8PathBuf, BridgeError> {
    let from_payload = match field(payload, MODULES_ROOT_FIELD) {
        None => None,
        Some(Value::String(text)) => Some(text.as_str()),
        Some(other) => {
            return Err(BridgeError::input("modules_root must be a string.")
                .with_data(error_data([("type", Value::from(json_type_name(other)))])));
        }
    };

    let candidate = [
        from_payload,
        sources.cli_override.as_deref(),
        sources.env_primary.as_deref(),
        sources.env_fallback.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|value| !value.is_empty())
    .ok_or_else(|| {
        BridgeError::new(
            codes::MODULES_ROOT_REQUIRED,
            format!(
                "modules_root not provided and {MODULES_ROOT_ENV}/{MODULES_ROOT_FALLBACK_ENV} is not set."
            ),
        )
        .with_exit_code(INPUT_EXIT_CODE)
    })?;

    let path = resolve_candidate(repo_root, candidate);
    let invalid = |message: String| {
        BridgeError::new(codes::MODULES_ROOT, message)
            .with_data(error_data([("modules_root", Value::from(path.as_str()))]))
            .with_exit_code(INPUT_EXIT_CODE)
    };
    match fs::metadata(&path) {
        Err(_) => Err(invalid(format!("modules_root does not exist: {path}"))),
        Ok(metadata) if !metadata.is_dir() => {
            Err(invalid(format!("modules_root must be a directory: {path}")))
        }
        Ok(_) => Ok(path),
    }
}

fn resolve_candidate(repo_root: &Utf8Path, candidate: &str) -> Utf8PathBuf {
    let requested = Utf8Path::new(candidate);
    if requested.is_absolute() {
        return requested.to_path_buf();
    }
    let mut resolved = Utf8PathBuf::new();
    for component in repo_root.join(requested).components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !resolved.pop() && !resolved.has_root() {
                    resolved.push(component);
                }
            }
            other => resolved.push(other),
        }
    }
    resolved
}
