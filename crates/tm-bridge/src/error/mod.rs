//! The structured error carried through every bridge operation.
//!
//! A [`BridgeError`] pairs a stable, machine-readable code with a human
//! message, an optional JSON object of diagnostic context and the process
//! exit status the binary should report. Layers above the failure site may
//! enrich the context but never replace the code, message or exit status.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Stable error codes emitted by the bridge itself.
///
/// Codes reported by the backend are passed through verbatim and are not
/// listed here.
pub mod codes {
    /// Caller input was missing or malformed.
    pub const INPUT: &str = "E_INPUT";
    /// No modules root was supplied by any source.
    pub const MODULES_ROOT_REQUIRED: &str = "E_MODULES_ROOT_REQUIRED";
    /// The supplied modules root is missing or not a directory.
    pub const MODULES_ROOT: &str = "E_MODULES_ROOT";
    /// The gate event log exists but could not be read.
    pub const EVENTS_READ: &str = "E_EVENTS_READ";
    /// A gate event log line is not valid JSON.
    pub const EVENTS_PARSE: &str = "E_EVENTS_PARSE";
    /// The backend failed without a recognisable diagnostic.
    pub const TM_CLI: &str = "E_TM_CLI";
    /// The backend exceeded the configured deadline.
    pub const TM_TIMEOUT: &str = "E_TM_TIMEOUT";
    /// The invocation workspace could not be prepared.
    pub const WORKSPACE: &str = "E_WORKSPACE";
    /// A result artifact expected from the backend is missing or malformed.
    pub const ARTIFACT: &str = "E_ARTIFACT";
    /// Configuration could not be loaded.
    pub const CONFIG: &str = "E_CONFIG";
}

/// Contextual detail attached to a [`BridgeError`].
pub type ErrorData = Map<String, Value>;

/// Exit status reported for failures that do not choose their own.
pub const DEFAULT_EXIT_CODE: i32 = 1;

/// Exit status reported for caller input failures.
pub const INPUT_EXIT_CODE: i32 = 2;

/// Failure surfaced by any bridge operation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct BridgeError {
    code: String,
    message: String,
    data: Option<ErrorData>,
    exit_code: i32,
}

impl BridgeError {
    /// Creates an error with the default exit status and no context.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
            exit_code: DEFAULT_EXIT_CODE,
        }
    }

    /// Creates an [`codes::INPUT`] error with exit status 2.
    pub fn input(message: impl Into<String>) -> Self {
        Self::new(codes::INPUT, message).with_exit_code(INPUT_EXIT_CODE)
    }

    /// Replaces the diagnostic context.
    #[must_use]
    pub fn with_data(mut self, data: ErrorData) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the exit status reported to the caller.
    #[must_use]
    pub const fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Merges `extra` into the diagnostic context, keeping code, message and
    /// exit status untouched. Keys in `extra` win over existing keys.
    #[must_use]
    pub fn enrich(mut self, extra: ErrorData) -> Self {
        self.data.get_or_insert_with(ErrorData::new).extend(extra);
        self
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Diagnostic context, when present.
    #[must_use]
    pub const fn data(&self) -> Option<&ErrorData> {
        self.data.as_ref()
    }

    /// Exit status the process should report.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Flattens the error into a single object of `code`, `message` and the
    /// context keys, for nesting inside another error's context.
    #[must_use]
    pub fn summary(&self) -> ErrorData {
        let mut summary = ErrorData::new();
        summary.insert(String::from("code"), Value::from(self.code.as_str()));
        summary.insert(String::from("message"), Value::from(self.message.as_str()));
        if let Some(data) = &self.data {
            summary.extend(data.clone());
        }
        summary
    }

    /// Borrows the error as the `{"error": {...}}` response envelope.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope<'_> {
        ErrorEnvelope {
            error: ErrorBody {
                code: &self.code,
                message: &self.message,
                data: self.data.as_ref(),
            },
        }
    }
}

/// Serialisable failure response written to the caller.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a ErrorData>,
}

/// Builds an [`ErrorData`] object from key/value pairs.
pub(crate) fn error_data<const N: usize>(entries: [(&str, Value); N]) -> ErrorData {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}
