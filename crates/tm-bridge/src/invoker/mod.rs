//! Backend invocation and outcome classification.
//!
//! An [`Invocation`] describes one `tm` subcommand with its flags. The
//! [`BackendInvoker`] hands it to a [`BackendExecutor`], echoes the captured
//! output on success, and turns any failure into a [`BridgeError`] whose code
//! comes from the backend's own `tm error:` diagnostic when one is present.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use thiserror::Error;
use tm_bridge_config::Config;
use tracing::{debug, warn};

use crate::classify::classify_stderr;
use crate::error::{BridgeError, codes, error_data};

/// Tracing target for backend invocations.
const INVOKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::invoker");

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliArg {
    Positional(String),
    Flag(&'static str),
    Value(&'static str, String),
}

/// One backend subcommand and its arguments.
///
/// # Example
///
/// ```
/// use tm_bridge::invoker::Invocation;
///
/// let invocation = Invocation::new("meta")
///     .option("--coverage", "/tmp/tm-meta-x/coverage.json")
///     .flag_if("--respect-requires", true);
/// assert_eq!(
///     invocation.to_args(),
///     ["meta", "--coverage", "/tmp/tm-meta-x/coverage.json", "--respect-requires"],
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    subcommand: &'static str,
    args: Vec<CliArg>,
}

impl Invocation {
    /// Starts an invocation of `subcommand`.
    #[must_use]
    pub const fn new(subcommand: &'static str) -> Self {
        Self {
            subcommand,
            args: Vec::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn positional(mut self, value: impl Into<String>) -> Self {
        self.args.push(CliArg::Positional(value.into()));
        self
    }

    /// Appends a `--flag value` pair.
    #[must_use]
    pub fn option(mut self, flag: &'static str, value: impl Into<String>) -> Self {
        self.args.push(CliArg::Value(flag, value.into()));
        self
    }

    /// Appends a `--flag value` pair when `value` is present.
    #[must_use]
    pub fn option_if_some(self, flag: &'static str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(present) => self.option(flag, present),
            None => self,
        }
    }

    /// Appends a bare boolean flag.
    #[must_use]
    pub fn flag(mut self, flag: &'static str) -> Self {
        self.args.push(CliArg::Flag(flag));
        self
    }

    /// Appends a bare boolean flag when `enabled` is set.
    #[must_use]
    pub fn flag_if(self, flag: &'static str, enabled: bool) -> Self {
        if enabled { self.flag(flag) } else { self }
    }

    /// The backend subcommand.
    #[must_use]
    pub const fn subcommand(&self) -> &'static str {
        self.subcommand
    }

    /// Value passed with `flag`, if any.
    #[must_use]
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            CliArg::Value(name, value) if *name == flag => Some(value.as_str()),
            _ => None,
        })
    }

    /// Whether the bare `flag` is present.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args
            .iter()
            .any(|arg| matches!(arg, CliArg::Flag(name) if *name == flag))
    }

    /// Flattens the invocation into the argument vector after the entrypoint.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.subcommand.to_owned()];
        for arg in &self.args {
            match arg {
                CliArg::Positional(value) => args.push(value.clone()),
                CliArg::Flag(flag) => args.push((*flag).to_owned()),
                CliArg::Value(flag, value) => {
                    args.push((*flag).to_owned());
                    args.push(value.clone());
                }
            }
        }
        args
    }
}

/// Location of the backend runtime and how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProgram {
    node_bin: String,
    entrypoint: Utf8PathBuf,
    repo_root: Utf8PathBuf,
    timeout: Option<Duration>,
}

impl BackendProgram {
    /// Describes `<node_bin> <entrypoint>` run from `repo_root`.
    pub fn new(
        node_bin: impl Into<String>,
        entrypoint: impl Into<Utf8PathBuf>,
        repo_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            node_bin: node_bin.into(),
            entrypoint: entrypoint.into(),
            repo_root: repo_root.into(),
            timeout: None,
        }
    }

    /// Builds the program from configuration, resolving a relative or absent
    /// repository root against `cwd`.
    #[must_use]
    pub fn from_config(config: &Config, cwd: &Utf8Path) -> Self {
        let repo_root = config
            .repo_root()
            .map_or_else(|| cwd.to_path_buf(), |root| cwd.join(root));
        let entrypoint = config.entrypoint_in(&repo_root);
        Self::new(config.node_bin(), entrypoint, repo_root).with_timeout(config.timeout())
    }

    /// Bounds each invocation by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executable that runs the entrypoint.
    #[must_use]
    pub fn node_bin(&self) -> &str {
        &self.node_bin
    }

    /// Backend entrypoint script.
    #[must_use]
    pub fn entrypoint(&self) -> &Utf8Path {
        &self.entrypoint
    }

    /// Working directory for the backend process.
    #[must_use]
    pub fn repo_root(&self) -> &Utf8Path {
        &self.repo_root
    }

    /// Deadline for a single invocation.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Captured result of a finished backend process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit status, or `None` when the process was ended by a signal.
    pub status: Option<i32>,
    /// Captured standard output, decoded lossily.
    pub stdout: String,
    /// Captured standard error, decoded lossily.
    pub stderr: String,
}

impl ProcessOutput {
    /// Creates a record for a process that exited with `status`.
    pub fn exited(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.status, Some(0))
    }
}

/// Failures that prevent a backend process from producing an exit status.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The process could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Executable that was launched.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Waiting on the running process failed.
    #[error("failed to wait for '{program}': {source}")]
    Wait {
        /// Executable that was launched.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The process outlived the configured deadline and was killed.
    #[error("'{program}' timed out after {timeout_secs}s")]
    Timeout {
        /// Executable that was launched.
        program: String,
        /// Configured deadline in seconds.
        timeout_secs: u64,
        /// Output captured before the process was killed.
        partial: ProcessOutput,
    },
}

/// Runs a backend invocation to completion.
///
/// The production implementation is
/// [`ProcessExecutor`](crate::process::ProcessExecutor); tests substitute
/// doubles that write result artifacts directly.
pub trait BackendExecutor {
    /// Executes `invocation` with the given program and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] when the process cannot be started,
    /// waited on, or exceeds its deadline. A non-zero exit is not an error
    /// at this layer.
    fn execute(
        &self,
        program: &BackendProgram,
        invocation: &Invocation,
    ) -> Result<ProcessOutput, ExecutionError>;
}

/// Runs invocations and classifies their outcome.
#[derive(Debug)]
pub struct BackendInvoker<X> {
    program: BackendProgram,
    executor: X,
}

impl<X> BackendInvoker<X> {
    /// Creates an invoker for `program` backed by `executor`.
    #[must_use]
    pub const fn new(program: BackendProgram, executor: X) -> Self {
        Self { program, executor }
    }

    /// The backend program description.
    #[must_use]
    pub const fn program(&self) -> &BackendProgram {
        &self.program
    }
}

impl<X: BackendExecutor> BackendInvoker<X> {
    /// Runs `invocation`.
    ///
    /// On success both captured streams are echoed to `diagnostics`, each
    /// terminated by a newline.
    ///
    /// # Errors
    ///
    /// On a non-zero exit the last `tm error:` line of stderr supplies the
    /// code and message, falling back to `E_TM_CLI`. The error data carries
    /// the exit code, both streams and the attempted arguments. Start-up
    /// failures map to `E_TM_CLI` and deadline expiry to `E_TM_TIMEOUT`.
    pub fn invoke(
        &self,
        invocation: &Invocation,
        diagnostics: &mut dyn Write,
    ) -> Result<ProcessOutput, BridgeError> {
        let args = invocation.to_args();
        debug!(
            target: INVOKER_TARGET,
            program = self.program.node_bin(),
            entrypoint = %self.program.entrypoint(),
            args = ?args,
            "invoking tm CLI"
        );

        let output = self
            .executor
            .execute(&self.program, invocation)
            .map_err(|error| execution_failure(&error, &args))?;

        debug!(
            target: INVOKER_TARGET,
            subcommand = invocation.subcommand(),
            status = ?output.status,
            "tm CLI exited"
        );

        if !output.success() {
            return Err(exit_failure(&output, &args));
        }

        echo(diagnostics, &output.stdout);
        echo(diagnostics, &output.stderr);
        Ok(output)
    }
}

fn exit_failure(output: &ProcessOutput, args: &[String]) -> BridgeError {
    let (code, message) = match classify_stderr(&output.stderr) {
        Some(diagnostic) => (diagnostic.code, diagnostic.message),
        None => (
            String::from(codes::TM_CLI),
            output.status.map_or_else(
                || String::from("tm CLI was terminated by a signal"),
                |status| format!("tm CLI failed with exit code {status}"),
            ),
        ),
    };
    let exit_code = output.status.filter(|status| *status != 0).unwrap_or(1);
    BridgeError::new(code, message)
        .with_exit_code(exit_code)
        .with_data(process_data(output, args))
}

fn execution_failure(error: &ExecutionError, args: &[String]) -> BridgeError {
    match error {
        ExecutionError::Timeout {
            timeout_secs,
            partial,
            ..
        } => {
            let mut data = process_data(partial, args);
            data.insert(String::from("timeout_secs"), Value::from(*timeout_secs));
            BridgeError::new(codes::TM_TIMEOUT, error.to_string()).with_data(data)
        }
        ExecutionError::Spawn { .. } | ExecutionError::Wait { .. } => {
            let mut data = process_data(&ProcessOutput::default(), args);
            data.insert(String::from("error"), Value::from(error.to_string()));
            BridgeError::new(codes::TM_CLI, format!("tm CLI could not be run: {error}"))
                .with_data(data)
        }
    }
}

fn process_data(output: &ProcessOutput, args: &[String]) -> crate::error::ErrorData {
    error_data([
        ("exit_code", output.status.map_or(Value::Null, Value::from)),
        ("stdout", Value::from(output.stdout.as_str())),
        ("stderr", Value::from(output.stderr.as_str())),
        ("args", Value::from(args.to_vec())),
    ])
}

fn echo(diagnostics: &mut dyn Write, text: &str) {
    if text.is_empty() {
        return;
    }
    let mut result = diagnostics.write_all(text.as_bytes());
    if result.is_ok() && !text.ends_with('\n') {
        result = diagnostics.write_all(b"\n");
    }
    if let Err(error) = result.and_then(|()| diagnostics.flush()) {
        warn!(
            target: INVOKER_TARGET,
            error = %error,
            "failed to echo tm CLI output"
        );
    }
}

#[cfg(test)]
mod tests;
