//! JSON bridge to the `tm` composition backend.
//!
//! The bridge accepts a JSON payload, stages it as request artifacts inside a
//! private temporary workspace, runs the backend CLI through a
//! [`BackendExecutor`], and turns the backend's output artifacts (or its
//! diagnostics) back into a JSON result. Three commands are supported:
//!
//! - `meta` derives a compose specification from a coverage object;
//! - `compose` builds the winning module set and returns its report;
//! - `gates` evaluates gate checks and returns the emitted event stream.
//!
//! Backend failures are classified from the `tm error: CODE message` lines
//! the backend prints on stderr. Every failure surfaces as a [`BridgeError`]
//! carrying a stable code, a message, optional structured data and the exit
//! status the front end should use.
//!
//! # Example
//!
//! ```rust,no_run
//! use camino::Utf8PathBuf;
//! use tm_bridge::{
//!     BackendInvoker, BackendProgram, Command, Dispatcher, ModulesRootSources, ProcessExecutor,
//!     read_payload,
//! };
//!
//! let repo_root = Utf8PathBuf::from("/srv/tm");
//! let program = BackendProgram::new("node", repo_root.join("tm.mjs"), repo_root);
//! let dispatcher = Dispatcher::new(
//!     BackendInvoker::new(program, ProcessExecutor),
//!     ModulesRootSources::from_env(None),
//! );
//! let payload = read_payload(std::io::stdin()).expect("payload");
//! let response = dispatcher
//!     .dispatch(Command::Meta, &payload, &mut std::io::stderr())
//!     .expect("meta succeeds");
//! println!("{}", serde_json::to_string(&response).expect("serialise"));
//! ```

pub mod classify;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod invoker;
pub mod modules_root;
pub mod payload;
pub mod process;
pub mod workspace;

#[cfg(test)]
mod tests;

pub use self::classify::{CliDiagnostic, classify_stderr};
pub use self::dispatch::{Command, Dispatcher, GateMode, Response};
pub use self::error::{BridgeError, ErrorData, codes};
pub use self::invoker::{
    BackendExecutor, BackendInvoker, BackendProgram, ExecutionError, Invocation, ProcessOutput,
};
pub use self::modules_root::ModulesRootSources;
pub use self::payload::{JsonObject, read_payload};
pub use self::process::ProcessExecutor;
pub use self::workspace::Workspace;
