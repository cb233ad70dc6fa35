//! Command routing for the bridge.
//!
//! Each [`Command`] normalises its payload, stages request artifacts in a
//! fresh [`Workspace`], invokes the backend and reads the result artifacts
//! back before the workspace is dropped. The `gates` command additionally
//! salvages any events written before a backend failure and attaches them to
//! the error.

use std::fmt;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{BridgeError, ErrorData, error_data};
use crate::events::read_events;
use crate::invoker::{BackendExecutor, BackendInvoker, Invocation};
use crate::modules_root::{ModulesRootSources, resolve_modules_root};
use crate::payload::{JsonObject, field, flag, optional_object, require_object};
use crate::workspace::Workspace;

/// Tracing target for dispatch operations.
const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Operations exposed by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Derive a compose specification from a coverage object.
    Meta,
    /// Compose modules and return the backend report.
    Compose,
    /// Run gate checks and return the emitted events.
    Gates,
}

impl Command {
    /// Parses a command name.
    ///
    /// # Errors
    ///
    /// Returns an `E_INPUT` error for unknown names.
    pub fn parse(value: &str) -> Result<Self, BridgeError> {
        match value {
            "meta" => Ok(Self::Meta),
            "compose" => Ok(Self::Compose),
            "gates" => Ok(Self::Gates),
            _ => Err(BridgeError::input(format!("Unsupported command: {value}."))),
        }
    }

    /// Canonical command name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Compose => "compose",
            Self::Gates => "gates",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate evaluation mode passed to `tm gates`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateMode {
    /// Conceptual gates only.
    Conceptual,
    /// Full shipping gates.
    #[default]
    Shipping,
}

impl GateMode {
    /// Reads the mode from a payload value.
    ///
    /// An absent value or a blank string selects [`GateMode::Shipping`].
    ///
    /// # Errors
    ///
    /// Returns an `E_INPUT` error for unknown names and non-string values,
    /// including an explicit `null`.
    pub fn from_payload(value: Option<&Value>) -> Result<Self, BridgeError> {
        let invalid = || BridgeError::input("mode must be either 'conceptual' or 'shipping'.");
        match value {
            None => Ok(Self::default()),
            Some(Value::String(text)) => match text.trim() {
                "" | "shipping" => Ok(Self::Shipping),
                "conceptual" => Ok(Self::Conceptual),
                _ => Err(invalid()),
            },
            Some(_) => Err(invalid()),
        }
    }

    /// Mode name as understood by the backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conceptual => "conceptual",
            Self::Shipping => "shipping",
        }
    }
}

/// Successful result of a dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// `meta` result.
    Meta {
        /// Composed specification written by the backend.
        compose: Value,
    },
    /// `compose` result.
    Compose {
        /// Contents of the backend's `report.json`.
        report: Value,
    },
    /// `gates` result.
    Gates {
        /// Always `true`; failing gates surface as errors.
        pass: bool,
        /// Events emitted by the backend, in order.
        events: Vec<Value>,
    },
}

/// Routes commands to the backend.
///
/// The dispatcher holds no per-call state: every call owns its own
/// workspace, so calls may run concurrently.
#[derive(Debug)]
pub struct Dispatcher<X> {
    invoker: BackendInvoker<X>,
    sources: ModulesRootSources,
    temp_root: Option<Utf8PathBuf>,
}

impl<X> Dispatcher<X> {
    /// Creates a dispatcher.
    #[must_use]
    pub const fn new(invoker: BackendInvoker<X>, sources: ModulesRootSources) -> Self {
        Self {
            invoker,
            sources,
            temp_root: None,
        }
    }

    /// Places workspaces under `dir` instead of the system temporary
    /// directory.
    #[must_use]
    pub fn with_temp_root(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    fn workspace(&self, command: Command) -> Result<Workspace, BridgeError> {
        match &self.temp_root {
            Some(root) => Workspace::create_in(root.as_std_path(), command.as_str()),
            None => Workspace::create(command.as_str()),
        }
    }

    fn repo_root(&self) -> &Utf8Path {
        self.invoker.program().repo_root()
    }
}

impl<X: BackendExecutor> Dispatcher<X> {
    /// Runs `command` with `payload`, echoing backend chatter to
    /// `diagnostics` on success.
    ///
    /// # Errors
    ///
    /// Returns the [`BridgeError`] from validation, workspace handling, the
    /// backend or result parsing.
    pub fn dispatch(
        &self,
        command: Command,
        payload: &JsonObject,
        diagnostics: &mut dyn Write,
    ) -> Result<Response, BridgeError> {
        debug!(target: DISPATCH_TARGET, %command, "dispatching");
        match command {
            Command::Meta => self.meta(payload, diagnostics),
            Command::Compose => self.compose(payload, diagnostics),
            Command::Gates => self.gates(payload, diagnostics),
        }
    }

    fn meta(&self, payload: &JsonObject, diagnostics: &mut dyn Write) -> Result<Response, BridgeError> {
        let coverage = require_object("coverage", field(payload, "coverage"))?;
        let respect_requires = flag(payload, "respect_requires");

        let workspace = self.workspace(Command::Meta)?;
        let coverage_path = workspace.write_json("coverage.json", &coverage)?;
        let compose_path = workspace.join("compose.json");
        let invocation = Invocation::new("meta")
            .option("--coverage", coverage_path.as_str())
            .option("--out", compose_path.as_str())
            .flag_if("--respect-requires", respect_requires);
        self.invoker.invoke(&invocation, diagnostics)?;
        let compose = workspace.read_json(&compose_path)?;
        Ok(Response::Meta { compose })
    }

    fn compose(
        &self,
        payload: &JsonObject,
        diagnostics: &mut dyn Write,
    ) -> Result<Response, BridgeError> {
        let compose = require_object("compose", field(payload, "compose"))?;
        let overrides = optional_object("overrides", field(payload, "overrides"))?;
        let modules_root = resolve_modules_root(payload, &self.sources, self.repo_root())?;

        let workspace = self.workspace(Command::Compose)?;
        let staged = stage_compose(&workspace, &compose, overrides.as_ref())?;
        let winner_dir = workspace.join("winner");
        let invocation = Invocation::new("compose")
            .option("--compose", staged.compose.as_str())
            .option("--modules-root", modules_root.as_str())
            .option("--out", winner_dir.as_str())
            .option_if_some("--overrides", staged.overrides.as_deref().map(Utf8Path::as_str));
        self.invoker.invoke(&invocation, diagnostics)?;
        let report = workspace.read_json(&winner_dir.join("report.json"))?;
        Ok(Response::Compose { report })
    }

    fn gates(&self, payload: &JsonObject, diagnostics: &mut dyn Write) -> Result<Response, BridgeError> {
        let compose = require_object("compose", field(payload, "compose"))?;
        let overrides = optional_object("overrides", field(payload, "overrides"))?;
        let mode = GateMode::from_payload(payload.get("mode"))?;
        let strict_events = flag(payload, "strict_events");
        let modules_root = resolve_modules_root(payload, &self.sources, self.repo_root())?;

        let workspace = self.workspace(Command::Gates)?;
        let staged = stage_compose(&workspace, &compose, overrides.as_ref())?;
        let events_path = workspace.join("events.ndjson");
        let invocation = Invocation::new("gates")
            .positional(mode.as_str())
            .option("--compose", staged.compose.as_str())
            .option("--modules-root", modules_root.as_str())
            .flag("--emit-events")
            .option("--events-out", events_path.as_str())
            .option_if_some("--overrides", staged.overrides.as_deref().map(Utf8Path::as_str))
            .flag_if("--strict-events", strict_events);

        if let Err(error) = self.invoker.invoke(&invocation, diagnostics) {
            return Err(salvage_events(error, &events_path));
        }
        let events = read_events(&events_path)?;
        Ok(Response::Gates { pass: true, events })
    }
}

struct StagedCompose {
    compose: Utf8PathBuf,
    overrides: Option<Utf8PathBuf>,
}

fn stage_compose(
    workspace: &Workspace,
    compose: &JsonObject,
    overrides: Option<&JsonObject>,
) -> Result<StagedCompose, BridgeError> {
    let compose_path = workspace.write_json("compose.json", compose)?;
    let overrides_path = overrides
        .map(|object| workspace.write_json("overrides.json", object))
        .transpose()?;
    Ok(StagedCompose {
        compose: compose_path,
        overrides: overrides_path,
    })
}

/// Attaches `pass: false` and whatever events were written to a failed gate
/// run. A failure to read the log is nested under `events_error` so the
/// primary error still propagates.
fn salvage_events(error: BridgeError, events_path: &Utf8Path) -> BridgeError {
    let mut extra: ErrorData = error_data([("pass", Value::Bool(false))]);
    match read_events(events_path) {
        Ok(events) => {
            extra.insert(String::from("events"), Value::Array(events));
        }
        Err(events_error) => {
            debug!(
                target: DISPATCH_TARGET,
                code = events_error.code(),
                "event log unreadable after gate failure"
            );
            extra.insert(String::from("events"), Value::Array(Vec::new()));
            extra.insert(
                String::from("events_error"),
                Value::Object(events_error.summary()),
            );
        }
    }
    error.enrich(extra)
}
