//! Command-line runtime for the tm bridge.
//!
//! The runtime splits configuration flags from the command, loads
//! configuration, initialises telemetry, reads the JSON payload from stdin
//! and dispatches it to the backend. Exactly one JSON object is written to
//! stdout: the command's result, or an `{"error": ...}` envelope whose code
//! also determines the exit status. The streams are injected so tests can
//! drive the runtime without a process boundary.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;
use tm_bridge::{
    BackendInvoker, BackendProgram, BridgeError, Dispatcher, ModulesRootSources, ProcessExecutor,
    Response, read_payload,
};
use tm_bridge_config::Config;
use tracing::debug;

mod cli;
mod config;
mod errors;
mod telemetry;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, split_config_arguments};
use errors::AppError;

/// Tracing target for the CLI runtime.
const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::run");

/// Bundles the output streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, W: Write, E: Write> {
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> IoStreams<'a, W, E> {
    pub(crate) const fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: Read,
    W: Write,
    E: Write,
{
    let mut io = IoStreams::new(stdout, stderr);
    run_with_loader(args, stdin, &mut io, &OrthoConfigLoader)
}

/// Runs the CLI with a custom configuration loader.
pub(crate) fn run_with_loader<I, R, W, E, L>(
    args: I,
    stdin: R,
    io: &mut IoStreams<'_, W, E>,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: Read,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = match Cli::try_parse_from(split.cli_arguments.iter().cloned()) {
        Ok(cli) => cli,
        Err(error) => return report_usage(&error, io),
    };

    let outcome = loader
        .load(&split.config_arguments)
        .and_then(|config| execute(&cli, &config, stdin, &mut *io.stderr));

    let (exit_code, written) = match outcome {
        Ok(response) => (ExitCode::SUCCESS, emit(&mut *io.stdout, &response, cli.pretty)),
        Err(error) => {
            let failure = error.into_bridge_error();
            debug!(target: CLI_TARGET, code = failure.code(), "command failed");
            (
                exit_code_for(&failure),
                emit(&mut *io.stdout, &failure.envelope(), cli.pretty),
            )
        }
    };

    match written {
        Ok(()) => exit_code,
        Err(error) => {
            let _ = writeln!(io.stderr, "failed to write response: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<R: Read, E: Write>(
    cli: &Cli,
    config: &Config,
    stdin: R,
    diagnostics: &mut E,
) -> Result<Response, AppError> {
    telemetry::initialise(config)?;
    let payload = read_payload(stdin)?;
    let cwd = current_dir()?;
    let program = BackendProgram::from_config(config, &cwd);
    debug!(
        target: CLI_TARGET,
        command = ?cli.command,
        repo_root = %program.repo_root(),
        "configuration loaded"
    );

    let dispatcher = Dispatcher::new(
        BackendInvoker::new(program, ProcessExecutor),
        ModulesRootSources::from_env(cli.modules_root.clone()),
    );
    Ok(dispatcher.dispatch(cli.command.into(), &payload, diagnostics)?)
}

fn current_dir() -> Result<Utf8PathBuf, AppError> {
    let cwd = std::env::current_dir().map_err(AppError::WorkingDirectory)?;
    Utf8PathBuf::from_path_buf(cwd).map_err(|path| {
        AppError::WorkingDirectory(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("working directory is not valid UTF-8: {}", path.display()),
        ))
    })
}

/// Writes `value` as a single JSON document followed by a newline.
fn emit<W: Write, T: Serialize>(stdout: &mut W, value: &T, pretty: bool) -> io::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *stdout, value)?;
    } else {
        serde_json::to_writer(&mut *stdout, value)?;
    }
    stdout.write_all(b"\n")?;
    stdout.flush()
}

/// Help and version output goes to stdout; usage errors go to stderr.
fn report_usage<W: Write, E: Write>(error: &clap::Error, io: &mut IoStreams<'_, W, E>) -> ExitCode {
    let rendered = error.render();
    let result = if error.use_stderr() {
        write!(io.stderr, "{rendered}")
    } else {
        write!(io.stdout, "{rendered}")
    };
    if result.is_err() {
        return ExitCode::FAILURE;
    }
    exit_code_from_status(error.exit_code())
}

/// Failures never exit 0; statuses outside `1..=255` collapse to 1.
fn exit_code_for(error: &BridgeError) -> ExitCode {
    u8::try_from(error.exit_code())
        .ok()
        .filter(|status| *status != 0)
        .map_or(ExitCode::FAILURE, ExitCode::from)
}

fn exit_code_from_status(status: i32) -> ExitCode {
    u8::try_from(status).map_or(ExitCode::FAILURE, ExitCode::from)
}
