//! CLI entrypoint for the tm bridge.
//!
//! The binary delegates to [`tm_bridge_cli::run`], which loads
//! configuration, reads the JSON payload from stdin, runs the requested
//! backend command and writes a single JSON object to stdout.

use std::io::{self, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    // Left unlocked: backend helper threads may log to stderr while a call
    // is in flight.
    let mut stderr = io::stderr();
    tm_bridge_cli::run(std::env::args_os(), io::stdin().lock(), &mut stdout, &mut stderr)
}
