//! CLI argument definitions for the tm bridge.

use clap::{Parser, ValueEnum};
use tm_bridge::Command;

/// Commands accepted on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum CommandArg {
    /// Derive a compose specification from a coverage object.
    Meta,
    /// Compose modules and return the backend report.
    Compose,
    /// Run gate checks and return the emitted events.
    Gates,
}

impl From<CommandArg> for Command {
    fn from(value: CommandArg) -> Self {
        match value {
            CommandArg::Meta => Self::Meta,
            CommandArg::Compose => Self::Compose,
            CommandArg::Gates => Self::Gates,
        }
    }
}

/// Command-line interface for the tm bridge.
///
/// The JSON payload is read from stdin and the JSON response is written to
/// stdout. Configuration flags such as `--node-bin` must precede the
/// command.
#[derive(Parser, Debug)]
#[command(name = "tm-bridge", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// The bridge command to run.
    #[arg(value_enum, value_name = "COMMAND")]
    pub(crate) command: CommandArg,
    /// Indents the JSON response by two spaces.
    #[arg(long)]
    pub(crate) pretty: bool,
    /// Modules root used when the payload does not name one.
    #[arg(long, value_name = "PATH")]
    pub(crate) modules_root: Option<String>,
}
