//! Configuration loading helpers for the bridge CLI.
//!
//! Leading configuration flags are split off for `ortho_config` so `clap`
//! only sees the command and its own options.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use tm_bridge_config::Config;

use crate::errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// Must stay in sync with the fields of [`Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--node-bin",
    "--entrypoint",
    "--repo-root",
    "--timeout-secs",
    "--log-filter",
    "--log-format",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the split-off configuration arguments.
    ///
    /// # Flag Ordering
    ///
    /// Configuration flags must appear before the command. Anything after
    /// the first non-configuration token is left for the command parser.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

/// Loads configuration through `ortho_config` layering.
pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify_argument(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    let (flag, has_inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments partitioned between the configuration loader and `clap`.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    /// Program name followed by the leading configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Program name followed by everything from the command onwards.
    pub(crate) cli_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit::default();
    };

    let mut config_arguments = vec![program.clone()];
    let mut remaining = rest.iter().peekable();
    while let Some(argument) = remaining.next_if(|argument| {
        matches!(classify_argument(argument), FlagAction::Include { .. })
    }) {
        config_arguments.push(argument.clone());
        if classify_argument(argument) == (FlagAction::Include { needs_value: true })
            && let Some(value) = remaining.next()
        {
            config_arguments.push(value.clone());
        }
    }

    let mut cli_arguments = vec![program.clone()];
    cli_arguments.extend(remaining.cloned());
    ConfigArgumentSplit {
        config_arguments,
        cli_arguments,
    }
}
