//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tm_bridge::error::INPUT_EXIT_CODE;
use tm_bridge::{BridgeError, codes};

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to resolve the working directory: {0}")]
    WorkingDirectory(io::Error),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl AppError {
    /// Converts the failure into the error reported on stdout.
    ///
    /// Bridge failures pass through unchanged; start-up failures become
    /// `E_CONFIG` with exit status 2.
    pub(crate) fn into_bridge_error(self) -> BridgeError {
        match self {
            Self::Bridge(error) => error,
            other => BridgeError::new(codes::CONFIG, other.to_string())
                .with_exit_code(INPUT_EXIT_CODE),
        }
    }
}
