//! Ephemeral per-invocation workspaces.
//!
//! A [`Workspace`] owns a uniquely named temporary directory holding the JSON
//! artifacts exchanged with the backend. The directory is removed when the
//! workspace is dropped, so every exit path of an invocation (including
//! early `?` returns and unwinding) releases it.

use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tempfile::{Builder, TempDir};
use tracing::{debug, warn};

use crate::error::{BridgeError, codes, error_data};
use crate::payload::JsonObject;

/// Tracing target for workspace operations.
const WORKSPACE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::workspace");

/// Scoped temporary directory for a single backend invocation.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: Utf8PathBuf,
}

impl Workspace {
    /// Creates a workspace in the system temporary directory.
    ///
    /// The directory name starts with `tm-<label>-` followed by a random
    /// suffix.
    ///
    /// # Errors
    ///
    /// Returns an `E_WORKSPACE` error when the directory cannot be created or
    /// its path is not valid UTF-8.
    pub fn create(label: &str) -> Result<Self, BridgeError> {
        Self::build(label, Builder::new().prefix(&prefix(label)).tempdir())
    }

    /// Creates a workspace below `parent`.
    ///
    /// # Errors
    ///
    /// Returns an `E_WORKSPACE` error when the directory cannot be created or
    /// its path is not valid UTF-8.
    pub fn create_in(parent: &Path, label: &str) -> Result<Self, BridgeError> {
        Self::build(label, Builder::new().prefix(&prefix(label)).tempdir_in(parent))
    }

    fn build(label: &str, created: io::Result<TempDir>) -> Result<Self, BridgeError> {
        let dir = created.map_err(|error| {
            BridgeError::new(codes::WORKSPACE, "Failed to create temporary workspace.")
                .with_data(error_data([("error", Value::from(error.to_string()))]))
        })?;
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|path| {
            BridgeError::new(codes::WORKSPACE, "Temporary workspace path is not valid UTF-8.")
                .with_data(error_data([(
                    "path",
                    Value::from(path.to_string_lossy().into_owned()),
                )]))
        })?;
        debug!(
            target: WORKSPACE_TARGET,
            label,
            path = %root,
            "workspace created"
        );
        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    /// Root directory of the workspace.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of `relative` inside the workspace.
    #[must_use]
    pub fn join(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Serialises `value` to `relative` inside the workspace, creating parent
    /// directories as needed, and returns the written path.
    ///
    /// # Errors
    ///
    /// Returns an `E_WORKSPACE` error when the file cannot be written.
    pub fn write_json(&self, relative: &str, value: &JsonObject) -> Result<Utf8PathBuf, BridgeError> {
        let path = self.join(relative);
        let write_failed = |error: &dyn std::fmt::Display| {
            BridgeError::new(codes::WORKSPACE, "Failed to write workspace artifact.").with_data(
                error_data([
                    ("file_path", Value::from(path.as_str())),
                    ("error", Value::from(error.to_string())),
                ]),
            )
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| write_failed(&error))?;
        }
        let bytes = serde_json::to_vec(value).map_err(|error| write_failed(&error))?;
        fs::write(&path, bytes).map_err(|error| write_failed(&error))?;
        Ok(path)
    }

    /// Reads a JSON artifact written by the backend.
    ///
    /// # Errors
    ///
    /// Returns an `E_ARTIFACT` error when the file is missing, unreadable, or
    /// not valid JSON.
    pub fn read_json(&self, path: &Utf8Path) -> Result<Value, BridgeError> {
        let artifact_error = |message: &str, error: &dyn std::fmt::Display| {
            BridgeError::new(codes::ARTIFACT, message).with_data(error_data([
                ("file_path", Value::from(path.as_str())),
                ("error", Value::from(error.to_string())),
            ]))
        };
        let raw = fs::read_to_string(path)
            .map_err(|error| artifact_error("Failed to read tm CLI output.", &error))?;
        serde_json::from_str(&raw)
            .map_err(|error| artifact_error("tm CLI output is not valid JSON.", &error))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!(
                target: WORKSPACE_TARGET,
                path = %self.root,
                "workspace removed"
            ),
            Err(error) => warn!(
                target: WORKSPACE_TARGET,
                path = %self.root,
                error = %error,
                "failed to remove workspace"
            ),
        }
    }
}

fn prefix(label: &str) -> String {
    format!("tm-{label}-")
}
