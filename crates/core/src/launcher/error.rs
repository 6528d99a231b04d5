//! Error types for launching executions.

use crate::state::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned at the submission boundary.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// A process with this id is pending, running, waiting or still being
    /// torn down.
    #[error("Process {0} is already active")]
    DuplicateId(String),

    /// The id cannot be used to name a workspace artifact.
    #[error("Invalid process id {0:?}: expected 1-128 characters from [A-Za-z0-9._-], not starting with '.'")]
    InvalidProcessId(String),

    /// The job definition could not be written to the workspace.
    #[error("Failed to write workspace artifact at {path}: {source}")]
    WorkspaceWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The interpreter could not be resolved or started.
    #[error("Failed to spawn interpreter: {0}")]
    Spawn(String),

    /// A stop arrived before the interpreter was running. The record is
    /// `stopped` and no interpreter is left behind.
    #[error("Process {0} was stopped before it started")]
    StoppedBeforeStart(String),

    #[error(transparent)]
    Registry(RegistryError),
}

impl From<RegistryError> for LaunchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateId(id) => Self::DuplicateId(id),
            other => Self::Registry(other),
        }
    }
}

/// Type alias for Result with LaunchError.
pub type LaunchResult<T> = Result<T, LaunchError>;
