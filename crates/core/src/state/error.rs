//! Error types for the process registry.

use rr_protocol::process_models::ProcessStatus;
use thiserror::Error;

/// Errors returned by [`ProcessRegistry`](super::registry::ProcessRegistry)
/// operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A record for this id is still pending, running or waiting.
    #[error("Process {0} is already active")]
    DuplicateId(String),

    /// No record exists for this id.
    #[error("Process {0} not found")]
    UnknownId(String),

    /// The state machine forbids this move. This is a defect in the caller,
    /// not a runtime condition to retry.
    #[error("Illegal transition for process {process_id}: {from} -> {to}")]
    IllegalTransition {
        process_id: String,
        from: ProcessStatus,
        to: ProcessStatus,
    },
}

/// Type alias for Result with RegistryError.
pub type RegistryResult<T> = Result<T, RegistryError>;
