//! Process record state machine.
//!
//! This module provides functions for managing the lifecycle of a
//! `ProcessRecord`: creating it, deciding which status moves are legal and
//! applying them.

use chrono::Utc;
use rr_protocol::process_models::{FailureDetail, ProcessRecord, ProcessStatus, RunMode};
use uuid::Uuid;

/// Create a new record with Pending status.
///
/// # Arguments
///
/// * `process_id` - Caller-supplied process identifier
/// * `execution_id` - Identifier of this launch
/// * `run_mode` - Whether the execution is gated per step
pub fn create_record(process_id: &str, execution_id: Uuid, run_mode: RunMode) -> ProcessRecord {
    let now = Utc::now();
    ProcessRecord {
        process_id: process_id.to_string(),
        execution_id,
        run_mode,
        status: ProcessStatus::Pending,
        pid: None,
        artifact_path: None,
        created_at: now,
        updated_at: now,
        steps_completed: 0,
        failure: None,
    }
}

/// Whether the state machine permits moving from `from` to `to`.
///
/// ```text
/// pending      -> running | failed | stopped
/// running      -> waiting_step | completed | failed | stopped
/// waiting_step -> running | failed | stopped
/// ```
///
/// Terminal statuses permit nothing.
pub fn can_transition(from: ProcessStatus, to: ProcessStatus) -> bool {
    use ProcessStatus::*;

    matches!(
        (from, to),
        (Pending, Running | Failed | Stopped)
            | (Running, WaitingStep | Completed | Failed | Stopped)
            | (WaitingStep, Running | Failed | Stopped)
    )
}

/// Apply a transition that has already been checked with [`can_transition`].
///
/// A failure detail is only kept on `Failed`.
pub fn apply_transition(
    record: &mut ProcessRecord,
    status: ProcessStatus,
    failure: Option<FailureDetail>,
) {
    record.status = status;
    record.updated_at = Utc::now();
    if status == ProcessStatus::Failed {
        record.failure = failure;
    }
}
