//! Runtime process state models.
//!
//! This module defines the structures for tracking the state of interpreter
//! processes launched by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// How a job advances through its steps.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Execute every step without waiting for the observer.
    #[default]
    RunAll,

    /// Suspend before each step until a `continue` signal arrives.
    StepByStep,
}

impl RunMode {
    /// Whether callbacks at step boundaries must pass through a step gate.
    pub fn is_gated(self) -> bool {
        matches!(self, Self::StepByStep)
    }

    /// Value handed to the interpreter in its startup configuration.
    pub fn listener_flag(self) -> &'static str {
        match self {
            Self::RunAll => "all",
            Self::StepByStep => "step",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunAll => "run-all",
            Self::StepByStep => "step-by-step",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the current lifecycle status of a launched process.
///
/// The status progresses through these states during normal execution:
/// Pending -> Running -> Completed
///
/// In step-by-step mode a running process alternates between Running and
/// WaitingStep once per step. Completed, Failed and Stopped are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Registered, interpreter not spawned yet.
    Pending,

    /// Interpreter is executing.
    Running,

    /// Suspended at a step gate, waiting for a `continue` signal.
    WaitingStep,

    /// Interpreter exited with status zero.
    Completed,

    /// Interpreter could not be spawned, crashed or exited non-zero.
    Failed,

    /// Stopped on request, by gate cancellation or by idle timeout.
    Stopped,
}

impl ProcessStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Running or waiting at a gate.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingStep => "waiting_step",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a process ended up `failed`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    /// Exit code of the interpreter, absent when it never ran or was killed
    /// by a signal.
    pub exit_code: Option<i32>,

    /// Captured diagnostic text (tail of the interpreter's output, or the
    /// spawn error).
    pub diagnostic: String,
}

impl FailureDetail {
    pub fn new(exit_code: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self {
            exit_code,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Snapshot of one launched process as held by the registry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    /// Caller-supplied identifier, unique among active records.
    pub process_id: String,

    /// Identifier of this particular launch of `process_id`.
    pub execution_id: Uuid,

    pub run_mode: RunMode,

    pub status: ProcessStatus,

    /// OS process id of the interpreter once spawned.
    pub pid: Option<u32>,

    /// Workspace artifact the interpreter was started with.
    pub artifact_path: Option<PathBuf>,

    pub created_at: DateTime<Utc>,

    /// Time of the last status transition.
    pub updated_at: DateTime<Utc>,

    /// Number of steps released through the gate or reported finished.
    pub steps_completed: u64,

    pub failure: Option<FailureDetail>,
}

/// Emitted by the registry for every status transition it applies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub process_id: String,
    pub execution_id: Uuid,
    pub status: ProcessStatus,
}
