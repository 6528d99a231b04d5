//! Event bus communication protocol.
//!
//! This module defines the messages exchanged with remote observers over the
//! event bus:
//! - `Event`: execution events published by the orchestrator (`robotEvent`)
//! - `ControlSignal`: step-gate commands received from observers
//!   (`continueStep`, `stopProcess`)
//!
//! Events carry a per-execution sequence number so an observer can restore
//! total order even when the transport reorders or duplicates deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Channel name for outbound execution events.
pub const EVENT_CHANNEL: &str = "robotEvent";

/// Channel name for inbound `continue` signals.
pub const CONTINUE_CHANNEL: &str = "continueStep";

/// Channel name for inbound `stop` signals.
pub const STOP_CHANNEL: &str = "stopProcess";

/// Channel used to subscribe the orchestrator to a process room.
pub const JOIN_CHANNEL: &str = "joinProcess";

/// Channel used to leave a process room once the job is over.
pub const LEAVE_CHANNEL: &str = "leaveProcess";

/// Kind of an execution event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    JobStart,
    StepStart,
    StepEnd,
    JobEnd,
    JobError,
}

impl EventKind {
    /// `job-end` and `job-error` close an execution's event stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::JobEnd | Self::JobError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobStart => "job-start",
            Self::StepStart => "step-start",
            Self::StepEnd => "step-end",
            Self::JobEnd => "job-end",
            Self::JobError => "job-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the step an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInfo {
    pub name: String,

    /// Library that provides the step's keyword, when the interpreter knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lib: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// A log message the interpreter emitted while a step was running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub message: String,
}

/// Kind-specific event data. Fields that do not apply are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Job (suite) name, on `job-start` and `job-end`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepInfo>,

    /// `SUCCESS`, `ERROR` or `STOPPED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Step result message or error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogLine>,
}

/// An immutable execution event published on [`EVENT_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub process_id: String,
    pub execution_id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Strictly increasing per execution, starting at 0, without gaps.
    pub seq: u64,
    pub payload: EventPayload,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

/// What an inbound control signal asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Continue,
    Stop,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("continue"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// Inbound command addressed to one process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSignal {
    pub process_id: String,
    pub kind: SignalKind,
}

impl ControlSignal {
    pub fn continue_step(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            kind: SignalKind::Continue,
        }
    }

    pub fn stop(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            kind: SignalKind::Stop,
        }
    }
}

/// Body of the room and control frames (`{"processId": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRef {
    pub process_id: String,
}
