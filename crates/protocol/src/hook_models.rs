//! Interpreter callback protocol.
//!
//! The interpreter process reports its lifecycle callbacks as lines on
//! stdout, each made of [`HOOK_LINE_PREFIX`] followed by a JSON object tagged
//! by `"hook"`:
//!
//! ```text
//! ::hook:: {"hook":"job_start","name":"Checkout"}
//! ::hook:: {"hook":"step_start","name":"Open Browser","lib":"Browser","args":["https://example.com"]}
//! ::hook:: {"hook":"log","level":"INFO","message":"page loaded"}
//! ::hook:: {"hook":"step_end","name":"Open Browser","status":"PASS"}
//! ::hook:: {"hook":"job_end","status":"PASS"}
//! ```
//!
//! Lines without the prefix are ordinary interpreter output. When started in
//! step mode the interpreter blocks after every `step_start` line until it
//! reads one [`GateReply`] line from stdin.

use serde::{Deserialize, Serialize};

/// Marks a stdout line as a callback.
pub const HOOK_LINE_PREFIX: &str = "::hook:: ";

/// Environment variable carrying the process id.
pub const ENV_PROCESS_ID: &str = "RR_PROCESS_ID";

/// Environment variable carrying the step mode (`all` or `step`).
pub const ENV_STEP_MODE: &str = "RR_STEP_MODE";

/// Environment variable listing the hooks the orchestrator listens to.
pub const ENV_LISTENER_HOOKS: &str = "RR_LISTENER_HOOKS";

/// One interpreter lifecycle callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum Hook {
    JobStart {
        #[serde(default)]
        name: Option<String>,
    },
    StepStart {
        name: String,
        #[serde(default)]
        lib: Option<String>,
        #[serde(default)]
        args: Vec<String>,
    },
    StepEnd {
        name: String,
        status: String,
        #[serde(default)]
        message: Option<String>,
    },
    JobEnd {
        #[serde(default)]
        name: Option<String>,
        status: String,
    },
    Error {
        message: String,
    },
    /// Diagnostic output attached to the enclosing step; never an event on
    /// its own.
    Log {
        #[serde(default)]
        level: Option<String>,
        message: String,
    },
}

impl Hook {
    /// The callback names advertised to the interpreter at startup.
    pub const NAMES: [&'static str; 6] =
        ["job_start", "step_start", "step_end", "job_end", "error", "log"];

    /// Parse one stdout line.
    ///
    /// Returns `None` for lines that are not callbacks at all, and
    /// `Some(Err(_))` for prefixed lines whose body is malformed.
    pub fn parse_line(line: &str) -> Option<Result<Hook, serde_json::Error>> {
        let body = line.trim_end().strip_prefix(HOOK_LINE_PREFIX)?;
        Some(serde_json::from_str(body))
    }

    /// Render the hook as a protocol line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{HOOK_LINE_PREFIX}{}", serde_json::to_string(self)?))
    }

    /// Step boundaries are where a step-by-step execution suspends.
    pub fn is_step_boundary(&self) -> bool {
        matches!(self, Self::StepStart { .. })
    }
}

/// Map an interpreter result status onto the observer vocabulary.
pub fn outcome_label(status: &str) -> &'static str {
    if status.eq_ignore_ascii_case("PASS") {
        "SUCCESS"
    } else {
        "ERROR"
    }
}

/// Line written to the interpreter's stdin after a gated `step_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReply {
    Continue,
    Stop,
}

impl GateReply {
    pub fn as_line(self) -> &'static str {
        match self {
            Self::Continue => "continue\n",
            Self::Stop => "stop\n",
        }
    }
}
