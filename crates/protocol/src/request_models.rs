//! Job submission models.
//!
//! `LaunchRequest` is the body accepted at the submission boundary
//! (`POST /robot/run`); `ProcessHandle` is what the launcher hands back.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::process_models::RunMode;

fn default_trigger_type() -> String {
    "manual".to_string()
}

/// A request to run one job.
///
/// # Example
///
/// ```json
/// {
///   "user_id": "u-17",
///   "process_id": "Process_F8fZ8GC",
///   "version": 3,
///   "trigger_type": "manual",
///   "robot_code": "{\"name\":\"Demo\",\"tests\":[]}",
///   "is_simulate": true,
///   "run_type": "step-by-step"
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub user_id: String,

    pub process_id: String,

    pub version: u32,

    #[serde(default = "default_trigger_type")]
    pub trigger_type: String,

    /// The job's declarative definition, usually a JSON document.
    pub robot_code: String,

    #[serde(default)]
    pub is_simulate: bool,

    #[serde(default)]
    pub run_type: RunMode,
}

impl LaunchRequest {
    /// Build a request with the submission metadata defaulted.
    pub fn new(process_id: impl Into<String>, robot_code: impl Into<String>) -> Self {
        Self {
            user_id: String::new(),
            process_id: process_id.into(),
            version: 1,
            trigger_type: default_trigger_type(),
            robot_code: robot_code.into(),
            is_simulate: false,
            run_type: RunMode::RunAll,
        }
    }

    pub fn with_run_type(mut self, run_type: RunMode) -> Self {
        self.run_type = run_type;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// Returned by a successful launch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub process_id: String,
    pub execution_id: Uuid,
    pub artifact_path: PathBuf,
    pub pid: Option<u32>,
    pub run_mode: RunMode,
}
