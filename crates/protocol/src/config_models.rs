//! Orchestrator configuration models for `rpa-runner.toml`.
//!
//! Every section is optional; missing values fall back to the defaults
//! documented on each field.
//!
//! # Example
//!
//! ```toml
//! [event_bus]
//! url = "ws://127.0.0.1:8080/robot-report-logs-realtime"
//!
//! [workspace]
//! root = "/var/lib/rpa-runner/work"
//! log_dir = "/var/log/rpa-runner"
//!
//! [workspace.path_rewrites]
//! "/home/ec2-user/robot/devdata/" = "/var/lib/rpa-runner/devdata/"
//!
//! [interpreter]
//! program = "rpa-runner-interpreter"
//! args = []
//!
//! [gate]
//! idle_timeout_secs = 1800
//!
//! [supervisor]
//! stop_grace_secs = 5
//! retention_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Complete orchestrator configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub event_bus: EventBusConfig,
    pub workspace: WorkspaceConfig,
    pub interpreter: InterpreterConfig,
    pub gate: GateConfig,
    pub supervisor: SupervisorConfig,
}

/// Remote pub/sub endpoint. Without a URL events stay in-process.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EventBusConfig {
    pub url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory receiving one artifact per process id. Default `./workspace`.
    pub root: PathBuf,

    /// Directory receiving one diagnostic log per process id. Default `./logs`.
    pub log_dir: PathBuf,

    /// Prefixes replaced in the job definition before it is written, in
    /// key order.
    pub path_rewrites: BTreeMap<String, String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspace"),
            log_dir: PathBuf::from("logs"),
            path_rewrites: BTreeMap::new(),
        }
    }
}

/// The external interpreter executable.
///
/// It is started as `program [args...] <artifact> --listener=<all|step>`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Default `rpa-runner-interpreter`.
    pub program: String,
    pub args: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "rpa-runner-interpreter".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Stop a step-by-step job whose gate waited this long without a
    /// `continue`. Unset means wait indefinitely.
    pub idle_timeout_secs: Option<u64>,
}

impl GateConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Time a stopped interpreter gets to exit before it is killed. Default 5.
    pub stop_grace_secs: u64,

    /// How long a terminal record stays queryable. Default 300.
    pub retention_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: 5,
            retention_secs: 300,
        }
    }
}

impl SupervisorConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}
