//! Execution launcher.
//!
//! [`Launcher::launch`] takes a [`LaunchRequest`] from submission to a
//! running interpreter:
//!
//! 1. validate the process id
//! 2. register a `pending` record
//! 3. write the job definition to the workspace, unless a stop came in
//! 4. spawn the interpreter with the artifact and run mode
//! 5. move the record to `running` and join the process room on the bus
//!
//! The returned [`Supervision`] must then be driven by
//! [`supervisor::supervise`] until the execution ends.

pub mod diagnostics;
pub mod error;
pub mod interpreter;
pub mod supervisor;
pub mod workspace;

pub use error::{LaunchError, LaunchResult};
pub use interpreter::Interpreter;
pub use supervisor::{supervise, Supervision};
pub use workspace::{validate_process_id, Workspace};

use crate::bus::EventBus;
use crate::gate::GateTable;
use crate::listener::ListenerBridge;
use crate::state::ProcessRegistry;
use diagnostics::DiagnosticLog;
use rr_protocol::config_models::OrchestratorConfig;
use rr_protocol::process_models::{FailureDetail, ProcessStatus};
use rr_protocol::request_models::{LaunchRequest, ProcessHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A launched execution, ready to be supervised.
pub struct Launched {
    pub handle: ProcessHandle,
    pub supervision: Supervision,
}

/// Starts interpreter processes for job requests.
pub struct Launcher {
    workspace: Workspace,
    interpreter: Interpreter,
    log_dir: PathBuf,
    registry: ProcessRegistry,
    gates: Arc<GateTable>,
    bus: Arc<dyn EventBus>,
    idle_timeout: Option<Duration>,
    stop_grace: Duration,
    retention: Duration,
}

impl Launcher {
    pub fn new(
        config: &OrchestratorConfig,
        registry: ProcessRegistry,
        gates: Arc<GateTable>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            workspace: Workspace::from_config(&config.workspace),
            interpreter: Interpreter::from_config(&config.interpreter),
            log_dir: config.workspace.log_dir.clone(),
            registry,
            gates,
            bus,
            idle_timeout: config.gate.idle_timeout(),
            stop_grace: config.supervisor.stop_grace(),
            retention: config.supervisor.retention(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Launch one job.
    ///
    /// `stop` becomes the stop token of the execution. A stop that lands
    /// before the record reaches `running` ends the launch.
    ///
    /// # Errors
    ///
    /// - `InvalidProcessId` if the id cannot name an artifact
    /// - `DuplicateId` if a record with this id is still active
    /// - `WorkspaceWrite` if the artifact cannot be written; any terminal
    ///   record this launch replaced is put back
    /// - `Spawn` if the interpreter cannot be started; the record is `failed`
    /// - `StoppedBeforeStart` if `stop` was cancelled during the launch; the
    ///   record is `stopped`
    pub async fn launch(
        &self,
        request: &LaunchRequest,
        stop: CancellationToken,
    ) -> LaunchResult<Launched> {
        let process_id = request.process_id.as_str();
        let run_mode = request.run_type;

        validate_process_id(process_id)?;
        let (record, replaced) = self
            .registry
            .create_replacing(process_id, run_mode)
            .await?;
        let execution_id = record.execution_id;

        let artifact_path = match self
            .workspace
            .write_artifact(process_id, &request.robot_code)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                if !self.registry.withdraw(process_id, execution_id, replaced).await {
                    self.registry
                        .reclaim_after(process_id, execution_id, self.retention);
                }
                return Err(e);
            }
        };

        if stop.is_cancelled() {
            return Err(self.stopped_before_start(process_id, execution_id).await);
        }

        let mut child = match self.interpreter.spawn(
            process_id,
            &artifact_path,
            run_mode,
            self.workspace.root(),
        ) {
            Ok(child) => child,
            Err(e) => {
                let failure = FailureDetail::new(None, e.to_string());
                if let Err(settle_err) = self
                    .registry
                    .settle(process_id, execution_id, ProcessStatus::Failed, Some(failure))
                    .await
                {
                    tracing::error!(
                        process_id = %process_id,
                        error = %settle_err,
                        "Failed to record spawn failure"
                    );
                }
                self.registry
                    .reclaim_after(process_id, execution_id, self.retention);
                return Err(e);
            }
        };

        let pid = child.id();
        self.registry
            .attach_process(process_id, pid, artifact_path.clone())
            .await?;
        // Fails only if the record was settled while we were spawning.
        if let Err(e) = self
            .registry
            .transition(process_id, ProcessStatus::Running, None)
            .await
        {
            if let Err(kill_err) = child.start_kill() {
                tracing::warn!(process_id = %process_id, error = %kill_err, "Failed to kill interpreter");
            }
            if stop.is_cancelled() {
                return Err(self.stopped_before_start(process_id, execution_id).await);
            }
            self.registry
                .reclaim_after(process_id, execution_id, self.retention);
            return Err(e.into());
        }

        if let Err(e) = self.bus.join(process_id).await {
            tracing::warn!(process_id = %process_id, error = %e, "Failed to join process room");
        }

        let diagnostics = Arc::new(DiagnosticLog::open(&self.log_dir, process_id).await);
        let bridge = ListenerBridge::new(
            process_id,
            execution_id,
            run_mode,
            Arc::clone(&self.bus),
            self.registry.clone(),
            Arc::clone(&self.gates),
        )
        .with_idle_timeout(self.idle_timeout);

        tracing::info!(
            process_id = %process_id,
            execution_id = %execution_id,
            user_id = %request.user_id,
            version = request.version,
            trigger = %request.trigger_type,
            simulate = request.is_simulate,
            mode = %run_mode,
            "Process launched"
        );

        Ok(Launched {
            handle: ProcessHandle {
                process_id: process_id.to_string(),
                execution_id,
                artifact_path,
                pid,
                run_mode,
            },
            supervision: Supervision {
                process_id: process_id.to_string(),
                execution_id,
                run_mode,
                child,
                bridge,
                registry: self.registry.clone(),
                gates: Arc::clone(&self.gates),
                bus: Arc::clone(&self.bus),
                diagnostics,
                stop,
                stop_grace: self.stop_grace,
                retention: self.retention,
            },
        })
    }

    /// End a launch interrupted by a stop: the record is `stopped` and is
    /// reclaimed after the retention period.
    async fn stopped_before_start(&self, process_id: &str, execution_id: Uuid) -> LaunchError {
        if let Err(e) = self
            .registry
            .settle(process_id, execution_id, ProcessStatus::Stopped, None)
            .await
        {
            tracing::error!(process_id = %process_id, error = %e, "Failed to record stop");
        }
        self.registry
            .reclaim_after(process_id, execution_id, self.retention);
        tracing::info!(process_id = %process_id, "Process stopped before it started");
        LaunchError::StoppedBeforeStart(process_id.to_string())
    }
}
