//! Orchestration engine.
//!
//! The [`Orchestrator`] is the entry point used by the submission boundary.
//! It launches jobs, answers status queries, carries out stop requests and
//! routes inbound control signals to the step gates. One supervising task
//! runs per job.

use crate::bus::EventBus;
use crate::gate::GateTable;
use crate::launcher::{supervise, LaunchError, LaunchResult, Launcher};
use crate::state::{ProcessRegistry, RegistryResult};
use rr_protocol::config_models::OrchestratorConfig;
use rr_protocol::ipc::{ControlSignal, SignalKind};
use rr_protocol::process_models::{ProcessRecord, ProcessStatus};
use rr_protocol::request_models::{LaunchRequest, ProcessHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This request stopped the process.
    Stopped,
    /// The process had already ended with this status.
    AlreadyTerminal(ProcessStatus),
}

/// Bookkeeping for a job from launch until its supervisor is done.
struct ActiveJob {
    ticket: Uuid,
    stop: CancellationToken,
    /// Cancelled by the supervising task once teardown is complete.
    finished: CancellationToken,
}

struct Shared {
    registry: ProcessRegistry,
    gates: Arc<GateTable>,
    bus: Arc<dyn EventBus>,
    launcher: Launcher,
    jobs: Mutex<HashMap<String, ActiveJob>>,
}

impl Shared {
    /// Forget the job entry created under `ticket`, if it is still there.
    async fn release(&self, process_id: &str, ticket: Uuid) {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(process_id).is_some_and(|job| job.ticket == ticket) {
            jobs.remove(process_id);
        }
    }
}

/// Launches and controls interpreter processes.
///
/// Cloning is cheap; all clones drive the same set of processes.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Create an orchestrator publishing to `bus`.
    ///
    /// # Arguments
    ///
    /// * `config` - Effective orchestrator configuration
    /// * `bus` - Event bus for events and control signals
    pub fn new(config: &OrchestratorConfig, bus: Arc<dyn EventBus>) -> Self {
        let registry = ProcessRegistry::new();
        let gates = Arc::new(GateTable::new());
        let launcher = Launcher::new(
            config,
            registry.clone(),
            Arc::clone(&gates),
            Arc::clone(&bus),
        );

        Self {
            shared: Arc::new(Shared {
                registry,
                gates,
                bus,
                launcher,
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.shared.registry
    }

    pub fn gates(&self) -> &GateTable {
        &self.shared.gates
    }

    /// Launch a job and start supervising it in the background.
    ///
    /// Returns as soon as the interpreter is running.
    pub async fn launch(&self, request: LaunchRequest) -> LaunchResult<ProcessHandle> {
        let process_id = request.process_id.clone();
        let ticket = Uuid::new_v4();
        let stop = CancellationToken::new();
        let finished = CancellationToken::new();

        {
            let mut jobs = self.shared.jobs.lock().await;
            // A previous execution may still be tearing down.
            if jobs.contains_key(&process_id) {
                return Err(LaunchError::DuplicateId(process_id));
            }
            jobs.insert(
                process_id.clone(),
                ActiveJob {
                    ticket,
                    stop: stop.clone(),
                    finished: finished.clone(),
                },
            );
        }

        let launched = match self.shared.launcher.launch(&request, stop).await {
            Ok(launched) => launched,
            Err(e) => {
                self.shared.release(&process_id, ticket).await;
                finished.cancel();
                return Err(e);
            }
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            supervise(launched.supervision).await;
            shared.release(&process_id, ticket).await;
            finished.cancel();
        });

        Ok(launched.handle)
    }

    /// Stop whatever runs under `request.process_id`, then launch `request`.
    pub async fn relaunch(&self, request: LaunchRequest) -> LaunchResult<ProcessHandle> {
        if let Ok(record) = self.shared.registry.get(&request.process_id).await {
            if record.status.is_active() || self.is_supervised(&request.process_id).await {
                tracing::info!(process_id = %request.process_id, "Replacing running process");
                self.stop(&request.process_id).await?;
            }
        }
        self.launch(request).await
    }

    /// Stop a process and wait until its interpreter is gone.
    ///
    /// # Errors
    ///
    /// Returns `UnknownId` if no record exists for `process_id`.
    pub async fn stop(&self, process_id: &str) -> RegistryResult<StopOutcome> {
        let record = self.shared.registry.get(process_id).await?;

        let job = self
            .shared
            .jobs
            .lock()
            .await
            .get(process_id)
            .map(|job| (job.stop.clone(), job.finished.clone()));

        let Some((stop, finished)) = job else {
            if record.status.is_terminal() {
                return Ok(StopOutcome::AlreadyTerminal(record.status));
            }
            // Registered but not supervised yet.
            let won = self
                .shared
                .registry
                .settle(process_id, record.execution_id, ProcessStatus::Stopped, None)
                .await?;
            return Ok(self.outcome(process_id, won).await);
        };

        tracing::info!(process_id = %process_id, "Stopping process");
        self.shared.gates.cancel(process_id);
        stop.cancel();
        let won = self
            .shared
            .registry
            .settle(process_id, record.execution_id, ProcessStatus::Stopped, None)
            .await?;

        finished.cancelled().await;
        Ok(self.outcome(process_id, won).await)
    }

    pub async fn status(&self, process_id: &str) -> RegistryResult<ProcessRecord> {
        self.shared.registry.get(process_id).await
    }

    pub async fn list(&self) -> Vec<ProcessRecord> {
        self.shared.registry.list().await
    }

    /// Handle one inbound control signal. Never blocks.
    ///
    /// `continue` releases a waiting step gate; `stop` stops the process in
    /// the background. Signals for unknown processes are ignored.
    pub fn signal(&self, signal: ControlSignal) {
        match signal.kind {
            SignalKind::Continue => {
                self.shared.gates.signal(&signal);
            }
            SignalKind::Stop => {
                let orchestrator = self.clone();
                tokio::spawn(async move {
                    match orchestrator.stop(&signal.process_id).await {
                        Ok(outcome) => tracing::debug!(
                            process_id = %signal.process_id,
                            ?outcome,
                            "Handled stop signal"
                        ),
                        Err(e) => tracing::debug!(
                            process_id = %signal.process_id,
                            error = %e,
                            "Ignoring stop signal"
                        ),
                    }
                });
            }
        }
    }

    /// Feed the bus's control signals into [`Orchestrator::signal`].
    pub fn spawn_signal_pump(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let mut signals = self.shared.bus.subscribe_control_signals();

        tokio::spawn(async move {
            while let Some(signal) = signals.next().await {
                orchestrator.signal(signal);
            }
            tracing::debug!("Control signal stream ended");
        })
    }

    /// Wait up to `limit` for the supervisor of `process_id` to finish, then
    /// return the record.
    pub async fn wait_until_settled(
        &self,
        process_id: &str,
        limit: Duration,
    ) -> RegistryResult<ProcessRecord> {
        let finished = self
            .shared
            .jobs
            .lock()
            .await
            .get(process_id)
            .map(|job| job.finished.clone());

        if let Some(finished) = finished {
            if tokio::time::timeout(limit, finished.cancelled()).await.is_err() {
                tracing::debug!(process_id = %process_id, "Process did not settle in time");
            }
        }
        self.shared.registry.get(process_id).await
    }

    /// Stop every supervised process.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.shared.jobs.lock().await.keys().cloned().collect();
        for process_id in ids {
            if let Err(e) = self.stop(&process_id).await {
                tracing::warn!(process_id = %process_id, error = %e, "Failed to stop process");
            }
        }
    }

    async fn is_supervised(&self, process_id: &str) -> bool {
        self.shared.jobs.lock().await.contains_key(process_id)
    }

    async fn outcome(&self, process_id: &str, won: bool) -> StopOutcome {
        if won {
            return StopOutcome::Stopped;
        }
        match self.shared.registry.get(process_id).await {
            Ok(record) => StopOutcome::AlreadyTerminal(record.status),
            Err(_) => StopOutcome::AlreadyTerminal(ProcessStatus::Stopped),
        }
    }
}
