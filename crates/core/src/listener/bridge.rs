//! Bridge from interpreter callbacks to the outward event stream.
//!
//! The [`ListenerBridge`] turns every lifecycle callback of one execution
//! into an [`Event`] with the next sequence number, publishes it, and in
//! step-by-step mode holds the execution at each `step-start` until the
//! process's step gate lets it through.

use crate::bus::EventBus;
use crate::gate::{Advance, GateTable, StepGate, Waiter};
use crate::listener::{ExecutionListener, Flow};
use crate::state::{ProcessRegistry, RegistryError};
use async_trait::async_trait;
use chrono::Utc;
use rr_protocol::hook_models::outcome_label;
use rr_protocol::ipc::{Event, EventKind, EventPayload, LogLine, StepInfo};
use rr_protocol::process_models::{FailureDetail, ProcessStatus, RunMode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A step that has started and not ended yet.
struct OpenStep {
    started: Instant,
    lib: Option<String>,
    args: Vec<String>,
    logs: Vec<LogLine>,
}

pub struct ListenerBridge {
    process_id: String,
    execution_id: Uuid,
    run_mode: RunMode,
    next_seq: u64,
    bus: Arc<dyn EventBus>,
    registry: ProcessRegistry,
    gates: Arc<GateTable>,
    idle_timeout: Option<Duration>,
    open_steps: Vec<OpenStep>,
    terminal_published: bool,
}

impl ListenerBridge {
    pub fn new(
        process_id: impl Into<String>,
        execution_id: Uuid,
        run_mode: RunMode,
        bus: Arc<dyn EventBus>,
        registry: ProcessRegistry,
        gates: Arc<GateTable>,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            execution_id,
            run_mode,
            next_seq: 0,
            bus,
            registry,
            gates,
            idle_timeout: None,
            open_steps: Vec::new(),
            terminal_published: false,
        }
    }

    /// Cancel a gate that waits longer than `limit` for `continue`.
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Sequence number the next event will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Whether a `job-end` or `job-error` event has been published.
    pub fn terminal_published(&self) -> bool {
        self.terminal_published
    }

    /// Close the event stream of a finished execution.
    ///
    /// Publishes a terminal event carrying the final status unless the
    /// interpreter already reported one.
    pub async fn finish(&mut self, status: ProcessStatus, failure: Option<&FailureDetail>) {
        if self.terminal_published {
            return;
        }

        let (kind, payload) = match status {
            ProcessStatus::Failed => (
                EventKind::JobError,
                EventPayload {
                    status: Some("ERROR".to_string()),
                    message: failure.map(|f| f.diagnostic.clone()),
                    ..EventPayload::default()
                },
            ),
            ProcessStatus::Stopped => (
                EventKind::JobEnd,
                EventPayload {
                    status: Some("STOPPED".to_string()),
                    ..EventPayload::default()
                },
            ),
            _ => (
                EventKind::JobEnd,
                EventPayload {
                    status: Some("SUCCESS".to_string()),
                    ..EventPayload::default()
                },
            ),
        };

        self.publish(kind, payload).await;
    }

    async fn publish(&mut self, kind: EventKind, payload: EventPayload) {
        let event = Event {
            process_id: self.process_id.clone(),
            execution_id: self.execution_id,
            kind,
            seq: self.next_seq,
            payload,
            timestamp: Utc::now(),
        };
        self.next_seq += 1;
        if kind.is_terminal() {
            self.terminal_published = true;
        }

        if let Err(e) = self.bus.publish(&event).await {
            tracing::warn!(
                process_id = %self.process_id,
                seq = event.seq,
                kind = %kind,
                error = %e,
                "Failed to publish event"
            );
        }
    }

    /// Move the record to `status`. Returns `false` if the execution must end.
    async fn enter(&self, status: ProcessStatus) -> bool {
        match self.registry.transition(&self.process_id, status, None).await {
            Ok(_) => true,
            Err(RegistryError::IllegalTransition { from, .. }) if from.is_terminal() => {
                tracing::debug!(
                    process_id = %self.process_id,
                    status = %from,
                    "Record already terminal, ending execution"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    process_id = %self.process_id,
                    error = %e,
                    "Registry rejected step transition"
                );
                false
            }
        }
    }

    /// Arm the gate and move the record to `waiting_step`.
    ///
    /// Runs before the `step-start` event goes out, so an observer that sees
    /// the event sees the record waiting and its `continue` is not lost.
    async fn suspend(&self) -> Option<(Arc<StepGate>, Waiter)> {
        let gate = self.gates.get_or_create(&self.process_id);
        let waiter = gate.arm();
        if self.enter(ProcessStatus::WaitingStep).await {
            Some((gate, waiter))
        } else {
            self.gates.remove(&self.process_id);
            None
        }
    }

    async fn hold_at_gate(&self, gate: &StepGate, waiter: Waiter) -> Flow {
        match gate.wait(waiter, self.idle_timeout).await {
            Advance::Proceed => {
                if self.enter(ProcessStatus::Running).await {
                    Flow::Continue
                } else {
                    Flow::Terminate
                }
            }
            Advance::Stop => {
                tracing::info!(process_id = %self.process_id, "Step gate cancelled");
                Flow::Terminate
            }
        }
    }
}

#[async_trait]
impl ExecutionListener for ListenerBridge {
    async fn on_job_start(&mut self, name: Option<String>) -> Flow {
        let payload = EventPayload {
            job: name,
            ..EventPayload::default()
        };
        self.publish(EventKind::JobStart, payload).await;
        Flow::Continue
    }

    async fn on_step_start(&mut self, step: StepInfo) -> Flow {
        let suspended = if self.run_mode.is_gated() {
            match self.suspend().await {
                Some(suspended) => Some(suspended),
                None => return Flow::Terminate,
            }
        } else {
            None
        };

        self.open_steps.push(OpenStep {
            started: Instant::now(),
            lib: step.lib.clone(),
            args: step.args.clone(),
            logs: Vec::new(),
        });
        let payload = EventPayload {
            step: Some(step),
            ..EventPayload::default()
        };
        self.publish(EventKind::StepStart, payload).await;

        match suspended {
            Some((gate, waiter)) => self.hold_at_gate(&gate, waiter).await,
            None => Flow::Continue,
        }
    }

    async fn on_step_end(&mut self, name: String, status: String, message: Option<String>) -> Flow {
        let (duration_ms, lib, args, logs) = match self.open_steps.pop() {
            Some(step) => (
                Some(u64::try_from(step.started.elapsed().as_millis()).unwrap_or(u64::MAX)),
                step.lib,
                step.args,
                step.logs,
            ),
            None => (None, None, Vec::new(), Vec::new()),
        };

        let payload = EventPayload {
            step: Some(StepInfo { name, lib, args }),
            status: Some(outcome_label(&status).to_string()),
            message,
            duration_ms,
            logs,
            ..EventPayload::default()
        };
        self.publish(EventKind::StepEnd, payload).await;

        if let Err(e) = self.registry.record_step(&self.process_id).await {
            tracing::warn!(process_id = %self.process_id, error = %e, "Failed to count step");
        }
        Flow::Continue
    }

    async fn on_job_end(&mut self, name: Option<String>, status: String) -> Flow {
        let payload = EventPayload {
            job: name,
            status: Some(outcome_label(&status).to_string()),
            ..EventPayload::default()
        };
        self.publish(EventKind::JobEnd, payload).await;
        Flow::Continue
    }

    async fn on_error(&mut self, message: String) -> Flow {
        let payload = EventPayload {
            status: Some("ERROR".to_string()),
            message: Some(message),
            ..EventPayload::default()
        };
        self.publish(EventKind::JobError, payload).await;
        Flow::Continue
    }

    async fn on_log(&mut self, level: Option<String>, message: String) -> Flow {
        match self.open_steps.last_mut() {
            Some(step) => step.logs.push(LogLine { level, message }),
            None => tracing::debug!(
                process_id = %self.process_id,
                message = %message,
                "Interpreter log outside a step"
            ),
        }
        Flow::Continue
    }
}
