//! Supervision of one running interpreter.
//!
//! The supervisor owns the child process for the whole execution. It feeds
//! callback lines to the [`ListenerBridge`] in order, answers gated step
//! starts on the child's stdin, carries out stop requests, and finally makes
//! the record terminal and closes the event stream.

use crate::bus::EventBus;
use crate::gate::GateTable;
use crate::launcher::diagnostics::DiagnosticLog;
use crate::launcher::interpreter::{output_lines, OutputLine, OutputStream};
use crate::listener::{dispatch, Flow, ListenerBridge};
use crate::state::ProcessRegistry;
use rr_protocol::hook_models::GateReply;
use rr_protocol::process_models::{FailureDetail, ProcessStatus, RunMode};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long stderr may lag behind the exit of the child.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Everything the supervisor needs for one execution.
pub struct Supervision {
    pub process_id: String,
    pub execution_id: Uuid,
    pub run_mode: RunMode,
    pub child: Child,
    pub bridge: ListenerBridge,
    pub registry: ProcessRegistry,
    pub gates: Arc<GateTable>,
    pub bus: Arc<dyn EventBus>,
    pub diagnostics: Arc<DiagnosticLog>,
    /// Cancelled to request a stop.
    pub stop: CancellationToken,
    pub stop_grace: Duration,
    pub retention: Duration,
}

/// Why the read loop ended.
enum Ending {
    /// The child exited.
    Exited(std::io::Result<ExitStatus>),
    /// The child exited while its step gate was waiting.
    ExitedAtGate(std::io::Result<ExitStatus>),
    /// A stop was requested, or the bridge asked to terminate.
    Stop,
}

/// Run one execution to completion and return its final status.
pub async fn supervise(mut s: Supervision) -> ProcessStatus {
    let process_id = s.process_id.clone();
    let mut stdin = s.child.stdin.take();

    let mut stdout: OutputStream = match s.child.stdout.take() {
        Some(stdout) => output_lines(stdout),
        None => Box::pin(tokio_stream::empty()),
    };

    let stderr_pump = s.child.stderr.take().map(|stderr| {
        let diagnostics = Arc::clone(&s.diagnostics);
        tokio::spawn(async move {
            let mut lines = output_lines(stderr);
            while let Some(line) = lines.next().await {
                let text = match line {
                    OutputLine::Text(text) | OutputLine::Malformed { line: text, .. } => text,
                    OutputLine::Hook(hook) => format!("{hook:?}"),
                };
                diagnostics.append(&text).await;
            }
        })
    });

    let ending = loop {
        tokio::select! {
            biased;
            _ = s.stop.cancelled() => break Ending::Stop,
            line = stdout.next() => match line {
                Some(OutputLine::Hook(hook)) => {
                    let gated = s.run_mode.is_gated() && hook.is_step_boundary();

                    let flow = if gated {
                        tokio::select! {
                            biased;
                            _ = s.stop.cancelled() => break Ending::Stop,
                            flow = dispatch(&mut s.bridge, hook) => flow,
                            status = s.child.wait() => break Ending::ExitedAtGate(status),
                        }
                    } else {
                        dispatch(&mut s.bridge, hook).await
                    };

                    if flow == Flow::Terminate {
                        break Ending::Stop;
                    }
                    if gated {
                        reply(&mut stdin, GateReply::Continue, &process_id).await;
                    }
                }
                Some(OutputLine::Text(text)) => s.diagnostics.append(&text).await,
                Some(OutputLine::Malformed { line, error }) => {
                    tracing::warn!(
                        process_id = %process_id,
                        error = %error,
                        "Malformed callback line"
                    );
                    s.diagnostics.append(&line).await;
                }
                // Stdout is closed but the child may live on; stops still apply.
                None => tokio::select! {
                    biased;
                    _ = s.stop.cancelled() => break Ending::Stop,
                    status = s.child.wait() => break Ending::Exited(status),
                },
            },
        }
    };

    let stopping = matches!(ending, Ending::Stop);
    if stopping {
        s.gates.cancel(&process_id);
        reply(&mut stdin, GateReply::Stop, &process_id).await;
        drop(stdin.take());
        terminate(&mut s.child, s.stop_grace, &process_id).await;
    }

    if let Some(mut pump) = stderr_pump {
        if tokio::time::timeout(STDERR_DRAIN, &mut pump).await.is_err() {
            pump.abort();
        }
    }

    let (terminal, failure) = match ending {
        Ending::Stop => (ProcessStatus::Stopped, None),
        Ending::Exited(Ok(status)) if status.success() => (ProcessStatus::Completed, None),
        Ending::Exited(Ok(status)) => (
            ProcessStatus::Failed,
            Some(failure_detail(
                status.code(),
                &format!("Interpreter exited with {status}"),
                &s.diagnostics,
            )),
        ),
        Ending::ExitedAtGate(Ok(status)) => (
            ProcessStatus::Failed,
            Some(failure_detail(
                status.code(),
                "Interpreter exited while awaiting step gate",
                &s.diagnostics,
            )),
        ),
        Ending::Exited(Err(e)) | Ending::ExitedAtGate(Err(e)) => (
            ProcessStatus::Failed,
            Some(failure_detail(
                None,
                &format!("Failed to wait for interpreter: {e}"),
                &s.diagnostics,
            )),
        ),
    };

    match s
        .registry
        .settle(&process_id, s.execution_id, terminal, failure.clone())
        .await
    {
        Ok(true) => {}
        Ok(false) => tracing::debug!(process_id = %process_id, "Record was already terminal"),
        Err(e) => tracing::error!(process_id = %process_id, error = %e, "Failed to settle record"),
    }

    // Another writer may have settled first; report what the record says.
    let (status, failure) = match s.registry.get(&process_id).await {
        Ok(record) if record.execution_id == s.execution_id => (record.status, record.failure),
        _ => (terminal, failure),
    };

    s.gates.remove(&process_id);
    s.bridge.finish(status, failure.as_ref()).await;
    if let Err(e) = s.bus.leave(&process_id).await {
        tracing::warn!(process_id = %process_id, error = %e, "Failed to leave process room");
    }
    s.registry
        .reclaim_after(&process_id, s.execution_id, s.retention);

    tracing::info!(
        process_id = %process_id,
        execution_id = %s.execution_id,
        status = %status,
        "Execution finished"
    );
    status
}

async fn reply(stdin: &mut Option<ChildStdin>, reply: GateReply, process_id: &str) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let written = async {
        pipe.write_all(reply.as_line().as_bytes()).await?;
        pipe.flush().await
    }
    .await;

    if let Err(e) = written {
        // The child is gone; its exit is reported by the read loop.
        tracing::debug!(process_id = %process_id, error = %e, "Failed to write gate reply");
        *stdin = None;
    }
}

/// Give the child `grace` to exit on its own, then kill it.
async fn terminate(child: &mut Child, grace: Duration, process_id: &str) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(process_id = %process_id, %status, "Interpreter exited after stop");
        }
        Ok(Err(e)) => {
            tracing::warn!(
                process_id = %process_id,
                error = %e,
                "Failed to wait for stopped interpreter"
            );
        }
        Err(_) => {
            tracing::warn!(
                process_id = %process_id,
                grace_secs = grace.as_secs(),
                "Interpreter ignored stop, killing it"
            );
            if let Err(e) = child.kill().await {
                tracing::error!(process_id = %process_id, error = %e, "Failed to kill interpreter");
            }
        }
    }
}

fn failure_detail(
    exit_code: Option<i32>,
    summary: &str,
    diagnostics: &DiagnosticLog,
) -> FailureDetail {
    let tail = diagnostics.tail();
    let diagnostic = if tail.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\n{tail}")
    };
    FailureDetail::new(exit_code, diagnostic)
}
