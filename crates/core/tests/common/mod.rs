//! Common test utilities shared by the integration tests.
//!
//! This module provides:
//! - Test fixtures (fake interpreter scripts, configs, job definitions)
//! - Custom assertions over event streams and status updates
//! - Helpers for waiting on asynchronous outcomes

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;

use rr_core::engine::Orchestrator;
use rr_protocol::ipc::Event;
use rr_protocol::process_models::{ProcessStatus, StatusUpdate};
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Collect events until a terminal event arrives or `limit` elapses.
#[allow(dead_code)]
pub async fn collect_events(rx: &mut broadcast::Receiver<Event>, limit: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + limit;

    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) => {
                let terminal = event.kind.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => break, // Deadline
        }
    }

    events
}

/// Poll until `process_id` reaches `status`. Returns false on timeout.
#[allow(dead_code)]
pub async fn wait_for_status(
    orchestrator: &Orchestrator,
    process_id: &str,
    status: ProcessStatus,
    limit: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if let Ok(record) = orchestrator.status(process_id).await {
            if record.status == status {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Take every status update already queued on `rx`.
#[allow(dead_code)]
pub fn drain_updates(rx: &mut broadcast::Receiver<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut updates = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(update) => updates.push(update),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    updates
}
