//! Custom assertion helpers for integration tests.

use rr_protocol::ipc::{Event, EventKind};
use rr_protocol::process_models::{ProcessStatus, StatusUpdate};

/// The kinds of `events`, in order.
#[allow(dead_code)]
pub fn event_kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

/// Assert that sequence numbers run 0, 1, 2, ... without gaps.
#[allow(dead_code)]
pub fn assert_contiguous_seq(events: &[Event]) {
    for (expected, event) in events.iter().enumerate() {
        assert_eq!(
            event.seq, expected as u64,
            "Event {:?} has seq {}, expected {}",
            event.kind, event.seq, expected
        );
    }
}

/// Assert that exactly one event closes the stream and that it comes last.
#[allow(dead_code)]
pub fn assert_single_terminal_event(events: &[Event]) {
    let terminal = events.iter().filter(|e| e.kind.is_terminal()).count();
    assert_eq!(terminal, 1, "Expected exactly one terminal event");
    assert!(
        events.last().is_some_and(|e| e.kind.is_terminal()),
        "Terminal event must be the last one"
    );
}

/// Assert that every event belongs to the same execution.
#[allow(dead_code)]
pub fn assert_single_execution(events: &[Event]) {
    if let Some(first) = events.first() {
        assert!(events
            .iter()
            .all(|e| e.execution_id == first.execution_id && e.process_id == first.process_id));
    }
}

/// Number of updates that moved the record into `status`.
#[allow(dead_code)]
pub fn count_status(updates: &[StatusUpdate], status: ProcessStatus) -> usize {
    updates.iter().filter(|u| u.status == status).count()
}
