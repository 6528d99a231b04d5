//! Step gating for step-by-step executions.
//!
//! A [`StepGate`] suspends one execution at a step boundary until an observer
//! sends `continue`, or until the gate is cancelled by `stop`, by teardown or
//! by the idle timeout:
//!
//! ```text
//! open --await_advance--> waiting --continue--> released --> open
//!                         waiting --stop/teardown/timeout--> cancelled
//! open --stop/teardown--> cancelled
//! ```
//!
//! Each wait is backed by a fresh `oneshot` pair, so one `continue` can
//! release at most one step. A `continue` that arrives while the gate is open
//! is discarded rather than remembered.

use rr_protocol::ipc::{ControlSignal, SignalKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Current state of a step gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Waiting,
    Released,
    Cancelled,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Waiting => "waiting",
            Self::Released => "released",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of [`StepGate::await_advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Run the next step.
    Proceed,
    /// Abandon the execution.
    Stop,
}

/// An armed wait, returned by [`StepGate::arm`].
#[must_use]
pub struct Waiter(Option<oneshot::Receiver<Advance>>);

struct GateInner {
    state: GateState,
    waiter: Option<oneshot::Sender<Advance>>,
}

/// Per-process synchronization point between the execution and its observer.
pub struct StepGate {
    process_id: String,
    inner: Mutex<GateInner>,
    released: AtomicU64,
}

impl StepGate {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            inner: Mutex::new(GateInner {
                state: GateState::Open,
                waiter: None,
            }),
            released: AtomicU64::new(0),
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn state(&self) -> GateState {
        self.lock().state
    }

    /// Number of steps this gate has let through.
    pub fn steps_released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Suspend the caller until `continue`, `stop` or the idle timeout.
    ///
    /// Only the calling task is suspended. A cancelled gate returns
    /// [`Advance::Stop`] immediately.
    pub async fn await_advance(&self, idle_timeout: Option<Duration>) -> Advance {
        let waiter = self.arm();
        self.wait(waiter, idle_timeout).await
    }

    /// Put the gate into `waiting` without suspending yet.
    ///
    /// A `continue` delivered between `arm` and [`StepGate::wait`] is kept
    /// for that wait.
    pub fn arm(&self) -> Waiter {
        let mut inner = self.lock();
        if inner.state == GateState::Cancelled {
            return Waiter(None);
        }
        let (tx, rx) = oneshot::channel();
        inner.state = GateState::Waiting;
        inner.waiter = Some(tx);
        Waiter(Some(rx))
    }

    /// Suspend until the armed wait is answered or `idle_timeout` elapses.
    pub async fn wait(&self, waiter: Waiter, idle_timeout: Option<Duration>) -> Advance {
        let Some(rx) = waiter.0 else {
            return Advance::Stop;
        };

        tracing::debug!(process_id = %self.process_id, "Waiting at step gate");

        let received = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => return self.expire(limit),
            },
            None => rx.await,
        };

        match received {
            Ok(Advance::Proceed) => {
                let mut inner = self.lock();
                if inner.state == GateState::Released {
                    inner.state = GateState::Open;
                }
                self.released.fetch_add(1, Ordering::SeqCst);
                Advance::Proceed
            }
            // Stop, or the sender was dropped without an answer.
            Ok(Advance::Stop) | Err(_) => {
                self.lock().state = GateState::Cancelled;
                Advance::Stop
            }
        }
    }

    /// Deliver a control signal. Never blocks.
    ///
    /// Returns `true` if the signal changed the gate.
    pub fn signal(&self, kind: SignalKind) -> bool {
        match kind {
            SignalKind::Continue => self.release(),
            SignalKind::Stop => self.cancel(),
        }
    }

    /// Cancel the gate, waking a waiting caller with [`Advance::Stop`].
    ///
    /// Returns `false` if the gate was already cancelled.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == GateState::Cancelled {
            return false;
        }
        inner.state = GateState::Cancelled;
        if let Some(waiter) = inner.waiter.take() {
            let _ = waiter.send(Advance::Stop);
        }
        true
    }

    fn release(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != GateState::Waiting {
            tracing::debug!(
                process_id = %self.process_id,
                state = %inner.state,
                "Ignoring continue for gate that is not waiting"
            );
            return false;
        }

        let delivered = inner
            .waiter
            .take()
            .is_some_and(|waiter| waiter.send(Advance::Proceed).is_ok());
        if delivered {
            inner.state = GateState::Released;
        } else {
            // The waiting caller went away without being answered.
            inner.state = GateState::Open;
        }
        delivered
    }

    fn expire(&self, limit: Duration) -> Advance {
        let mut inner = self.lock();

        // A continue may have landed just as the timer fired.
        if inner.state == GateState::Released {
            inner.state = GateState::Open;
            self.released.fetch_add(1, Ordering::SeqCst);
            return Advance::Proceed;
        }

        inner.state = GateState::Cancelled;
        inner.waiter = None;
        tracing::warn!(
            process_id = %self.process_id,
            idle_secs = limit.as_secs(),
            "Step gate idle timeout expired"
        );
        Advance::Stop
    }

    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The gates of all live step-by-step executions, keyed by process id.
#[derive(Default)]
pub struct GateTable {
    gates: Mutex<HashMap<String, Arc<StepGate>>>,
}

impl GateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gate for `process_id`, created open on first use.
    pub fn get_or_create(&self, process_id: &str) -> Arc<StepGate> {
        let mut gates = self.lock();
        Arc::clone(
            gates
                .entry(process_id.to_string())
                .or_insert_with(|| Arc::new(StepGate::new(process_id))),
        )
    }

    pub fn get(&self, process_id: &str) -> Option<Arc<StepGate>> {
        self.lock().get(process_id).cloned()
    }

    pub fn contains(&self, process_id: &str) -> bool {
        self.lock().contains_key(process_id)
    }

    /// Route a control signal to its gate.
    ///
    /// Signals for ids without a gate are logged and dropped.
    pub fn signal(&self, signal: &ControlSignal) -> bool {
        match self.get(&signal.process_id) {
            Some(gate) => gate.signal(signal.kind),
            None => {
                tracing::debug!(
                    process_id = %signal.process_id,
                    kind = %signal.kind,
                    "Ignoring signal for process without a step gate"
                );
                false
            }
        }
    }

    /// Cancel the gate for `process_id`, if any.
    pub fn cancel(&self, process_id: &str) -> bool {
        self.get(process_id).is_some_and(|gate| gate.cancel())
    }

    /// Cancel and drop the gate for `process_id`.
    pub fn remove(&self, process_id: &str) {
        if let Some(gate) = self.lock().remove(process_id) {
            gate.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<StepGate>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
