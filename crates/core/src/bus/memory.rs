//! In-process event bus.

use crate::bus::{signal_stream, EventBus, SignalStream, TransportError, TransportResult};
use async_trait::async_trait;
use rr_protocol::ipc::{ControlSignal, Event};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Event bus backed by tokio broadcast channels.
///
/// Events published with no subscriber are dropped, like on a real pub/sub
/// endpoint with no observer attached.
pub struct MemoryBus {
    events: broadcast::Sender<Event>,
    signals: broadcast::Sender<ControlSignal>,
    rooms: Mutex<BTreeSet<String>>,
    failing: bool,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (signals, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            events,
            signals,
            rooms: Mutex::new(BTreeSet::new()),
            failing: false,
        }
    }

    /// A bus whose every publish fails, for exercising transport errors.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Inject a control signal as if an observer had sent it.
    ///
    /// Returns the number of signal subscribers that will see it.
    pub fn send_signal(&self, signal: ControlSignal) -> usize {
        self.signals.send(signal).unwrap_or(0)
    }

    /// Process ids currently joined.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: &Event) -> TransportResult<()> {
        if self.failing {
            return Err(TransportError::Rejected(format!(
                "memory bus refuses {} #{}",
                event.kind, event.seq
            )));
        }
        let _ = self.events.send(event.clone());
        Ok(())
    }

    fn subscribe_control_signals(&self) -> SignalStream {
        signal_stream(self.signals.subscribe())
    }

    async fn join(&self, process_id: &str) -> TransportResult<()> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(process_id.to_string());
        Ok(())
    }

    async fn leave(&self, process_id: &str) -> TransportResult<()> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(process_id);
        Ok(())
    }
}
