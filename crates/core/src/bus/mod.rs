//! Event bus clients.
//!
//! The orchestrator publishes execution events to remote observers and
//! receives their control signals through an [`EventBus`]:
//!
//! - [`MemoryBus`]: in-process broadcast channels, used when no endpoint is
//!   configured and in tests
//! - [`WebSocketBus`]: reconnecting WebSocket client for a remote pub/sub
//!   endpoint
//!
//! The transport is unreliable. Publishing can fail at any time and inbound
//! signals may be duplicated or reordered; callers treat both as normal.

pub mod memory;
pub mod websocket;

pub use memory::MemoryBus;
pub use websocket::WebSocketBus;

use async_trait::async_trait;
use rr_protocol::ipc::{ControlSignal, Event};
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::Stream;

/// Errors reported by [`EventBus::publish`] and the room operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// No live connection to the endpoint.
    #[error("Event bus is not connected")]
    Disconnected,

    /// The outbound queue is full.
    #[error("Event bus outbound queue is full")]
    Backpressure,

    /// The bus has been shut down.
    #[error("Event bus is closed")]
    Closed,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Event bus rejected the message: {0}")]
    Rejected(String),
}

/// Type alias for Result with TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

/// Lazy, unbounded stream of inbound control signals.
pub type SignalStream = Pin<Box<dyn Stream<Item = ControlSignal> + Send>>;

/// Outward channel to the observers of running processes.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event on the event channel.
    async fn publish(&self, event: &Event) -> TransportResult<()>;

    /// Subscribe to inbound control signals.
    ///
    /// Each call returns an independent stream that starts at the next
    /// signal, so a consumer that lost its stream can simply subscribe again.
    fn subscribe_control_signals(&self) -> SignalStream;

    /// Announce interest in the signals addressed to `process_id`.
    async fn join(&self, _process_id: &str) -> TransportResult<()> {
        Ok(())
    }

    /// Withdraw from `process_id` once its execution is over.
    async fn leave(&self, _process_id: &str) -> TransportResult<()> {
        Ok(())
    }
}

/// Adapt a broadcast receiver into a [`SignalStream`].
///
/// A lagging subscriber skips the signals it missed instead of ending.
pub(crate) fn signal_stream(mut rx: broadcast::Receiver<ControlSignal>) -> SignalStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(signal) => yield signal,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Control signal subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
