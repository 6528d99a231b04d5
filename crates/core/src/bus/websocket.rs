//! WebSocket event bus client.
//!
//! Frames are JSON text messages of the form `{"event": <channel>, "data":
//! <body>}`. Outbound channels are `robotEvent`, `joinProcess` and
//! `leaveProcess`; inbound `continueStep` and `stopProcess` frames carry
//! `{"processId": ...}` and become [`ControlSignal`]s.
//!
//! The connection is owned by a background task that reconnects with a fixed
//! delay and re-joins every room joined so far.

use crate::bus::{signal_stream, EventBus, SignalStream, TransportError, TransportResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rr_protocol::ipc::{
    ControlSignal, Event, ProcessRef, SignalKind, CONTINUE_CHANNEL, EVENT_CHANNEL,
    JOIN_CHANNEL, LEAVE_CHANNEL, STOP_CHANNEL,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Reconnection delay after a WebSocket failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

const OUTBOUND_CAPACITY: usize = 1024;
const SIGNAL_CAPACITY: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Serialize)]
struct OutboundFrame<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

#[derive(Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// State shared between the bus handle and its connection task.
struct Shared {
    signals: broadcast::Sender<ControlSignal>,
    rooms: Mutex<BTreeSet<String>>,
    connected: watch::Sender<bool>,
    shutdown: CancellationToken,
}

/// Event bus client for a remote WebSocket pub/sub endpoint.
pub struct WebSocketBus {
    url: String,
    outbound: mpsc::Sender<String>,
    shared: Arc<Shared>,
}

impl WebSocketBus {
    /// Start connecting to `url` in the background.
    ///
    /// Returns immediately; publishing fails with
    /// [`TransportError::Disconnected`] until the first connection is up.
    pub fn connect(url: impl Into<String>) -> Self {
        let url = url.into();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (connected, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            signals,
            rooms: Mutex::new(BTreeSet::new()),
            connected,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run(url.clone(), outbound_rx, Arc::clone(&shared)));

        Self {
            url,
            outbound,
            shared,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Wait until a session is established. Returns `false` on timeout.
    pub async fn wait_until_connected(&self, limit: Duration) -> bool {
        let mut rx = self.shared.connected.subscribe();
        let connected = tokio::time::timeout(limit, rx.wait_for(|up| *up))
            .await
            .is_ok_and(|waited| waited.is_ok());
        connected
    }

    /// Close the connection and stop reconnecting.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    fn enqueue<T: Serialize>(&self, channel: &str, data: &T) -> TransportResult<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let text = encode(channel, data)?;
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.shared
            .rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WebSocketBus {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[async_trait]
impl EventBus for WebSocketBus {
    async fn publish(&self, event: &Event) -> TransportResult<()> {
        self.enqueue(EVENT_CHANNEL, event)
    }

    fn subscribe_control_signals(&self) -> SignalStream {
        signal_stream(self.shared.signals.subscribe())
    }

    async fn join(&self, process_id: &str) -> TransportResult<()> {
        self.rooms().insert(process_id.to_string());
        let body = ProcessRef {
            process_id: process_id.to_string(),
        };
        match self.enqueue(JOIN_CHANNEL, &body) {
            // The room is joined on (re)connect.
            Err(TransportError::Disconnected) => Ok(()),
            other => other,
        }
    }

    async fn leave(&self, process_id: &str) -> TransportResult<()> {
        self.rooms().remove(process_id);
        let body = ProcessRef {
            process_id: process_id.to_string(),
        };
        match self.enqueue(LEAVE_CHANNEL, &body) {
            Err(TransportError::Disconnected) => Ok(()),
            other => other,
        }
    }
}

fn encode<T: Serialize>(channel: &str, data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutboundFrame {
        event: channel,
        data,
    })
}

/// Parse an inbound frame into a control signal, if it is one.
fn decode_signal(text: &str) -> Option<ControlSignal> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, raw = %text, "Malformed event bus frame");
            return None;
        }
    };

    let kind = match frame.event.as_str() {
        CONTINUE_CHANNEL => SignalKind::Continue,
        STOP_CHANNEL => SignalKind::Stop,
        other => {
            tracing::debug!(event = %other, "Ignoring event bus frame");
            return None;
        }
    };

    match serde_json::from_value::<ProcessRef>(frame.data) {
        Ok(body) => Some(ControlSignal {
            process_id: body.process_id,
            kind,
        }),
        Err(e) => {
            tracing::warn!(error = %e, event = %frame.event, "Control frame without processId");
            None
        }
    }
}

enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Connection loop. Runs until the bus is shut down or dropped.
async fn run(url: String, mut outbound: mpsc::Receiver<String>, shared: Arc<Shared>) {
    loop {
        tracing::info!(url = %url, "Connecting to event bus");

        let connected = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((socket, _response)) => {
                tracing::info!(url = %url, "Event bus connected");
                shared.connected.send_replace(true);
                let end = run_session(socket, &mut outbound, &shared).await;
                shared.connected.send_replace(false);

                if matches!(end, SessionEnd::Shutdown) {
                    break;
                }
                tracing::warn!("Event bus session ended, reconnecting");
            }
            Err(e) => {
                tracing::error!(error = %e, "Event bus connection failed");
            }
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    tracing::debug!(url = %url, "Event bus connection task finished");
}

/// Drive one session: forward queued frames and turn inbound control
/// frames into signals.
async fn run_session(
    socket: Socket,
    outbound: &mut mpsc::Receiver<String>,
    shared: &Shared,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    let rooms: Vec<String> = shared
        .rooms
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();
    for process_id in rooms {
        let frame = match encode(JOIN_CHANNEL, &ProcessRef { process_id }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode join frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(frame)).await {
            tracing::error!(error = %e, "Failed to re-join process room");
            return SessionEnd::Disconnected;
        }
    }

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Shutdown;
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::error!(error = %e, "Failed to send event bus frame");
                    return SessionEnd::Disconnected;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(signal) = decode_signal(&text) {
                            tracing::debug!(
                                process_id = %signal.process_id,
                                kind = %signal.kind,
                                "Received control signal"
                            );
                            let _ = shared.signals.send(signal);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Event bus closed the connection");
                        return SessionEnd::Disconnected;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite; binary is unused.
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Event bus receive error");
                        return SessionEnd::Disconnected;
                    }
                    None => return SessionEnd::Disconnected,
                }
            }
        }
    }
}
