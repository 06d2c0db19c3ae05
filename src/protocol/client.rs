use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{ConfigMessage, ServerMessage, TranscriptFragment};
use crate::audio::AudioSegment;
use crate::session::SessionConfig;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Lifecycle of one realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    HandshakePending,
    Open,
    Closed,
    Failed,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no config acknowledgment within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("server rejected configuration: {0}")]
    ConfigRejected(String),

    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
}

/// Events surfaced to the session layer while a connection is open
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    Transcript(TranscriptFragment),
    /// Backend-reported failure; the connection stays up
    ServerError(String),
    /// The transport dropped; the client never reconnects on its own
    Disconnected,
}

/// One WebSocket session with the transcription backend.
///
/// `connect` runs the config handshake before returning, so a constructed
/// client is always past the point where audio is accepted. Segments are
/// sent as binary frames; inbound messages are demultiplexed by a reader
/// task into [`ProtocolEvent`]s.
pub struct ProtocolClient {
    sink: WsSink,
    state: Arc<Mutex<ConnectionState>>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ProtocolClient {
    /// Open the transport, send the session configuration as the first
    /// message, and wait up to `handshake_timeout` for the server's
    /// acknowledgment.
    ///
    /// Fails on transport errors, on an explicit rejection from the server,
    /// and on handshake timeout. A duplicate acknowledgment arriving later
    /// is ignored by the reader task.
    pub async fn connect(
        url: &str,
        config: &SessionConfig,
        handshake_timeout: Duration,
        events: mpsc::Sender<ProtocolEvent>,
    ) -> Result<Self, ProtocolError> {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let fail = |state: &Arc<Mutex<ConnectionState>>, e: ProtocolError| {
            if let Ok(mut s) = state.lock() {
                *s = ConnectionState::Failed;
            }
            e
        };

        info!("connecting to {}", url);
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| fail(&state, ProtocolError::Transport(e.to_string())))?;
        let (mut sink, mut stream) = ws.split();

        // Handshake: the configuration goes first, before any audio.
        if let Ok(mut s) = state.lock() {
            *s = ConnectionState::HandshakePending;
        }
        let payload = serde_json::to_string(&ConfigMessage::new(config))
            .map_err(|e| fail(&state, ProtocolError::Transport(e.to_string())))?;
        sink.send(tungstenite::Message::Text(payload.into()))
            .await
            .map_err(|e| fail(&state, ProtocolError::Transport(e.to_string())))?;
        debug!("configuration sent, awaiting acknowledgment");

        Self::await_config_ack(&mut stream, handshake_timeout)
            .await
            .map_err(|e| fail(&state, e))?;
        info!("configuration acknowledged");

        if let Ok(mut s) = state.lock() {
            *s = ConnectionState::Open;
        }
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&state), events));

        Ok(Self {
            sink,
            state,
            reader: Some(reader),
        })
    }

    async fn await_config_ack(
        stream: &mut WsStream,
        handshake_timeout: Duration,
    ) -> Result<(), ProtocolError> {
        let deadline = tokio::time::Instant::now() + handshake_timeout;

        loop {
            let msg = tokio::time::timeout_at(deadline, stream.next())
                .await
                .map_err(|_| ProtocolError::HandshakeTimeout(handshake_timeout))?;

            let msg = match msg {
                Some(Ok(m)) => m,
                Some(Err(e)) => return Err(ProtocolError::Transport(e.to_string())),
                None => return Err(ProtocolError::ClosedDuringHandshake),
            };

            match msg {
                tungstenite::Message::Text(text) => match ServerMessage::parse(&text) {
                    Ok(ServerMessage::ConfigAck) => return Ok(()),
                    Ok(ServerMessage::Error { message }) => {
                        return Err(ProtocolError::ConfigRejected(message))
                    }
                    Ok(other) => debug!("ignoring pre-handshake message: {other:?}"),
                    Err(e) => warn!("unparseable message during handshake: {e}"),
                },
                tungstenite::Message::Close(_) => return Err(ProtocolError::ClosedDuringHandshake),
                _ => {}
            }
        }
    }

    /// Forward one encoded segment as a binary frame, consuming it.
    ///
    /// Returns `Ok(false)` without sending when the connection is not open
    /// or the segment is empty; segments are never buffered for later.
    pub async fn send_segment(&mut self, segment: AudioSegment) -> Result<bool, ProtocolError> {
        if self.state() != ConnectionState::Open {
            warn!("dropping segment {}: connection not open", segment.index);
            return Ok(false);
        }
        if segment.is_empty() {
            warn!("dropping segment {}: empty payload", segment.index);
            return Ok(false);
        }

        let index = segment.index;
        let bytes = segment.data.len();
        if let Err(e) = self
            .sink
            .send(tungstenite::Message::Binary(segment.data.into()))
            .await
        {
            self.set_state(ConnectionState::Failed);
            return Err(ProtocolError::Transport(e.to_string()));
        }

        debug!("segment {} sent ({} bytes)", index, bytes);
        Ok(true)
    }

    /// Close the transport; further inbound messages are ignored.
    /// Idempotent.
    pub async fn close(&mut self) {
        let already_closed = self.state() == ConnectionState::Closed && self.reader.is_none();
        if already_closed {
            return;
        }

        // Mark closed before touching the transport so the reader cannot
        // report this deliberate close as a disconnect.
        self.set_state(ConnectionState::Closed);
        if let Err(e) = self.sink.close().await {
            debug!("close failed: {e}");
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        info!("connection closed");
    }

    pub fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Failed)
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }
}

/// Demultiplexes inbound messages until the stream ends, then reports the
/// disconnect. Runs until aborted by `close()` or the server goes away.
async fn read_loop(
    mut stream: WsStream,
    state: Arc<Mutex<ConnectionState>>,
    events: mpsc::Sender<ProtocolEvent>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("websocket error: {e}");
                break;
            }
        };

        let text = match msg {
            tungstenite::Message::Text(text) => text,
            tungstenite::Message::Close(frame) => {
                debug!("server closed the connection: {frame:?}");
                break;
            }
            _ => continue,
        };

        match ServerMessage::parse(&text) {
            Ok(ServerMessage::Transcript(fragment)) => {
                let _ = events.send(ProtocolEvent::Transcript(fragment)).await;
            }
            Ok(ServerMessage::Error { message }) => {
                warn!("server reported error: {message}");
                let _ = events.send(ProtocolEvent::ServerError(message)).await;
            }
            Ok(ServerMessage::ConfigAck) => debug!("duplicate config_ack ignored"),
            Ok(ServerMessage::Unknown { kind }) => {
                debug!("ignoring message of unrecognized kind {kind:?}")
            }
            Err(e) => warn!("malformed message from server: {e}"),
        }
    }

    // Only an unexpected end of stream counts as a disconnect; a
    // deliberate close() has already moved the state off Open.
    let was_open = match state.lock() {
        Ok(mut s) if *s == ConnectionState::Open => {
            *s = ConnectionState::Closed;
            true
        }
        _ => false,
    };
    if was_open {
        let _ = events.send(ProtocolEvent::Disconnected).await;
    }
}
