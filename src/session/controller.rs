use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::{InvalidConfig, SessionConfig};
use super::stats::SessionStats;
use super::transcript::TranscriptAssembler;
use crate::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioSegment, CaptureConfig,
    CaptureError, CaptureSession,
};
use crate::config::Config;
use crate::protocol::{ProtocolClient, ProtocolError, ProtocolEvent};

/// Why `start()` failed. Every variant maps to a distinct user-facing
/// reason: bad configuration, microphone denied/unavailable, server
/// unreachable, handshake timed out, or configuration rejected.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] InvalidConfig),

    #[error(transparent)]
    Microphone(#[from] CaptureError),

    #[error(transparent)]
    Connection(#[from] ProtocolError),

    #[error("session is already running")]
    AlreadyRunning,
}

/// Top-level lifecycle of the realtime session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Starting,
    Recording,
    Stopping,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started,
    Stopped,
    /// One transcript fragment was applied to the assembled text
    Transcript { text: String, partial: bool },
    /// Non-fatal failure reported by the backend
    BackendError(String),
    /// The transport dropped; recording stays up until `stop()` is called
    Disconnected,
}

type BackendFactoryFn = Box<dyn Fn(AudioBackendConfig) -> Box<dyn AudioBackend> + Send + Sync>;

/// Coordinates capture, protocol, and transcript assembly for one
/// recording session.
///
/// All mutation happens through `&mut self` entry points and the tasks this
/// controller owns; every acquired resource (microphone, clock, spawned
/// tasks, connection) is released through the single `teardown` path, on
/// normal stop and on start rollback alike.
pub struct SessionController {
    config: Config,
    session: SessionConfig,
    session_id: String,
    state: ControllerState,
    backend_factory: BackendFactoryFn,

    transcript: Arc<Mutex<TranscriptAssembler>>,
    connected: Arc<AtomicBool>,
    elapsed_secs: Arc<AtomicU64>,
    segments_sent: Arc<AtomicUsize>,
    fragments_received: Arc<AtomicUsize>,
    started_at: Option<chrono::DateTime<Utc>>,
    events: mpsc::Sender<SessionEvent>,

    capture: Option<CaptureSession>,
    client: Option<Arc<tokio::sync::Mutex<ProtocolClient>>>,
    pump_task: Option<JoinHandle<()>>,
    dispatch_task: Option<JoinHandle<()>>,
    ticker_task: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(config: Config, session: SessionConfig, events: mpsc::Sender<SessionEvent>) -> Self {
        Self::with_backend_factory(config, session, events, Box::new(AudioBackendFactory::create))
    }

    /// Construct with a custom audio backend factory. Production code uses
    /// `new`; tests inject scripted backends here.
    pub fn with_backend_factory(
        config: Config,
        session: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
        backend_factory: BackendFactoryFn,
    ) -> Self {
        Self {
            config,
            session,
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            state: ControllerState::Stopped,
            backend_factory,
            transcript: Arc::new(Mutex::new(TranscriptAssembler::new())),
            connected: Arc::new(AtomicBool::new(false)),
            elapsed_secs: Arc::new(AtomicU64::new(0)),
            segments_sent: Arc::new(AtomicUsize::new(0)),
            fragments_received: Arc::new(AtomicUsize::new(0)),
            started_at: None,
            events,
            capture: None,
            client: None,
            pump_task: None,
            dispatch_task: None,
            ticker_task: None,
        }
    }

    /// Replace the session configuration used by the next `start()`. A
    /// running session keeps the configuration it was started with.
    pub fn set_session_config(&mut self, session: SessionConfig) -> Result<(), StartError> {
        if self.state != ControllerState::Stopped {
            warn!("session configuration can only change while stopped");
            return Err(StartError::AlreadyRunning);
        }
        self.session = session;
        Ok(())
    }

    /// Start capturing and streaming.
    ///
    /// Acquires the microphone first, then performs the protocol handshake;
    /// segments only start flowing once the handshake has resolved. Any
    /// failure along the way rolls everything back through the same
    /// teardown path `stop()` uses and returns a typed reason.
    pub async fn start(&mut self) -> Result<(), StartError> {
        if self.state != ControllerState::Stopped {
            warn!("start() ignored: session is {:?}", self.state);
            return Err(StartError::AlreadyRunning);
        }
        self.session.validate()?;

        self.state = ControllerState::Starting;
        info!(session_id = %self.session_id, "starting realtime session");

        match self.bring_up().await {
            Ok(()) => {
                self.state = ControllerState::Recording;
                self.started_at = Some(Utc::now());
                let _ = self.events.send(SessionEvent::Started).await;
                info!(session_id = %self.session_id, "recording");
                Ok(())
            }
            Err(e) => {
                error!(session_id = %self.session_id, "start failed: {e}");
                self.teardown().await;
                self.state = ControllerState::Stopped;
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self) -> Result<(), StartError> {
        // Acquire the microphone before opening any connection.
        let backend = (self.backend_factory)(AudioBackendConfig {
            sample_rate: self.config.audio.sample_rate,
            channels: self.config.audio.channels,
        });
        let mut capture = CaptureSession::new(backend, CaptureConfig::from(&self.config.audio));
        capture.open().await?;
        self.capture = Some(capture);

        // Handshake; the capture session stays un-wired until it resolves,
        // so no segment can reach the transport early.
        let (proto_tx, proto_rx) = mpsc::channel(64);
        let client = ProtocolClient::connect(
            &self.config.service.realtime_url,
            &self.session,
            Duration::from_secs(self.config.service.handshake_timeout_secs),
            proto_tx,
        )
        .await?;
        let client = Arc::new(tokio::sync::Mutex::new(client));
        self.client = Some(Arc::clone(&client));
        self.connected.store(true, Ordering::SeqCst);

        // Wire capture → protocol only now that the handshake resolved.
        let (segment_tx, segment_rx) = mpsc::channel(16);
        if let Some(capture) = self.capture.as_mut() {
            capture.begin(segment_tx)?;
        }
        self.pump_task = Some(tokio::spawn(pump_segments(
            segment_rx,
            client,
            Arc::clone(&self.segments_sent),
        )));

        self.dispatch_task = Some(tokio::spawn(dispatch_events(
            proto_rx,
            Arc::clone(&self.transcript),
            Arc::clone(&self.connected),
            Arc::clone(&self.fragments_received),
            self.events.clone(),
        )));

        let elapsed = Arc::clone(&self.elapsed_secs);
        self.ticker_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                elapsed.fetch_add(1, Ordering::SeqCst);
            }
        }));

        Ok(())
    }

    /// Stop recording and release every acquired resource. Idempotent;
    /// calling while already stopped is a no-op.
    pub async fn stop(&mut self) {
        if self.state == ControllerState::Stopped {
            warn!("stop() ignored: session already stopped");
            return;
        }

        self.state = ControllerState::Stopping;
        info!(session_id = %self.session_id, "stopping realtime session");
        self.teardown().await;
        self.state = ControllerState::Stopped;
        let _ = self.events.send(SessionEvent::Stopped).await;
    }

    /// Single exit path. Releases the microphone and clock, drains the
    /// segment pump, closes the connection, and resets the elapsed counter,
    /// regardless of which of them were actually acquired.
    async fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            // Stops the clock, discards the in-flight container, releases
            // the microphone, and closes the segment channel, which lets
            // the pump drain and exit.
            capture.end().await;
        }

        if let Some(task) = self.pump_task.take() {
            let _ = task.await;
        }

        if let Some(client) = self.client.take() {
            client.lock().await.close().await;
        }

        if let Some(task) = self.dispatch_task.take() {
            let _ = task.await;
        }

        if let Some(task) = self.ticker_task.take() {
            task.abort();
            let _ = task.await;
        }

        self.elapsed_secs.store(0, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.started_at = None;
    }

    /// Reset the assembled transcript. Allowed in any state; does not touch
    /// the connection or recording state.
    pub fn clear(&mut self) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.clear();
        }
        debug!(session_id = %self.session_id, "transcript cleared");
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Committed text plus the trailing partial span
    pub fn display_text(&self) -> String {
        self.transcript
            .lock()
            .map(|t| t.display_text())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            recording: self.state == ControllerState::Recording,
            connected: self.connected.load(Ordering::SeqCst),
            started_at: self.started_at,
            elapsed_seconds: self.elapsed_secs.load(Ordering::SeqCst),
            segments_sent: self.segments_sent.load(Ordering::SeqCst),
            fragments_received: self.fragments_received.load(Ordering::SeqCst),
        }
    }
}

/// Forwards encoded segments to the protocol client in capture order.
/// Exits when the capture side closes the channel or the transport fails.
async fn pump_segments(
    mut segments: mpsc::Receiver<AudioSegment>,
    client: Arc<tokio::sync::Mutex<ProtocolClient>>,
    sent: Arc<AtomicUsize>,
) {
    while let Some(segment) = segments.recv().await {
        let mut client = client.lock().await;
        match client.send_segment(segment).await {
            Ok(true) => {
                sent.fetch_add(1, Ordering::SeqCst);
            }
            Ok(false) => {}
            Err(e) => {
                warn!("segment send failed: {e}");
                break;
            }
        }
    }
    debug!("segment pump stopped");
}

/// Applies inbound protocol events to session state. The transcript and
/// counters are only ever mutated here while a session runs.
async fn dispatch_events(
    mut inbound: mpsc::Receiver<ProtocolEvent>,
    transcript: Arc<Mutex<TranscriptAssembler>>,
    connected: Arc<AtomicBool>,
    fragments: Arc<AtomicUsize>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            ProtocolEvent::Transcript(fragment) => {
                fragments.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut t) = transcript.lock() {
                    t.apply(&fragment);
                }
                let _ = events
                    .send(SessionEvent::Transcript {
                        text: fragment.text,
                        partial: fragment.is_partial,
                    })
                    .await;
            }
            ProtocolEvent::ServerError(message) => {
                let _ = events.send(SessionEvent::BackendError(message)).await;
            }
            ProtocolEvent::Disconnected => {
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(SessionEvent::Disconnected).await;
            }
        }
    }
    debug!("protocol event dispatch stopped");
}
