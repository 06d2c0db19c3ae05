// Integration tests for the session controller
//
// A resource-accounting fake backend and a scripted loopback WebSocket
// server verify the lifecycle guarantees: start/stop resource release,
// rollback on failed starts, and how backend errors and disconnects are
// surfaced while recording.

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use voxstream::audio::backend::{AudioBackend, AudioBackendConfig, AudioFrame, CaptureError};
use voxstream::config::{AudioConfig, Config, ServiceConfig};
use voxstream::protocol::ProtocolError;
use voxstream::session::{
    ControllerState, SessionConfig, SessionController, SessionEvent, StartError,
    TranscriptionAction, WhisperModel,
};

// ============================================================================
// Fakes
// ============================================================================

/// Shared accounting for the fake backend: how often the microphone was
/// acquired and released, plus a handle for feeding frames.
#[derive(Clone, Default)]
struct BackendProbe {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    frame_tx: Arc<StdMutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl BackendProbe {
    fn feeder(&self) -> mpsc::Sender<AudioFrame> {
        self.frame_tx
            .lock()
            .unwrap()
            .clone()
            .expect("backend not started")
    }
}

struct FakeBackend {
    probe: BackendProbe,
    deny_permission: bool,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioBackend for FakeBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.deny_permission {
            return Err(CaptureError::PermissionDenied);
        }
        let (tx, rx) = mpsc::channel(64);
        *self.probe.frame_tx.lock().unwrap() = Some(tx);
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        *self.probe.frame_tx.lock().unwrap() = None;
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake-microphone"
    }
}

fn controller_with_fake_backend(
    url: String,
    handshake_timeout_secs: u64,
    probe: BackendProbe,
    deny_permission: bool,
) -> (SessionController, mpsc::Receiver<SessionEvent>) {
    let config = Config {
        service: ServiceConfig {
            realtime_url: url,
            api_url: "http://127.0.0.1:1".to_string(),
            handshake_timeout_secs,
        },
        audio: AudioConfig {
            sample_rate: 16000,
            channels: 1,
            segment_duration_ms: 40,
        },
    };

    let (event_tx, event_rx) = mpsc::channel(64);
    let controller = SessionController::with_backend_factory(
        config,
        SessionConfig::default(),
        event_tx,
        Box::new(move |_: AudioBackendConfig| {
            Box::new(FakeBackend {
                probe: probe.clone(),
                deny_permission,
                capturing: false,
            }) as Box<dyn AudioBackend>
        }),
    );
    (controller, event_rx)
}

// ============================================================================
// Scripted server
// ============================================================================

enum ServerCmd {
    Send(String),
    Close,
}

struct ServerHandle {
    url: String,
    /// Binary payloads received after the ack, in arrival order
    binaries: Arc<StdMutex<Vec<Vec<u8>>>>,
    /// Whether the first message on the connection was the config
    first_was_config: Arc<AtomicBool>,
    cmd_tx: mpsc::Sender<ServerCmd>,
}

/// Accepts one connection, acknowledges the config, then records binary
/// frames and executes scripted commands.
async fn spawn_ack_server() -> ServerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
    let binaries: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
    let first_was_config = Arc::new(AtomicBool::new(false));

    let binaries_task = Arc::clone(&binaries);
    let first_task = Arc::clone(&first_was_config);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        if let Some(Ok(Message::Text(text))) = ws.next().await {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                if value["type"] == "config" {
                    first_task.store(true, Ordering::SeqCst);
                }
            }
        }
        ws.send(Message::Text(r#"{"type":"config_ack"}"#.into()))
            .await
            .unwrap();

        loop {
            tokio::select! {
                msg = ws.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        binaries_task.lock().unwrap().push(data.to_vec());
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(ServerCmd::Send(text)) => {
                        let _ = ws.send(Message::Text(text.into())).await;
                    }
                    Some(ServerCmd::Close) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
        }
    });

    ServerHandle {
        url,
        binaries,
        first_was_config,
        cmd_tx,
    }
}

async fn wait_for_event(
    rx: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for session event"),
        }
    }
}

fn pcm_frame(value: i16) -> AudioFrame {
    AudioFrame {
        samples: vec![value; 160], // 10ms at 16kHz mono
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_stop_releases_every_resource() -> Result<()> {
    let server = spawn_ack_server().await;
    let probe = BackendProbe::default();
    let (mut controller, mut events) =
        controller_with_fake_backend(server.url.clone(), 2, probe.clone(), false);

    controller.start().await.expect("start should succeed");
    assert_eq!(controller.state(), ControllerState::Recording);
    let stats = controller.stats();
    assert!(stats.recording);
    assert!(stats.connected);
    assert_eq!(probe.starts.load(Ordering::SeqCst), 1);

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Started)).await;

    // Feed audio across a few clock periods and wait for segments to land.
    let feeder = probe.feeder();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        feeder.send(pcm_frame(5)).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !server.binaries.lock().unwrap().is_empty() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("no segment reached the server");
        }
    }

    // The config was the first message on the wire; every binary frame
    // came after the acknowledgment by construction.
    assert!(server.first_was_config.load(Ordering::SeqCst));
    assert!(controller.stats().segments_sent >= 1);

    controller.stop().await;
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1, "microphone released");
    let stats = controller.stats();
    assert!(!stats.recording);
    assert!(!stats.connected);
    assert_eq!(stats.elapsed_seconds, 0, "elapsed counter resets on stop");

    // Repeated stop is a no-op.
    controller.stop().await;
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_handshake_timeout_rolls_back_to_stopped() {
    // Server that accepts the connection but never acknowledges.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let probe = BackendProbe::default();
    let (mut controller, _events) = controller_with_fake_backend(url, 1, probe.clone(), false);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(
        err,
        StartError::Connection(ProtocolError::HandshakeTimeout(_))
    ));

    // Rollback: microphone released, nothing left running.
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    let stats = controller.stats();
    assert!(!stats.recording);
    assert!(!stats.connected);
    assert_eq!(stats.elapsed_seconds, 0);
}

#[tokio::test]
async fn test_microphone_denial_aborts_start() {
    let probe = BackendProbe::default();
    // URL is never reached: capture fails first.
    let (mut controller, _events) = controller_with_fake_backend(
        "ws://127.0.0.1:1".to_string(),
        1,
        probe.clone(),
        true,
    );

    let err = controller.start().await.unwrap_err();
    assert!(matches!(
        err,
        StartError::Microphone(CaptureError::PermissionDenied)
    ));
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_config_blocks_start() {
    let probe = BackendProbe::default();
    let (mut controller, _events) =
        controller_with_fake_backend("ws://127.0.0.1:1".to_string(), 1, probe.clone(), false);

    controller
        .set_session_config(SessionConfig {
            model: WhisperModel::Small,
            action: TranscriptionAction::TranslateLanguage,
            target_language: None,
        })
        .unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, StartError::Config(_)));
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert_eq!(probe.starts.load(Ordering::SeqCst), 0, "mic never touched");
}

#[tokio::test]
async fn test_double_start_is_rejected() -> Result<()> {
    let server = spawn_ack_server().await;
    let probe = BackendProbe::default();
    let (mut controller, _events) =
        controller_with_fake_backend(server.url.clone(), 2, probe, false);

    controller.start().await.expect("first start succeeds");
    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, StartError::AlreadyRunning));
    assert_eq!(controller.state(), ControllerState::Recording);

    controller.stop().await;
    Ok(())
}

// ============================================================================
// Active-session behavior
// ============================================================================

#[tokio::test]
async fn test_backend_error_leaves_session_recording() -> Result<()> {
    let server = spawn_ack_server().await;
    let probe = BackendProbe::default();
    let (mut controller, mut events) =
        controller_with_fake_backend(server.url.clone(), 2, probe, false);

    controller.start().await.expect("start should succeed");

    server
        .cmd_tx
        .send(ServerCmd::Send(
            r#"{"type":"error","message":"decoder hiccup"}"#.to_string(),
        ))
        .await?;

    let event =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::BackendError(_))).await;
    match event {
        SessionEvent::BackendError(message) => assert_eq!(message, "decoder hiccup"),
        _ => unreachable!(),
    }

    // Non-fatal: still recording, still connected.
    let stats = controller.stats();
    assert!(stats.recording);
    assert!(stats.connected);
    assert_eq!(controller.state(), ControllerState::Recording);

    controller.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_disconnect_is_surfaced_and_needs_explicit_stop() -> Result<()> {
    let server = spawn_ack_server().await;
    let probe = BackendProbe::default();
    let (mut controller, mut events) =
        controller_with_fake_backend(server.url.clone(), 2, probe.clone(), false);

    controller.start().await.expect("start should succeed");

    server.cmd_tx.send(ServerCmd::Close).await?;
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Disconnected)).await;

    // No automatic retry: the session stays up, disconnected, until the
    // user stops it.
    let stats = controller.stats();
    assert!(!stats.connected);
    assert!(stats.recording);
    assert_eq!(controller.state(), ControllerState::Recording);

    controller.stop().await;
    assert_eq!(controller.state(), ControllerState::Stopped);
    assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_transcript_flows_and_clear_resets_text() -> Result<()> {
    let server = spawn_ack_server().await;
    let probe = BackendProbe::default();
    let (mut controller, mut events) =
        controller_with_fake_backend(server.url.clone(), 2, probe, false);

    controller.start().await.expect("start should succeed");

    server
        .cmd_tx
        .send(ServerCmd::Send(
            r#"{"text":"first par","is_partial":true}"#.to_string(),
        ))
        .await?;
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::Transcript { partial: true, .. })
    })
    .await;
    assert_eq!(controller.display_text(), "first par");

    server
        .cmd_tx
        .send(ServerCmd::Send(
            r#"{"text":"first part","is_partial":false}"#.to_string(),
        ))
        .await?;
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::Transcript { partial: false, .. })
    })
    .await;
    assert_eq!(controller.display_text(), "first part ");
    assert_eq!(controller.stats().fragments_received, 2);

    // clear() wipes the text but touches nothing else.
    controller.clear();
    assert_eq!(controller.display_text(), "");
    assert_eq!(controller.state(), ControllerState::Recording);
    assert!(controller.stats().connected);

    server
        .cmd_tx
        .send(ServerCmd::Send(
            r#"{"text":"hello","is_partial":false}"#.to_string(),
        ))
        .await?;
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::Transcript { partial: false, .. })
    })
    .await;
    assert_eq!(controller.display_text(), "hello ");

    controller.stop().await;
    Ok(())
}
