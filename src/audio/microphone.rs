use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, CaptureError};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Microphone capture backend built on cpal.
///
/// The cpal stream is not `Send`, so it lives on a dedicated capture thread
/// for the lifetime of the session. Frames are pushed into an mpsc channel
/// from the device callback; the callback never blocks, so a slow consumer
/// drops frames rather than stalling the audio thread.
///
/// The device's native sample format is negotiated once when the stream
/// opens (i16 taken as-is, f32/u16 converted) and held fixed for the
/// session.
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

#[async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(CaptureError::Stream("already capturing".to_string()));
        }

        debug!(
            "capture target: {} Hz, {} ch",
            self.config.sample_rate, self.config.channels
        );

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();

        self.capturing.store(true, Ordering::SeqCst);
        let capturing = Arc::clone(&self.capturing);

        let worker = thread::spawn(move || capture_thread(frame_tx, ready_tx, capturing));
        self.worker = Some(worker);

        match ready_rx.await {
            Ok(Ok(())) => Ok(frame_rx),
            Ok(Err(e)) => {
                self.capturing.store(false, Ordering::SeqCst);
                self.worker = None;
                Err(e)
            }
            Err(_) => {
                self.capturing.store(false, Ordering::SeqCst);
                self.worker = None;
                Err(CaptureError::Stream(
                    "capture thread exited before opening the stream".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

/// Owns the cpal stream until the capturing flag drops.
fn capture_thread(
    frames: mpsc::Sender<AudioFrame>,
    ready: oneshot::Sender<Result<(), CaptureError>>,
    capturing: Arc<AtomicBool>,
) {
    let stream = match open_input_stream(frames) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CaptureError::Stream(e.to_string())));
        return;
    }

    let _ = ready.send(Ok(()));

    while capturing.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
}

fn open_input_stream(frames: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| classify_device_error(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    info!(
        "input stream: {} Hz, {} ch, {:?} samples",
        sample_rate, channels, sample_format
    );

    let started = Instant::now();
    let forward = move |samples: Vec<i16>| {
        let frame = AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: started.elapsed().as_millis() as u64,
        };
        // Drop frames if the consumer is behind; the device callback must
        // not block.
        if frames.try_send(frame).is_err() {
            warn!("audio frame dropped: channel full or closed");
        }
    };

    let stream = match sample_format {
        cpal::SampleFormat::I16 => {
            let forward = forward.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| forward(data.to_vec()),
                |e| error!("input stream error: {e}"),
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let forward = forward.clone();
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    forward(data.iter().map(|&s| (s as i32 - 32768) as i16).collect())
                },
                |e| error!("input stream error: {e}"),
                None,
            )
        }
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                forward(
                    data.iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect(),
                )
            },
            |e| error!("input stream error: {e}"),
            None,
        ),
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };

    stream.map_err(|e| classify_device_error(e.to_string()))
}

/// Distinguish OS permission denial from a missing or misconfigured device.
fn classify_device_error(text: String) -> CaptureError {
    let lower = text.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied
    } else {
        CaptureError::DeviceUnavailable(text)
    }
}
