use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioFrame, CaptureError};
use super::clock::SegmentClock;
use super::segment::{condition_frame, AudioSegment, SegmentEncoder};
use crate::config::AudioConfig;

/// Capture settings for one recording session
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate segments are encoded at
    pub sample_rate: u32,
    /// Channel count segments are encoded with (1 = mono)
    pub channels: u16,
    /// Wall-clock slice covered by each segment
    pub segment_duration: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            segment_duration: Duration::from_millis(3000),
        }
    }
}

impl From<&AudioConfig> for CaptureConfig {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            segment_duration: Duration::from_millis(audio.segment_duration_ms),
        }
    }
}

/// Owns the microphone stream and the segmenting encoder.
///
/// `open()` acquires the device, `begin()` starts slicing captured audio
/// into complete encoded segments on a fixed clock, `end()` releases
/// everything. Segments are emitted in capture order; empty ones are
/// dropped.
pub struct CaptureSession {
    config: CaptureConfig,
    backend: Box<dyn AudioBackend>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    clock: Option<SegmentClock>,
    encode_task: Option<JoinHandle<()>>,
    open: bool,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn AudioBackend>, config: CaptureConfig) -> Self {
        Self {
            config,
            backend,
            frames: None,
            clock: None,
            encode_task: None,
            open: false,
        }
    }

    /// Acquire the microphone. Must succeed before `begin`.
    pub async fn open(&mut self) -> Result<(), CaptureError> {
        if self.open {
            warn!("capture session already open");
            return Ok(());
        }

        let frames = self.backend.start().await?;
        self.frames = Some(frames);
        self.open = true;
        info!("microphone acquired ({})", self.backend.name());

        Ok(())
    }

    /// Start producing encoded segments into the given channel.
    ///
    /// Each clock tick finalizes the in-flight container and immediately
    /// opens the next one against the same live stream, so every emitted
    /// segment is a complete standalone file.
    pub fn begin(&mut self, segments: mpsc::Sender<AudioSegment>) -> Result<(), CaptureError> {
        let mut frames = self.frames.take().ok_or(CaptureError::NotOpen)?;

        let (tick_tx, mut tick_rx) = mpsc::channel(1);
        self.clock = Some(SegmentClock::start(self.config.segment_duration, tick_tx));

        let target_rate = self.config.sample_rate;
        let target_channels = self.config.channels;
        let mut encoder = SegmentEncoder::new(target_rate, target_channels);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = frames.recv() => {
                        let Some(frame) = frame else { break };
                        let frame = condition_frame(frame, target_rate, target_channels);
                        encoder.write_frame(&frame);
                    }
                    tick = tick_rx.recv() => {
                        if tick.is_none() {
                            break;
                        }
                        match encoder.rotate() {
                            Ok(Some(segment)) => {
                                debug!(
                                    "segment {} ready ({} bytes, {} ms)",
                                    segment.index,
                                    segment.data.len(),
                                    segment.duration_ms
                                );
                                if segments.send(segment).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => debug!("empty segment dropped"),
                            Err(e) => warn!("failed to encode segment: {e:#}"),
                        }
                    }
                }
            }
            debug!("segment encoding task stopped");
        });
        self.encode_task = Some(task);

        Ok(())
    }

    /// Stop the clock, discard the in-flight container, and release the
    /// microphone. Safe to call at any time, including when never opened.
    pub async fn end(&mut self) {
        if let Some(mut clock) = self.clock.take() {
            clock.stop();
        }

        if let Some(task) = self.encode_task.take() {
            task.abort();
            let _ = task.await;
        }

        self.frames = None;

        if self.open {
            if let Err(e) = self.backend.stop().await {
                warn!("failed to stop audio backend: {e}");
            }
            self.open = false;
            info!("microphone released");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
