use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for an audio capture backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (frames may arrive at the device rate and are
    /// conditioned downstream)
    pub sample_rate: u32,
    /// Target channel count (1 = mono)
    pub channels: u16,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // the STT service expects 16kHz
            channels: 1,        // Mono
        }
    }
}

/// Errors raised while acquiring or running the microphone
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone access denied")]
    PermissionDenied,

    #[error("no usable input device: {0}")]
    DeviceUnavailable(String),

    #[error("input stream failed: {0}")]
    Stream(String),

    #[error("capture session is not open")]
    NotOpen,
}

/// Audio capture backend trait
///
/// The production implementation captures from the default input device via
/// cpal. Tests substitute their own implementations to script frame
/// delivery and account for start/stop calls.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create the default microphone backend
    pub fn create(config: AudioBackendConfig) -> Box<dyn AudioBackend> {
        Box::new(super::microphone::MicrophoneBackend::new(config))
    }
}
