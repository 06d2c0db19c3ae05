pub mod backend;
pub mod capture;
pub mod clock;
pub mod microphone;
pub mod segment;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, CaptureError};
pub use capture::{CaptureConfig, CaptureSession};
pub use clock::SegmentClock;
pub use segment::{AudioSegment, SegmentEncoder};
