pub mod api;
pub mod audio;
pub mod config;
pub mod protocol;
pub mod session;

pub use api::{ApiClient, HealthResponse, TranscriptionResponse};
pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSegment,
    CaptureConfig, CaptureError, CaptureSession, SegmentClock, SegmentEncoder,
};
pub use config::Config;
pub use protocol::{
    ConnectionState, ProtocolClient, ProtocolError, ProtocolEvent, ServerMessage,
    TranscriptFragment,
};
pub use session::{
    format_elapsed, ControllerState, SessionConfig, SessionController, SessionEvent, SessionStats,
    StartError, TranscriptAssembler, TranscriptionAction, WhisperModel,
};
