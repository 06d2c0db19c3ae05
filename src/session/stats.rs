use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of a realtime session's observable state
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    /// Whether recording is currently active
    pub recording: bool,

    /// Whether the protocol connection is up
    pub connected: bool,

    /// When recording started, if it did
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds recorded so far (1-second resolution, reset on stop)
    pub elapsed_seconds: u64,

    /// Segments forwarded to the backend
    pub segments_sent: usize,

    /// Transcript fragments received
    pub fragments_received: usize,
}

/// Format an elapsed-seconds counter as `mm:ss`
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
