pub mod client;
pub mod messages;

pub use client::{ConnectionState, ProtocolClient, ProtocolError, ProtocolEvent};
pub use messages::{ConfigMessage, ServerMessage, TranscriptFragment};
