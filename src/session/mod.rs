//! Realtime session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - Microphone capture and segment encoding
//! - The protocol handshake and segment streaming
//! - Transcript assembly from partial and final fragments
//! - Session statistics and lifecycle state

mod config;
mod controller;
mod stats;
mod transcript;

pub use config::{InvalidConfig, SessionConfig, TranscriptionAction, WhisperModel};
pub use controller::{ControllerState, SessionController, SessionEvent, StartError};
pub use stats::{format_elapsed, SessionStats};
pub use transcript::TranscriptAssembler;
