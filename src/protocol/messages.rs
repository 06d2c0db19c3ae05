use serde::{Deserialize, Serialize};

use crate::session::{SessionConfig, TranscriptionAction, WhisperModel};

/// First message sent on a realtime connection. Nothing else goes out until
/// the server acknowledges it.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub model: WhisperModel,
    pub action: TranscriptionAction,
    pub target_language: Option<String>,
}

impl ConfigMessage {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            kind: "config",
            model: config.model,
            action: config.action,
            target_language: match config.action {
                TranscriptionAction::TranslateLanguage => config.target_language.clone(),
                _ => None,
            },
        }
    }
}

/// One transcription result from the server.
///
/// Partial fragments are revisable best-effort text for audio still being
/// processed; final fragments are immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranscriptFragment {
    pub text: String,
    #[serde(default)]
    pub is_partial: bool,
}

/// Messages received on a realtime connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Handshake complete; audio may flow
    ConfigAck,
    /// Backend-reported failure, non-fatal to the connection
    Error { message: String },
    Transcript(TranscriptFragment),
    /// Unrecognized; ignored by the dispatcher
    Unknown { kind: Option<String> },
}

#[derive(Deserialize)]
struct TaggedMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
}

impl ServerMessage {
    /// Parse one inbound text message.
    ///
    /// Control messages carry a `type` tag. Transcript payloads do not: any
    /// untagged message with a `text` field is a transcript. That shape
    /// check is load-bearing; if the protocol ever grows another
    /// text-bearing message kind it must be tagged first.
    pub fn parse(raw: &str) -> Result<ServerMessage, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        if value.get("type").is_some() {
            let tagged: TaggedMessage = serde_json::from_value(value)?;
            return Ok(match tagged.kind.as_str() {
                "config_ack" => ServerMessage::ConfigAck,
                "error" => ServerMessage::Error {
                    message: tagged.message.unwrap_or_default(),
                },
                _ => ServerMessage::Unknown {
                    kind: Some(tagged.kind),
                },
            });
        }

        if value.get("text").is_some() {
            let fragment: TranscriptFragment = serde_json::from_value(value)?;
            return Ok(ServerMessage::Transcript(fragment));
        }

        Ok(ServerMessage::Unknown { kind: None })
    }
}
