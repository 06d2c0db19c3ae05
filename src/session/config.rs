use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whisper model served by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    Small,
    Medium,
    Turbo,
}

impl WhisperModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Turbo => "turbo",
        }
    }
}

/// What the backend should do with the audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionAction {
    /// Transcribe in the spoken language
    Transcribe,
    /// Translate to English
    TranslateEnglish,
    /// Translate to a selected target language
    TranslateLanguage,
}

impl TranscriptionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::TranslateEnglish => "translate_english",
            Self::TranslateLanguage => "translate_language",
        }
    }
}

/// Configuration for one transcription session.
///
/// Immutable for the session's lifetime; sent exactly once as the first
/// protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: WhisperModel,
    pub action: TranscriptionAction,
    /// Required when `action` is `translate_language`
    pub target_language: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: WhisperModel::Medium,
            action: TranscriptionAction::Transcribe,
            target_language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidConfig {
    #[error("target_language is required when action is translate_language")]
    MissingTargetLanguage,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.action == TranscriptionAction::TranslateLanguage
            && self.target_language.as_deref().map_or(true, str::is_empty)
        {
            return Err(InvalidConfig::MissingTargetLanguage);
        }
        Ok(())
    }
}
