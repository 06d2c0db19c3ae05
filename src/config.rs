use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// WebSocket endpoint for real-time transcription
    pub realtime_url: String,
    /// Base URL for the HTTP API (upload, health)
    pub api_url: String,
    /// Seconds to wait for the config acknowledgment after connecting
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Sample rate for captured audio (the STT service expects 16kHz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono)
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Duration of each encoded segment in milliseconds
    #[serde(default = "default_segment_ms")]
    pub segment_duration_ms: u64,
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_segment_ms() -> u64 {
    3000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            segment_duration_ms: default_segment_ms(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
