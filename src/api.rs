use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::session::{SessionConfig, TranscriptionAction};

/// Response from the upload transcription endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionResponse {
    pub model: String,
    pub action: String,
    pub text: String,
    pub target_language: Option<String>,
}

/// Response from the health endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Client for the request/response endpoints (upload flow, health probe).
/// The realtime pipeline does not go through here.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Upload one audio file for transcription.
    ///
    /// The configuration is validated client-side first; the backend would
    /// reject a translate_language request without a target language
    /// anyway.
    pub async fn transcribe_file(
        &self,
        path: &Path,
        config: &SessionConfig,
    ) -> Result<TranscriptionResponse> {
        config.validate()?;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("model", config.model.as_str())
            .text("action", config.action.as_str());
        if config.action == TranscriptionAction::TranslateLanguage {
            if let Some(language) = &config.target_language {
                form = form.text("target_language", language.clone());
            }
        }

        let url = format!("{}/api/v1/transcribe/upload", self.base_url);
        info!("uploading {} to {}", path.display(), url);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .context("upload request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("upload failed with {status}: {detail}");
        }

        response.json().await.context("invalid upload response")
    }

    /// Probe the service health endpoint.
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("health request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "health check returned {}",
            response.status()
        );

        response.json().await.context("invalid health response")
    }
}
