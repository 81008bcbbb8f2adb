use crate::config::ElevenLabsConfig;
use crate::providers::base::{SynthesizedAudio, TextToSpeech};
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

const API_BASE: &str = "https://api.elevenlabs.io/v1";

pub struct ElevenLabsSynthesizer {
    api_key: String,
    voice_id: String,
    model: String,
    base_url: String,
    client: Client,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: &ElevenLabsConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            voice_id: config.voice_id.clone(),
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| API_BASE.to_string()),
            client: provider_http_client(),
        }
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let url = format!(
            "{}/text-to-speech/{}",
            self.base_url.trim_end_matches('/'),
            self.voice_id
        );
        debug!("elevenlabs synthesize: {} chars", text.len());
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": self.model,
                "voice_settings": {"stability": 0.5, "similarity_boost": 0.75},
            }))
            .send()
            .await
            .context("Failed to send request to ElevenLabs")?;

        let resp = ProviderErrorHandler::check_http_status(resp, "ElevenLabs").await?;
        let mime_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .context("Failed to read ElevenLabs audio")?
            .to_vec();
        if bytes.is_empty() {
            anyhow::bail!("ElevenLabs returned empty audio");
        }
        Ok(SynthesizedAudio { bytes, mime_type })
    }
}

#[cfg(test)]
mod tests;
