use crate::config::DeepgramConfig;
use crate::providers::base::{SpeechToText, Transcript};
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const API_URL: &str = "https://api.deepgram.com/v1/listen";

/// Deepgram pre-recorded transcription.
pub struct DeepgramTranscriber {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl DeepgramTranscriber {
    pub fn new(config: &DeepgramConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| API_URL.to_string()),
            client: provider_http_client(),
        }
    }
}

fn parse_transcript(json: &Value) -> Transcript {
    let best = &json["results"]["channels"][0]["alternatives"][0];
    Transcript {
        text: best["transcript"].as_str().unwrap_or_default().trim().to_string(),
        confidence: best["confidence"].as_f64(),
    }
}

#[async_trait]
impl SpeechToText for DeepgramTranscriber {
    async fn transcribe(&self, audio: &[u8], mime_type: &str, language: &str) -> Result<Transcript> {
        debug!(
            "deepgram transcribe: {} bytes, mime={}, language={}",
            audio.len(),
            mime_type,
            language
        );
        let resp = self
            .client
            .post(&self.base_url)
            .query(&[
                ("model", self.model.as_str()),
                ("language", language),
                ("smart_format", "true"),
                ("punctuate", "true"),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", mime_type)
            .body(audio.to_vec())
            .send()
            .await
            .context("Failed to send audio to Deepgram")?;

        let json = ProviderErrorHandler::check_json(resp, "Deepgram").await?;
        let transcript = parse_transcript(&json);
        debug!(
            "deepgram transcript: {} chars, confidence={:?}",
            transcript.text.len(),
            transcript.confidence
        );
        Ok(transcript)
    }
}
