//! WhatsApp Business adapter (360dialog). Text messages become
//! `whatsapp_text` turns; voice notes are downloaded, transcribed and become
//! `whatsapp_voice` turns answered with a synthesized voice note.

use crate::channels::base::{AdapterError, ChannelAdapter, IdentityGate, split_message};
use crate::config::{Config, WhatsAppConfig};
use crate::conversation::{Channel, ContentType, ConversationEngine, InboundEvent, OutboundEvent};
use crate::providers::base::Capability;
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::resilient::{RetryPolicy, ServiceGateway};
use crate::utils::{mask_phone, normalize_phone, sanitize_for_speech};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::Deserialize;
use serde_json::{Value, json};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// WhatsApp rejects text bodies longer than this.
const MAX_TEXT_LEN: usize = 4096;

/// Message ids remembered to drop vendor redeliveries.
const SEEN_CAPACITY: usize = 4096;

const UNSUPPORTED_REPLY: &str = "Thanks for your message! I can best help with text messages \
                                 or voice notes. How can I help you today?";
const UNREADABLE_VOICE_NOTE: &str = "Sorry, I couldn't listen to that voice note. \
                                     Could you type your message instead?";

// ── Payload ─────────────────────────────────────────────────────

/// A 360dialog delivery. Accepts both the flat on-premise shape
/// (`messages` at the top) and the Cloud API shape (`entry[].changes[].value`).
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub messages: Vec<WaMessage>,
    #[serde(default)]
    pub entry: Vec<WaEntry>,
    #[serde(default, rename = "hub.mode")]
    pub hub_mode: Option<String>,
    #[serde(default, rename = "hub.challenge")]
    pub hub_challenge: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaEntry {
    #[serde(default)]
    pub changes: Vec<WaChange>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaChange {
    #[serde(default)]
    pub value: WaValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct WaValue {
    #[serde(default)]
    pub messages: Vec<WaMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<WaText>,
    #[serde(default)]
    pub audio: Option<WaMedia>,
    #[serde(default)]
    pub voice: Option<WaMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaText {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaMedia {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl WebhookPayload {
    pub fn into_messages(self) -> Vec<WaMessage> {
        let mut messages = self.messages;
        messages.extend(
            self.entry
                .into_iter()
                .flat_map(|e| e.changes)
                .flat_map(|c| c.value.messages),
        );
        messages
    }
}

/// What an inbound WhatsApp message turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Turn(InboundEvent),
    /// Answer straight away without involving the engine.
    Notice(String),
}

// ── Adapter ─────────────────────────────────────────────────────

pub struct WhatsAppAdapter {
    config: WhatsAppConfig,
    language: String,
    engine: Arc<ConversationEngine>,
    gateway: Arc<ServiceGateway>,
    gate: IdentityGate,
    seen: Mutex<LruCache<String, ()>>,
    client: reqwest::Client,
}

impl WhatsAppAdapter {
    pub fn new(config: &Config, engine: Arc<ConversationEngine>, gateway: Arc<ServiceGateway>) -> Self {
        Self {
            config: config.channels.whatsapp.clone(),
            language: config.providers.deepgram.language.clone(),
            engine,
            gateway,
            gate: IdentityGate::new(),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(SEEN_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Turn one vendor message into an engine event. Voice notes are
    /// transcribed here; a note that cannot be transcribed gets a notice.
    pub async fn normalize_inbound(&self, identity: &str, msg: &WaMessage) -> Normalized {
        match msg.kind.as_str() {
            "text" => match &msg.text {
                Some(text) if !text.body.trim().is_empty() => Normalized::Turn(InboundEvent {
                    external_identity: identity.to_string(),
                    channel: Channel::WhatsAppText,
                    content: text.body.clone(),
                    content_type: ContentType::Text,
                }),
                _ => Normalized::Notice(UNSUPPORTED_REPLY.to_string()),
            },
            "audio" | "voice" => {
                let Some(media) = msg.audio.as_ref().or(msg.voice.as_ref()) else {
                    return Normalized::Notice(UNREADABLE_VOICE_NOTE.to_string());
                };
                match self.transcribe_voice_note(media).await {
                    Ok(transcript) if !transcript.trim().is_empty() => {
                        Normalized::Turn(InboundEvent {
                            external_identity: identity.to_string(),
                            channel: Channel::WhatsAppVoice,
                            content: transcript,
                            content_type: ContentType::VoiceNote,
                        })
                    }
                    Ok(_) => {
                        debug!("voice note {} from {} was silent", msg.id, mask_phone(identity));
                        Normalized::Notice(UNREADABLE_VOICE_NOTE.to_string())
                    }
                    Err(e) => {
                        warn!(
                            "voice note {} from {} not transcribed: {:#}",
                            msg.id,
                            mask_phone(identity),
                            e
                        );
                        Normalized::Notice(UNREADABLE_VOICE_NOTE.to_string())
                    }
                }
            }
            other => {
                debug!("whatsapp: unsupported message type '{}'", other);
                Normalized::Notice(UNSUPPORTED_REPLY.to_string())
            }
        }
    }

    async fn transcribe_voice_note(&self, media: &WaMedia) -> Result<String> {
        let audio = self.download_media(&media.id).await?;
        let mime = media.mime_type.as_deref().unwrap_or("audio/ogg");
        let transcript = self
            .gateway
            .transcribe(&audio, mime, &self.language, None)
            .await?;
        debug!(
            "voice note {} transcribed ({} chars, confidence {:?})",
            media.id,
            transcript.text.len(),
            transcript.confidence
        );
        Ok(transcript.text)
    }

    /// Deliver a reply. Voice replies fall back to text when synthesis or
    /// upload fails.
    pub async fn render_outbound(&self, to: &str, reply: &OutboundEvent) -> Result<()> {
        if reply.content_type == ContentType::VoiceNote {
            match self.send_voice_note(to, &reply.content).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(
                    "voice reply to {} failed, sending text instead: {:#}",
                    mask_phone(to),
                    e
                ),
            }
        }
        for chunk in split_message(&reply.content, MAX_TEXT_LEN) {
            self.send_text(to, &chunk).await?;
        }
        Ok(())
    }

    async fn send_voice_note(&self, to: &str, text: &str) -> Result<()> {
        let audio = self
            .gateway
            .synthesize(&sanitize_for_speech(text), None)
            .await?;
        let media_id = self.upload_media(audio.bytes, &audio.mime_type).await?;
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "audio",
            "audio": {"id": media_id},
        }))
        .await
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {"body": text},
        }))
        .await?;
        debug!("whatsapp text sent to {} ({} chars)", mask_phone(to), text.len());
        Ok(())
    }

    async fn post_message(&self, payload: Value) -> Result<()> {
        let response = self
            .client
            .post(self.api_url("messages"))
            .header("D360-API-KEY", &self.config.api_key)
            .json(&payload)
            .send()
            .await
            .context("whatsapp send request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
            anyhow::bail!("whatsapp API error ({}): {}", status, body);
        }
        Ok(())
    }

    /// Fetch a voice note under the speech-to-text breaker and timeout: a
    /// stalled media host is as unusable as a stalled transcriber.
    async fn download_media(&self, media_id: &str) -> Result<Vec<u8>> {
        let bytes = self
            .gateway
            .invoke(Capability::SpeechToText, RetryPolicy::Idempotent, None, move || {
                self.fetch_media(media_id)
            })
            .await?;
        debug!("downloaded media {} ({} bytes)", media_id, bytes.len());
        Ok(bytes)
    }

    async fn fetch_media(&self, media_id: &str) -> Result<Vec<u8>> {
        #[derive(Deserialize)]
        struct MediaInfo {
            url: String,
        }

        let response = self
            .client
            .get(self.api_url(&format!("media/{}", media_id)))
            .header("D360-API-KEY", &self.config.api_key)
            .send()
            .await
            .context("whatsapp media lookup failed")?;
        let response = ProviderErrorHandler::check_http_status(response, "WhatsApp").await?;
        let info: MediaInfo = response.json().await.context("media lookup returned no url")?;
        let response = self
            .client
            .get(&info.url)
            .header("D360-API-KEY", &self.config.api_key)
            .send()
            .await
            .context("whatsapp media download failed")?;
        let bytes = ProviderErrorHandler::check_http_status(response, "WhatsApp")
            .await?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn upload_media(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Uploaded {
            id: String,
        }

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("reply")
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);
        let uploaded: Uploaded = self
            .client
            .post(self.api_url("media"))
            .header("D360-API-KEY", &self.config.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("media upload returned no id")?;
        Ok(uploaded.id)
    }

    /// Handle one message under its sender's gate. Returns false for a
    /// redelivery that was already answered.
    async fn process(&self, msg: &WaMessage) -> Result<bool, AdapterError> {
        if msg.from.trim().is_empty() {
            return Err(AdapterError::Malformed(format!("message {} has no sender", msg.id)));
        }
        let identity = normalize_phone(&msg.from);
        let _turn = self.gate.lock(&identity).await;

        if self.seen.lock().is_ok_and(|seen| seen.contains(&msg.id)) {
            debug!("whatsapp message {} already handled", msg.id);
            return Ok(false);
        }

        match self.normalize_inbound(&identity, msg).await {
            Normalized::Turn(event) => {
                let (conversation, reply) = self.engine.handle(&event).await?;
                info!(
                    "whatsapp {} from {} answered on conversation {}{}",
                    event.content_type,
                    mask_phone(&identity),
                    conversation.id,
                    if reply.fallback { " (fallback)" } else { "" }
                );
                if let Err(e) = self.render_outbound(&identity, &reply).await {
                    error!(
                        "reply for conversation {} not delivered: {:#}",
                        conversation.id, e
                    );
                }
            }
            Normalized::Notice(text) => {
                if let Err(e) = self.send_text(&identity, &text).await {
                    error!("notice to {} not delivered: {:#}", mask_phone(&identity), e);
                }
            }
        }

        if let Ok(mut seen) = self.seen.lock() {
            seen.put(msg.id.clone(), ());
        }
        Ok(true)
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    fn signature_header(&self) -> &'static str {
        "x-hub-signature-256"
    }

    fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    async fn handle_webhook(&self, body: &[u8]) -> Result<Value, AdapterError> {
        let payload: WebhookPayload = serde_json::from_slice(body)?;

        if payload.hub_mode.as_deref() == Some("subscribe") {
            info!("whatsapp webhook verification");
            return Ok(json!({ "challenge": payload.hub_challenge }));
        }

        let messages = payload.into_messages();
        if messages.is_empty() {
            debug!("whatsapp webhook without messages");
            return Ok(json!({ "status": "no_messages" }));
        }

        let mut handled = 0;
        for msg in &messages {
            match self.process(msg).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                // One bad message must not make the vendor redeliver the batch
                Err(AdapterError::Malformed(reason)) => {
                    warn!("whatsapp message {} skipped: {}", msg.id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(json!({ "status": "received", "count": handled }))
    }
}
