//! Live phone calls through Vapi. Status updates drive the call record,
//! final user transcripts become `phone_call` turns, function calls from the
//! platform's own model run against the engine, and the end-of-call report
//! closes the conversation.

use crate::channels::base::{AdapterError, ChannelAdapter, IdentityGate};
use crate::config::{Config, VoiceConfig};
use crate::conversation::{
    Channel, ContentType, Conversation, ConversationEngine, ConversationStatus, InboundEvent,
};
use crate::providers::base::FunctionCall;
use crate::store::{CallDirection, CallStatus, PhoneCall};
use crate::utils::{mask_phone, normalize_phone, sanitize_for_speech};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Payload ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VapiCall {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub customer: Option<VapiCustomer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VapiCustomer {
    #[serde(default)]
    pub number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VapiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VapiEvent {
    AssistantRequest {
        #[serde(default)]
        call: VapiCall,
    },
    StatusUpdate {
        status: String,
        #[serde(default)]
        call: VapiCall,
        #[serde(default, rename = "endedReason")]
        ended_reason: Option<String>,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: VapiFunctionCall,
        #[serde(default)]
        call: VapiCall,
    },
    Transcript {
        #[serde(default)]
        role: String,
        #[serde(default, rename = "transcriptType")]
        transcript_type: Option<String>,
        transcript: String,
        #[serde(default)]
        call: VapiCall,
    },
    EndOfCallReport {
        #[serde(default)]
        call: VapiCall,
        #[serde(default, rename = "durationSeconds")]
        duration_seconds: Option<f64>,
        #[serde(default, rename = "recordingUrl")]
        recording_url: Option<String>,
        #[serde(default, rename = "endedReason")]
        ended_reason: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl VapiEvent {
    /// Vapi wraps server messages in `{"message": ..}`; older payloads don't.
    pub fn parse(body: &[u8]) -> Result<Self, AdapterError> {
        let mut root: Value = serde_json::from_slice(body)?;
        let event = match root.get_mut("message") {
            Some(inner) if inner.is_object() => inner.take(),
            _ => root,
        };
        Ok(serde_json::from_value(event)?)
    }

    fn call(&self) -> Option<&VapiCall> {
        match self {
            Self::AssistantRequest { call }
            | Self::StatusUpdate { call, .. }
            | Self::FunctionCall { call, .. }
            | Self::Transcript { call, .. }
            | Self::EndOfCallReport { call, .. } => Some(call),
            Self::Other => None,
        }
    }
}

/// Map a Vapi status to the call state machine. `ended` is refined by the
/// reason the call ended.
pub fn call_status(status: &str, ended_reason: Option<&str>) -> Option<CallStatus> {
    match status {
        "queued" | "ringing" => Some(CallStatus::Ringing),
        "in-progress" => Some(CallStatus::InProgress),
        "forwarding" => Some(CallStatus::Transferred),
        "ended" => Some(ended_status(ended_reason)),
        _ => None,
    }
}

fn ended_status(reason: Option<&str>) -> CallStatus {
    let reason = reason.unwrap_or_default();
    if reason.contains("voicemail") {
        CallStatus::Voicemail
    } else if reason.contains("forwarded") || reason.contains("transfer") {
        CallStatus::Transferred
    } else if ["error", "failed", "no-answer", "did-not-answer"]
        .iter()
        .any(|r| reason.contains(r))
    {
        CallStatus::Failed
    } else {
        CallStatus::Completed
    }
}

/// How a conversation closes once its call has ended in `status`.
pub fn closing_status(status: CallStatus) -> ConversationStatus {
    match status {
        CallStatus::Transferred => ConversationStatus::Transferred,
        CallStatus::Voicemail | CallStatus::Failed => ConversationStatus::Abandoned,
        _ => ConversationStatus::Completed,
    }
}

fn caller_identity(call: &VapiCall) -> String {
    call.customer
        .as_ref()
        .and_then(|c| c.number.as_deref())
        .filter(|n| !n.trim().is_empty())
        .map_or_else(|| format!("call:{}", call.id), normalize_phone)
}

// ── Adapter ─────────────────────────────────────────────────────

pub struct VoiceAdapter {
    config: VoiceConfig,
    engine: Arc<ConversationEngine>,
    gate: IdentityGate,
}

impl VoiceAdapter {
    pub fn new(config: &Config, engine: Arc<ConversationEngine>) -> Self {
        Self {
            config: config.channels.voice.clone(),
            engine,
            gate: IdentityGate::new(),
        }
    }

    /// The call record and its conversation, created on first sight.
    fn ensure_call(&self, call: &VapiCall) -> Result<(PhoneCall, Conversation), AdapterError> {
        let store = self.engine.store();
        if let Some(existing) = store.get_phone_call(&call.id)? {
            let conversation = store
                .get_conversation(&existing.conversation_id)?
                .ok_or_else(|| {
                    AdapterError::Malformed(format!("call {} lost its conversation", call.id))
                })?;
            return Ok((existing, conversation));
        }

        let identity = caller_identity(call);
        let conversation = self.engine.open(Channel::PhoneCall, &identity)?;
        let direction = if call.kind.as_deref() == Some("outboundPhoneCall") {
            CallDirection::Outbound
        } else {
            CallDirection::Inbound
        };
        let record = store.start_phone_call(&call.id, &conversation.id, direction)?;
        info!(
            "{} call {} from {} on conversation {}",
            direction,
            call.id,
            mask_phone(&identity),
            conversation.id
        );
        Ok((record, conversation))
    }

    fn on_status(&self, call: &VapiCall, status: &str, ended_reason: Option<&str>) -> Result<Value, AdapterError> {
        let Some(next) = call_status(status, ended_reason) else {
            debug!("call {}: ignoring status '{}'", call.id, status);
            return Ok(json!({ "received": true }));
        };
        let (record, conversation) = self.ensure_call(call)?;
        let store = self.engine.store();
        if store.update_call_status(&record.vapi_call_id, next, None, None)? {
            info!("call {} {} -> {}", record.vapi_call_id, record.status, next);
        }
        if next == CallStatus::Transferred {
            self.engine
                .close(&conversation.id, ConversationStatus::Transferred, "call forwarded")?;
        }
        Ok(json!({ "received": true }))
    }

    async fn on_function_call(
        &self,
        call: &VapiCall,
        function: &VapiFunctionCall,
    ) -> Result<Value, AdapterError> {
        let (record, conversation) = self.ensure_call(call)?;
        self.engine
            .store()
            .record_call_function(&record.vapi_call_id, &function.name)?;
        debug!("call {}: function {}", record.vapi_call_id, function.name);

        let request = FunctionCall {
            id: format!("{}:{}", record.vapi_call_id, function.name),
            name: function.name.clone(),
            arguments: function.parameters.clone(),
        };
        let (result, actions) = self.engine.call_function(&conversation, &request).await?;
        Ok(json!({ "result": result, "actions": actions }))
    }

    async fn on_transcript(
        &self,
        call: &VapiCall,
        role: &str,
        transcript_type: Option<&str>,
        transcript: &str,
    ) -> Result<Value, AdapterError> {
        // Only settled customer speech starts a turn
        if role != "user" || transcript_type.is_some_and(|t| t != "final") || transcript.trim().is_empty() {
            return Ok(json!({ "received": true }));
        }
        let (record, conversation) = self.ensure_call(call)?;
        let event = InboundEvent {
            external_identity: conversation.external_identity.clone(),
            channel: Channel::PhoneCall,
            content: transcript.to_string(),
            content_type: ContentType::Audio,
        };
        let reply = self.engine.handle_inbound(&conversation, &event).await?;
        if reply.fallback {
            warn!("call {}: answered with fallback", record.vapi_call_id);
        }
        Ok(json!({
            "content": sanitize_for_speech(&reply.content),
            "fallback": reply.fallback,
            "actions": reply.suggested_actions,
        }))
    }

    fn on_end_of_call(
        &self,
        call: &VapiCall,
        duration_seconds: Option<f64>,
        recording_url: Option<&str>,
        ended_reason: Option<&str>,
    ) -> Result<Value, AdapterError> {
        let (record, conversation) = self.ensure_call(call)?;
        let store = self.engine.store();
        let duration = duration_seconds.map(|d| d.max(0.0).round() as u32);
        let status = ended_status(ended_reason);
        if !store.update_call_status(&record.vapi_call_id, status, duration, recording_url)? {
            // Already ended by a status update
            store.attach_call_report(&record.vapi_call_id, duration, recording_url)?;
        }

        // A forward seen earlier by a status update wins over the report
        let final_status = store
            .get_phone_call(&record.vapi_call_id)?
            .map_or(status, |c| c.status);
        let reason = format!("call ended: {}", ended_reason.unwrap_or("unknown"));
        self.engine
            .close(&conversation.id, closing_status(final_status), &reason)?;
        info!(
            "call {} ended after {}s ({})",
            record.vapi_call_id,
            duration.unwrap_or(0),
            ended_reason.unwrap_or("unknown")
        );
        Ok(json!({ "received": true }))
    }
}

#[async_trait]
impl ChannelAdapter for VoiceAdapter {
    fn name(&self) -> &'static str {
        "voice"
    }

    fn signature_header(&self) -> &'static str {
        "x-vapi-signature"
    }

    fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    async fn handle_webhook(&self, body: &[u8]) -> Result<Value, AdapterError> {
        let event = VapiEvent::parse(body)?;
        if matches!(event, VapiEvent::AssistantRequest { .. }) {
            return Ok(json!({ "assistant": { "firstMessage": self.config.first_message } }));
        }
        let Some(call) = event.call() else {
            debug!("unhandled vapi event");
            return Ok(json!({ "received": true }));
        };
        if call.id.trim().is_empty() {
            return Err(AdapterError::Malformed("event without call id".into()));
        }
        let _turn = self.gate.lock(&caller_identity(call)).await;

        match &event {
            VapiEvent::StatusUpdate {
                call,
                status,
                ended_reason,
            } => self.on_status(call, status, ended_reason.as_deref()),
            VapiEvent::FunctionCall {
                call,
                function_call,
            } => self.on_function_call(call, function_call).await,
            VapiEvent::Transcript {
                call,
                role,
                transcript_type,
                transcript,
            } => {
                self.on_transcript(call, role, transcript_type.as_deref(), transcript)
                    .await
            }
            VapiEvent::EndOfCallReport {
                call,
                duration_seconds,
                recording_url,
                ended_reason,
            } => self.on_end_of_call(
                call,
                *duration_seconds,
                recording_url.as_deref(),
                ended_reason.as_deref(),
            ),
            VapiEvent::AssistantRequest { .. } | VapiEvent::Other => Ok(json!({ "received": true })),
        }
    }
}
