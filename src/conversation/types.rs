use crate::providers::base::Slot;
use crate::scoring::{ExtractedInfo, LeadTier};
use chrono::{DateTime, Utc};
use serde::Serialize;

string_enum! {
    /// Where a conversation takes place. Each channel has its own active
    /// conversation per identity.
    pub enum Channel {
        WhatsAppText => "whatsapp_text",
        WhatsAppVoice => "whatsapp_voice",
        PhoneCall => "phone_call",
    }
}

impl Channel {
    /// Live audio stream with a caller waiting on the line.
    pub fn is_live_voice(self) -> bool {
        matches!(self, Self::PhoneCall)
    }

    /// How replies on this channel reach the customer.
    pub fn reply_content_type(self) -> ContentType {
        match self {
            Self::WhatsAppText => ContentType::Text,
            Self::WhatsAppVoice => ContentType::VoiceNote,
            Self::PhoneCall => ContentType::Audio,
        }
    }

    /// Channels whose replies are spoken.
    pub fn is_spoken(self) -> bool {
        !matches!(self, Self::WhatsAppText)
    }
}

string_enum! {
    pub enum ConversationStatus {
        Active => "active",
        Completed => "completed",
        Transferred => "transferred",
        Abandoned => "abandoned",
    }
}

impl ConversationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

string_enum! {
    pub enum MessageRole {
        User => "user",
        Assistant => "assistant",
        System => "system",
    }
}

string_enum! {
    pub enum ContentType {
        Text => "text",
        Audio => "audio",
        VoiceNote => "voice_note",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub external_identity: String,
    pub channel: Channel,
    pub status: ConversationStatus,
    /// Always `score(extracted_info)`; `None` until something was extracted.
    pub lead_score: Option<u8>,
    pub lead_tier: Option<LeadTier>,
    pub extracted_info: ExtractedInfo,
    pub survey_booked: bool,
    pub crm_contact_id: Option<String>,
    pub close_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub conversation_id: String,
    /// Per-conversation insertion order, starting at 1.
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub content_type: ContentType,
    pub sentiment: Option<String>,
    pub token_count: Option<u32>,
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// A message about to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub content_type: ContentType,
    pub sentiment: Option<String>,
    pub token_count: Option<u32>,
    pub latency_ms: Option<u64>,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            role,
            content: content.into(),
            content_type,
            sentiment: None,
            token_count: None,
            latency_ms: None,
        }
    }
}

/// Channel-neutral inbound message produced by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub external_identity: String,
    pub channel: Channel,
    pub content: String,
    pub content_type: ContentType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Hand the customer to a person.
    Transfer { reason: String },
    /// Slots the customer can pick from.
    OfferSlots { slots: Vec<Slot> },
    /// A booking the calendar has not confirmed yet.
    BookingPending { booking_id: String },
}

/// Channel-neutral reply for an adapter to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub content: String,
    pub content_type: ContentType,
    pub suggested_actions: Vec<SuggestedAction>,
    /// Set when the reply is the canned fallback rather than an AI answer.
    pub fallback: bool,
}

impl OutboundEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Text,
            suggested_actions: Vec::new(),
            fallback: false,
        }
    }

    pub fn transfer_reason(&self) -> Option<&str> {
        self.suggested_actions.iter().find_map(|a| match a {
            SuggestedAction::Transfer { reason } => Some(reason.as_str()),
            SuggestedAction::OfferSlots { .. } | SuggestedAction::BookingPending { .. } => None,
        })
    }
}
