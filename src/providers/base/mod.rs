use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The five external capabilities the core depends on. Each gets its own
/// circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    SpeechToText,
    TextToSpeech,
    Crm,
    Calendar,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Self::Chat,
        Self::SpeechToText,
        Self::TextToSpeech,
        Self::Crm,
        Self::Calendar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::SpeechToText => "speech_to_text",
            Self::TextToSpeech => "text_to_speech",
            Self::Crm => "crm",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Outcome of a function the model asked for, fed back on the next round.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Calls requested by the assistant in this turn.
    pub function_calls: Vec<FunctionCall>,
    /// Set on user-role messages that carry a function result.
    pub function_result: Option<FunctionResult>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            function_calls: Vec::new(),
            function_result: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            function_calls: Vec::new(),
            function_result: None,
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<FunctionCall>) -> Self {
        Self {
            function_calls: calls,
            ..Self::assistant(content)
        }
    }

    pub fn function_result(call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            function_result: Some(FunctionResult {
                call_id: call_id.into(),
                content: content.into(),
                is_error,
            }),
            ..Self::user(String::new())
        }
    }
}

/// A function the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub functions: Vec<FunctionSchema>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub function_calls: Vec<FunctionCall>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn has_function_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;
}

// ---------------------------------------------------------------------------
// Speech
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: Option<f64>,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8], mime_type: &str, language: &str)
    -> Result<Transcript>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

// ---------------------------------------------------------------------------
// CRM
// ---------------------------------------------------------------------------

/// What the CRM learns about a lead. Serialized into the retry queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub postcode: Option<String>,
    pub address: Option<String>,
    pub project_type: Option<String>,
    pub budget_range: Option<String>,
    pub timeline: Option<String>,
    pub lead_score: Option<u8>,
    pub lead_tier: Option<String>,
    pub channel: String,
    pub conversation_id: String,
    pub survey_booked: bool,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Create or update the contact keyed by phone. Returns the CRM id.
    async fn upsert_contact(&self, contact: &ContactSnapshot) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

/// A bookable survey appointment in business-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn new(date: NaiveDate, time: NaiveTime, duration_minutes: u32) -> Self {
        Self {
            date,
            time,
            duration_minutes,
        }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start() + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Whether the two `[start, end)` intervals share any time.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }

    /// Human label, e.g. `Tuesday 16 January at 09:00`.
    pub fn label(&self) -> String {
        format!(
            "{} {} at {}",
            weekday_name(self.date.weekday()),
            self.date.format("%-d %B"),
            self.time.format("%H:%M")
        )
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            Self {
                start: end,
                end: start,
            }
        } else {
            Self { start, end }
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub postcode: Option<String>,
}

#[async_trait]
pub trait CalendarBackend: Send + Sync {
    async fn list_free_slots(&self, range: &DateRange, duration_minutes: u32)
    -> Result<Vec<Slot>>;

    /// Create the event. `reference` is stored on the event so it can be
    /// found again with [`CalendarBackend::find_event`].
    async fn create_event(&self, slot: &Slot, attendee: &Attendee, reference: &str)
    -> Result<String>;

    async fn find_event(&self, reference: &str) -> Result<Option<String>>;

    /// Move an existing event to `slot` and re-tag it with `reference`.
    async fn move_event(&self, event_id: &str, slot: &Slot, reference: &str) -> Result<()>;

    async fn cancel_event(&self, event_id: &str) -> Result<()>;
}
