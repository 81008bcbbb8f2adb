//! In-memory fakes for the external capabilities, shared by unit tests.

use crate::config::ResilienceConfig;
use crate::providers::base::{
    Attendee, CalendarBackend, ChatProvider, ChatRequest, ChatResponse, ContactSnapshot,
    CrmClient, DateRange, FunctionCall, Slot, SpeechToText, SynthesizedAudio, TextToSpeech,
    Transcript,
};
use crate::providers::resilient::{GatewayServices, ServiceGateway};
use crate::store::Store;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveTime;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn temp_store() -> (TempDir, Arc<Store>) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("leadline.db")).unwrap();
    (dir, Arc::new(store))
}

/// What the next chat call does.
pub enum ChatStep {
    Reply(ChatResponse),
    Fail,
    Hang,
}

#[derive(Default)]
pub struct ScriptedChat {
    steps: Mutex<VecDeque<ChatStep>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new(steps: Vec<ChatStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, step: ChatStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub fn reply(text: &str) -> ChatStep {
    ChatStep::Reply(ChatResponse::text(text))
}

pub fn call(name: &str, arguments: Value) -> ChatStep {
    ChatStep::Reply(ChatResponse {
        function_calls: vec![FunctionCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments,
        }],
        ..ChatResponse::default()
    })
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(req.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(ChatStep::Reply(resp)) => Ok(resp),
            Some(ChatStep::Fail) => Err(crate::errors::LeadlineError::Provider {
                message: "503 service unavailable".into(),
                retryable: false,
            }
            .into()),
            Some(ChatStep::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ChatResponse::text("too late"))
            }
            None => Ok(ChatResponse::text("Thanks, noted.")),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Ok,
    /// Creates the event but the response never arrives.
    CreateThenHang,
    Fail,
}

/// Calendar with every hour free unless booked or marked busy.
pub struct FakeCalendar {
    pub events: Mutex<HashMap<String, String>>,
    pub busy: Mutex<Vec<Slot>>,
    pub cancelled: Mutex<Vec<String>>,
    pub moved: Mutex<Vec<(String, Slot)>>,
    pub create_mode: Mutex<CreateMode>,
    pub create_calls: AtomicUsize,
    pub down: AtomicBool,
    pub create_delay: Mutex<Duration>,
}

impl FakeCalendar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(HashMap::new()),
            busy: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            moved: Mutex::new(Vec::new()),
            create_mode: Mutex::new(CreateMode::Ok),
            create_calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
            create_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_create_mode(&self, mode: CreateMode) {
        *self.create_mode.lock().unwrap() = mode;
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("calendar connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarBackend for FakeCalendar {
    async fn list_free_slots(&self, range: &DateRange, duration_minutes: u32) -> Result<Vec<Slot>> {
        self.check_up()?;
        let busy = self.busy.lock().unwrap().clone();
        let mut slots = Vec::new();
        for day in range.days() {
            for hour in 0..24 {
                let slot = Slot::new(
                    day,
                    NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                    duration_minutes,
                );
                if !busy.iter().any(|b| b.date == slot.date && b.time == slot.time) {
                    slots.push(slot);
                }
            }
        }
        Ok(slots)
    }

    async fn create_event(&self, _slot: &Slot, _who: &Attendee, reference: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mode = *self.create_mode.lock().unwrap();
        match mode {
            CreateMode::Fail => Err(crate::errors::LeadlineError::Provider {
                message: "400 invalid attendee".into(),
                retryable: false,
            }
            .into()),
            CreateMode::Ok | CreateMode::CreateThenHang => {
                let id = format!("evt-{}", reference);
                self.events
                    .lock()
                    .unwrap()
                    .insert(reference.to_string(), id.clone());
                if mode == CreateMode::CreateThenHang {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(id)
            }
        }
    }

    async fn find_event(&self, reference: &str) -> Result<Option<String>> {
        self.check_up()?;
        Ok(self.events.lock().unwrap().get(reference).cloned())
    }

    async fn move_event(&self, event_id: &str, slot: &Slot, reference: &str) -> Result<()> {
        self.check_up()?;
        let mut events = self.events.lock().unwrap();
        events.retain(|_, id| id != event_id);
        events.insert(reference.to_string(), event_id.to_string());
        self.moved.lock().unwrap().push((event_id.to_string(), *slot));
        Ok(())
    }

    async fn cancel_event(&self, event_id: &str) -> Result<()> {
        self.check_up()?;
        self.events.lock().unwrap().retain(|_, id| id != event_id);
        self.cancelled.lock().unwrap().push(event_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCrm {
    pub failing: AtomicBool,
    pub contacts: Mutex<Vec<ContactSnapshot>>,
}

impl RecordingCrm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn upserts(&self) -> usize {
        self.contacts.lock().unwrap().len()
    }
}

#[async_trait]
impl CrmClient for RecordingCrm {
    async fn upsert_contact(&self, contact: &ContactSnapshot) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(crate::errors::LeadlineError::Provider {
                message: "CRM 400".into(),
                retryable: false,
            }
            .into());
        }
        self.contacts.lock().unwrap().push(contact.clone());
        Ok(format!("crm-{}", contact.phone))
    }
}

#[derive(Default)]
pub struct FakeSpeech {
    pub failing: AtomicBool,
    pub transcript: Mutex<String>,
}

impl FakeSpeech {
    pub fn new(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            failing: AtomicBool::new(false),
            transcript: Mutex::new(transcript.to_string()),
        })
    }
}

#[async_trait]
impl SpeechToText for FakeSpeech {
    async fn transcribe(&self, _audio: &[u8], _mime: &str, _lang: &str) -> Result<Transcript> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(crate::errors::LeadlineError::Auth("bad key".into()).into());
        }
        Ok(Transcript {
            text: self.transcript.lock().unwrap().clone(),
            confidence: Some(0.95),
        })
    }
}

#[async_trait]
impl TextToSpeech for FakeSpeech {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(crate::errors::LeadlineError::Auth("bad key".into()).into());
        }
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            mime_type: "audio/mpeg".into(),
        })
    }
}

pub struct Fakes {
    pub chat: Arc<ScriptedChat>,
    pub speech: Arc<FakeSpeech>,
    pub crm: Arc<RecordingCrm>,
    pub calendar: Arc<FakeCalendar>,
}

impl Fakes {
    pub fn new(steps: Vec<ChatStep>) -> Self {
        Self {
            chat: ScriptedChat::new(steps),
            speech: FakeSpeech::new("I'd like a kitchen extension"),
            crm: RecordingCrm::new(),
            calendar: FakeCalendar::new(),
        }
    }

    pub fn services(&self) -> GatewayServices {
        GatewayServices {
            chat: self.chat.clone(),
            speech_to_text: self.speech.clone(),
            text_to_speech: self.speech.clone(),
            crm: self.crm.clone(),
            calendar: self.calendar.clone(),
        }
    }

    pub fn gateway(&self) -> Arc<ServiceGateway> {
        let mut config = ResilienceConfig::default();
        config.retry.initial_delay_ms = 10;
        config.retry.max_delay_ms = 50;
        Arc::new(ServiceGateway::new(self.services(), &config))
    }
}

/// Engine with the booking clock fixed at Wednesday 2024-01-10 08:00 UTC.
pub fn fixed_clock_engine(
    store: &Arc<Store>,
    gateway: &Arc<ServiceGateway>,
    config: &crate::config::Config,
) -> Arc<crate::conversation::ConversationEngine> {
    use chrono::TimeZone;
    let slots = crate::booking::SlotManager::new(
        store.clone(),
        gateway.clone(),
        config.booking.clone(),
        chrono_tz::Europe::London,
    )
    .with_clock(|| chrono::Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap());
    Arc::new(
        crate::conversation::ConversationEngine::new(
            store.clone(),
            gateway.clone(),
            Arc::new(slots),
            config,
        )
        .unwrap(),
    )
}
