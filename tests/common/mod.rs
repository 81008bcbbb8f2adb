// Shared test helpers — not all items used by every test binary.
#![allow(unused)]

use async_trait::async_trait;
use chrono::{NaiveTime, TimeZone, Utc};
use leadline::booking::SlotManager;
use leadline::config::{Config, ResilienceConfig};
use leadline::conversation::{Channel, ContentType, ConversationEngine, InboundEvent};
use leadline::errors::LeadlineError;
use leadline::providers::base::{
    Attendee, CalendarBackend, ChatProvider, ChatRequest, ChatResponse, ContactSnapshot,
    CrmClient, DateRange, FunctionCall, Slot, SpeechToText, SynthesizedAudio, TextToSpeech,
    Transcript,
};
use leadline::providers::resilient::{GatewayServices, ServiceGateway};
use leadline::store::Store;
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

// --- Chat ---

pub enum Step {
    Reply(ChatResponse),
    /// Transient upstream failure (counts against the breaker).
    Down,
    /// Never answers.
    Hang,
}

pub fn text(content: &str) -> Step {
    Step::Reply(ChatResponse::text(content))
}

pub fn function(name: &str, arguments: Value) -> Step {
    Step::Reply(ChatResponse {
        function_calls: vec![FunctionCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments,
        }],
        ..ChatResponse::default()
    })
}

#[derive(Default)]
pub struct MockChat {
    steps: Mutex<VecDeque<Step>>,
    pub calls: AtomicUsize,
}

impl MockChat {
    pub fn with_steps(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    async fn chat(&self, _req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(resp)) => Ok(resp),
            Some(Step::Down) => Err(LeadlineError::Provider {
                message: "502 bad gateway".into(),
                retryable: true,
            }
            .into()),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ChatResponse::text("too late"))
            }
            None => Ok(ChatResponse::text("Thanks, noted.")),
        }
    }
}

// --- Calendar ---

/// Every hour free unless already booked.
#[derive(Default)]
pub struct MockCalendar {
    pub events: Mutex<HashMap<String, Slot>>,
    pub creates: AtomicUsize,
    pub down: AtomicBool,
}

impl MockCalendar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check_up(&self) -> anyhow::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("calendar connection reset");
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarBackend for MockCalendar {
    async fn list_free_slots(
        &self,
        range: &DateRange,
        duration_minutes: u32,
    ) -> anyhow::Result<Vec<Slot>> {
        self.check_up()?;
        let taken: Vec<Slot> = self.events.lock().unwrap().values().copied().collect();
        Ok(range
            .days()
            .flat_map(|day| {
                (0..24).map(move |h| {
                    Slot::new(day, NaiveTime::from_hms_opt(h, 0, 0).unwrap(), duration_minutes)
                })
            })
            .filter(|s| !taken.iter().any(|t| t.date == s.date && t.time == s.time))
            .collect())
    }

    async fn create_event(
        &self,
        slot: &Slot,
        _attendee: &Attendee,
        reference: &str,
    ) -> anyhow::Result<String> {
        self.check_up()?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .insert(reference.to_string(), *slot);
        Ok(format!("evt-{}", reference))
    }

    async fn find_event(&self, reference: &str) -> anyhow::Result<Option<String>> {
        self.check_up()?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .contains_key(reference)
            .then(|| format!("evt-{}", reference)))
    }

    async fn move_event(&self, event_id: &str, slot: &Slot, reference: &str) -> anyhow::Result<()> {
        self.check_up()?;
        let mut events = self.events.lock().unwrap();
        events.remove(event_id.trim_start_matches("evt-"));
        events.insert(reference.to_string(), *slot);
        Ok(())
    }

    async fn cancel_event(&self, event_id: &str) -> anyhow::Result<()> {
        self.check_up()?;
        let reference = event_id.trim_start_matches("evt-");
        self.events.lock().unwrap().remove(reference);
        Ok(())
    }
}

// --- CRM ---

#[derive(Default)]
pub struct MockCrm {
    pub down: AtomicBool,
    pub contacts: Mutex<Vec<ContactSnapshot>>,
}

impl MockCrm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn upserts(&self) -> usize {
        self.contacts.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<ContactSnapshot> {
        self.contacts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CrmClient for MockCrm {
    async fn upsert_contact(&self, contact: &ContactSnapshot) -> anyhow::Result<String> {
        if self.down.load(Ordering::SeqCst) {
            return Err(LeadlineError::Provider {
                message: "HubSpot 400: property does not exist".into(),
                retryable: false,
            }
            .into());
        }
        self.contacts.lock().unwrap().push(contact.clone());
        Ok(format!("hs-{}", contact.phone))
    }
}

// --- Speech ---

pub struct MockSpeech {
    pub transcript: String,
}

#[async_trait]
impl SpeechToText for MockSpeech {
    async fn transcribe(&self, _audio: &[u8], _mime: &str, _lang: &str) -> anyhow::Result<Transcript> {
        Ok(Transcript {
            text: self.transcript.clone(),
            confidence: Some(0.9),
        })
    }
}

#[async_trait]
impl TextToSpeech for MockSpeech {
    async fn synthesize(&self, text: &str) -> anyhow::Result<SynthesizedAudio> {
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            mime_type: "audio/mpeg".into(),
        })
    }
}

// --- Wiring ---

pub struct Services {
    pub chat: Arc<MockChat>,
    pub calendar: Arc<MockCalendar>,
    pub crm: Arc<MockCrm>,
    pub speech: Arc<MockSpeech>,
}

impl Services {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            chat: MockChat::with_steps(steps),
            calendar: MockCalendar::new(),
            crm: MockCrm::new(),
            speech: Arc::new(MockSpeech {
                transcript: "Hi, I'm after a quote for a loft conversion".into(),
            }),
        }
    }

    /// Gateway with short retry delays.
    pub fn gateway(&self) -> Arc<ServiceGateway> {
        Arc::new(self.build_gateway())
    }

    pub fn build_gateway(&self) -> ServiceGateway {
        let mut resilience = ResilienceConfig::default();
        resilience.retry.initial_delay_ms = 5;
        resilience.retry.max_delay_ms = 20;
        ServiceGateway::new(
            GatewayServices {
                chat: self.chat.clone(),
                speech_to_text: self.speech.clone(),
                text_to_speech: self.speech.clone(),
                crm: self.crm.clone(),
                calendar: self.calendar.clone(),
            },
            &resilience,
        )
    }
}

/// Store, gateway, slots and engine over mocks, with the clock fixed at
/// Wednesday 2024-01-10 08:00 UTC.
pub struct TestApp {
    pub services: Services,
    pub store: Arc<Store>,
    pub gateway: Arc<ServiceGateway>,
    pub slots: Arc<SlotManager>,
    pub engine: Arc<ConversationEngine>,
    pub config: Config,
    _dir: TempDir,
}

impl TestApp {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_config(steps, Config::default())
    }

    pub fn with_config(steps: Vec<Step>, config: Config) -> Self {
        let services = Services::new(steps);
        let (dir, store) = temp_store();
        let gateway = services.gateway();
        let slots = Arc::new(
            SlotManager::new(
                store.clone(),
                gateway.clone(),
                config.booking.clone(),
                chrono_tz::Europe::London,
            )
            .with_clock(|| Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()),
        );
        let engine = Arc::new(
            ConversationEngine::new(store.clone(), gateway.clone(), slots.clone(), &config)
                .unwrap(),
        );
        Self {
            services,
            store,
            gateway,
            slots,
            engine,
            config,
            _dir: dir,
        }
    }
}

pub fn whatsapp_text(identity: &str, content: &str) -> InboundEvent {
    InboundEvent {
        external_identity: identity.to_string(),
        channel: Channel::WhatsAppText,
        content: content.to_string(),
        content_type: ContentType::Text,
    }
}

pub fn phone_turn(identity: &str, content: &str) -> InboundEvent {
    InboundEvent {
        external_identity: identity.to_string(),
        channel: Channel::PhoneCall,
        content: content.to_string(),
        content_type: ContentType::Audio,
    }
}
