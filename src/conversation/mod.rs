//! Conversation state machine.
//!
//! A conversation is `active` until it is closed exactly once into
//! `completed`, `transferred` or `abandoned`. Each inbound turn persists the
//! user message, asks the model for a reply under a per-channel deadline and
//! runs any functions the model calls. Gateway failures never surface to the
//! customer: they produce the channel's fallback reply and a review flag.

pub mod functions;
pub mod sentiment;
pub mod types;

use crate::booking::{ReservationError, SlotManager};
use crate::config::{Config, ConversationConfig};
use crate::errors::GatewayError;
use crate::providers::base::{
    Attendee, ChatMessage, ChatRequest, ContactSnapshot, FunctionCall, Slot,
};
use crate::providers::resilient::ServiceGateway;
use crate::scoring::ScoringPolicy;
use crate::store::{SideEffectKind, Store, SurveyBooking, Urgency};
use crate::utils::task_tracker::TaskTracker;
use crate::utils::{in_service_area, mask_phone, normalize_phone, normalize_postcode, outward_code};
use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use self::functions::TransferUrgency;
use self::sentiment::Sentiment;
pub use self::types::{
    Channel, ContentType, Conversation, ConversationStatus, InboundEvent, Message, MessageRole,
    NewMessage, OutboundEvent, SuggestedAction,
};

/// Model round trips allowed per turn while it keeps calling functions.
const MAX_FUNCTION_ROUNDS: usize = 4;

/// Slots returned by one `check_availability` call.
const OFFERED_SLOTS: usize = 4;

/// Share of the turn budget kept back for the model to phrase a reply after
/// a slow calendar call.
const REPLY_SHARE: u32 = 5;

/// The gateway enforces the turn deadline on every call; the outer timer only
/// catches work that never reaches the gateway.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed inbound event, or an event for a closed conversation.
    #[error("invalid event: {0}")]
    Validation(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub enum BookingOutcome {
    Booked(SurveyBooking),
    SlotUnavailable { alternatives: Vec<Slot> },
    /// The calendar did not confirm in time; reconciliation will settle it.
    AwaitingConfirmation { booking_id: String },
    Failed { reason: String },
}

/// Result of running one function call for the model.
struct FunctionOutcome {
    content: Value,
    is_error: bool,
}

impl FunctionOutcome {
    fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: json!({ "error": message.to_string() }),
            is_error: true,
        }
    }
}

struct TurnReply {
    text: String,
    tokens: u64,
}

pub struct ConversationEngine {
    store: Arc<Store>,
    gateway: Arc<ServiceGateway>,
    slots: Arc<SlotManager>,
    scoring: ScoringPolicy,
    settings: ConversationConfig,
    business_name: String,
    service_areas: Vec<String>,
    timezone: Tz,
    max_tokens: u32,
    temperature: f32,
    /// `(identity, channel) -> conversation id`. Every hit is checked
    /// against the store before use.
    cache: Mutex<LruCache<(String, Channel), String>>,
    background: TaskTracker,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<ServiceGateway>,
        slots: Arc<SlotManager>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let timezone: Tz = config
            .business
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid business timezone: {}", e))?;
        let capacity = NonZeroUsize::new(config.conversation.cache_size.max(1))
            .context("conversation cache size must be > 0")?;
        Ok(Self {
            store,
            gateway,
            slots,
            scoring: ScoringPolicy::from_config(&config.scoring)?,
            settings: config.conversation.clone(),
            business_name: config.business.name.clone(),
            service_areas: config.business.service_areas.clone(),
            timezone,
            max_tokens: config.providers.anthropic.max_tokens,
            temperature: config.providers.anthropic.temperature,
            cache: Mutex::new(LruCache::new(capacity)),
            background: TaskTracker::new(),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Wait for background CRM syncs spawned by earlier turns.
    pub async fn drain_background(&self) {
        self.background.wait_idle().await;
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// The active conversation for `(channel, identity)`, created if needed.
    pub fn open(&self, channel: Channel, identity: &str) -> Result<Conversation, EngineError> {
        if identity.trim().is_empty() {
            return Err(EngineError::Validation("empty external identity".into()));
        }
        let key = (identity.to_string(), channel);

        let cached = self.cache.lock().ok().and_then(|mut c| c.get(&key).cloned());
        if let Some(id) = cached {
            if let Some(conversation) = self.store.get_conversation(&id)?
                && conversation.status == ConversationStatus::Active
            {
                return Ok(conversation);
            }
            debug!("stale conversation cache entry for {}", mask_phone(identity));
        }

        let (conversation, created) = self.store.open_conversation(identity, channel)?;
        if created {
            info!(
                "opened {} conversation {} for {}",
                channel,
                conversation.id,
                mask_phone(identity)
            );
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, conversation.id.clone());
        }
        Ok(conversation)
    }

    /// Close a conversation. Returns false if it was already closed.
    pub fn close(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
        reason: &str,
    ) -> Result<bool, EngineError> {
        if !status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "cannot close into status {}",
                status
            )));
        }
        let closed = self.store.close_conversation(conversation_id, status, reason)?;
        if closed {
            info!("conversation {} {} ({})", conversation_id, status, reason);
        } else {
            debug!("conversation {} already closed", conversation_id);
        }
        Ok(closed)
    }

    /// Open the conversation an event belongs to and handle it.
    pub async fn handle(
        &self,
        event: &InboundEvent,
    ) -> Result<(Conversation, OutboundEvent), EngineError> {
        let conversation = self.open(event.channel, &event.external_identity)?;
        let reply = self.handle_inbound(&conversation, event).await?;
        Ok((conversation, reply))
    }

    // ── Turns ───────────────────────────────────────────────────

    pub async fn handle_inbound(
        &self,
        conversation: &Conversation,
        event: &InboundEvent,
    ) -> Result<OutboundEvent, EngineError> {
        validate_event(conversation, event)?;
        let current = self
            .store
            .get_conversation(&conversation.id)?
            .ok_or_else(|| EngineError::Validation(format!("unknown conversation {}", conversation.id)))?;
        if current.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "conversation {} is {}",
                current.id, current.status
            )));
        }

        let started = Instant::now();
        let deadline = started + self.deadline_for(current.channel);

        let mood = sentiment::classify(&event.content);
        let mut user_message = NewMessage::new(MessageRole::User, event.content.trim(), event.content_type);
        user_message.sentiment = Some(mood.as_str().to_string());
        self.store.append_message(&current.id, &user_message)?;
        self.flag_sentiment(&current, mood, &event.content);

        let history = self.store.recent_messages(&current.id, self.settings.history_limit)?;
        // Filled as functions run, so a failed turn still reports what happened
        let mut actions = Vec::new();
        let turn = tokio::time::timeout_at(
            deadline + DEADLINE_GRACE,
            self.run_turn(&current, history, deadline, &mut actions),
        )
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let reply = match turn {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return self.fallback(&current, &e.to_string(), latency_ms, actions),
            Err(_) => return self.fallback(&current, "turn deadline exceeded", latency_ms, actions),
        };

        let text = if reply.text.trim().is_empty() {
            // The model only called functions; never leave the customer without a reply
            "Thanks, I've noted that. Is there anything else I can help with?".to_string()
        } else {
            reply.text
        };
        let mut assistant = NewMessage::new(MessageRole::Assistant, text.clone(), ContentType::Text);
        assistant.token_count = Some(reply.tokens.min(u64::from(u32::MAX)) as u32);
        assistant.latency_ms = Some(latency_ms);
        self.store.append_message(&current.id, &assistant)?;

        debug!(
            "conversation {} turn done in {}ms ({} tokens)",
            current.id, latency_ms, reply.tokens
        );
        Ok(OutboundEvent {
            content: text,
            content_type: current.channel.reply_content_type(),
            suggested_actions: actions,
            fallback: false,
        })
    }

    fn deadline_for(&self, channel: Channel) -> Duration {
        if channel.is_live_voice() {
            Duration::from_secs(self.settings.voice_deadline_secs)
        } else {
            Duration::from_secs(self.settings.text_deadline_secs)
        }
    }

    fn fallback(
        &self,
        conversation: &Conversation,
        cause: &str,
        latency_ms: u64,
        mut actions: Vec<SuggestedAction>,
    ) -> Result<OutboundEvent, EngineError> {
        warn!(
            "conversation {}: AI unavailable ({}), sending fallback reply",
            conversation.id, cause
        );
        if let Err(e) = self.store.add_review_flag(
            Some(&conversation.id),
            "ai_fallback",
            Urgency::High,
            Some(cause),
        ) {
            error!("failed to flag fallback for {}: {}", conversation.id, e);
        }

        let text = if conversation.channel.is_spoken() {
            self.settings.voice_fallback.clone()
        } else {
            self.settings.text_fallback.clone()
        };
        let mut message = NewMessage::new(MessageRole::Assistant, text.clone(), ContentType::Text);
        message.latency_ms = Some(latency_ms);
        self.store.append_message(&conversation.id, &message)?;

        actions.push(SuggestedAction::Transfer {
            reason: "assistant unavailable".into(),
        });
        Ok(OutboundEvent {
            content: text,
            content_type: conversation.channel.reply_content_type(),
            suggested_actions: actions,
            fallback: true,
        })
    }

    fn flag_sentiment(&self, conversation: &Conversation, mood: Sentiment, content: &str) {
        let Some(urgency) = mood.review_urgency() else {
            return;
        };
        warn!(
            "conversation {}: {} customer, flagging for review",
            conversation.id, mood
        );
        let excerpt: String = content.chars().take(200).collect();
        if let Err(e) = self.store.add_review_flag(
            Some(&conversation.id),
            &format!("sentiment: {}", mood),
            urgency,
            Some(&excerpt),
        ) {
            error!("failed to flag sentiment for {}: {}", conversation.id, e);
        }
    }

    async fn run_turn(
        &self,
        conversation: &Conversation,
        history: Vec<Message>,
        deadline: Instant,
        actions: &mut Vec<SuggestedAction>,
    ) -> Result<TurnReply, GatewayError> {
        // Functions give up early enough for one more model round
        let functions_deadline = deadline - deadline.saturating_duration_since(Instant::now()) / REPLY_SHARE;
        let mut messages: Vec<ChatMessage> = history
            .into_iter()
            .filter_map(|m| match m.role {
                MessageRole::User => Some(ChatMessage::user(m.content)),
                MessageRole::Assistant => Some(ChatMessage::assistant(m.content)),
                MessageRole::System => None,
            })
            .skip_while(|m| m.role != crate::providers::base::ChatRole::User)
            .collect();

        let mut tokens = 0;
        let mut last_text = String::new();

        for round in 0..MAX_FUNCTION_ROUNDS {
            // Re-read so the prompt reflects what earlier rounds extracted
            let snapshot = self
                .store
                .get_conversation(&conversation.id)
                .ok()
                .flatten()
                .unwrap_or_else(|| conversation.clone());
            let request = ChatRequest {
                system: self.system_prompt(&snapshot),
                messages: messages.clone(),
                functions: functions::schemas(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };
            let response = self.gateway.chat(&request, Some(deadline)).await?;
            tokens += response.input_tokens.unwrap_or(0) + response.output_tokens.unwrap_or(0);
            let text = response.content.clone().unwrap_or_default();

            if response.function_calls.is_empty() {
                return Ok(TurnReply { text, tokens });
            }
            if !text.trim().is_empty() {
                last_text.clone_from(&text);
            }

            debug!(
                "conversation {} round {}: {} function call(s)",
                conversation.id,
                round + 1,
                response.function_calls.len()
            );
            messages.push(ChatMessage::assistant_with_calls(
                text,
                response.function_calls.clone(),
            ));
            for call in &response.function_calls {
                let outcome = self
                    .execute(&snapshot, call, actions, Some(functions_deadline))
                    .await;
                messages.push(ChatMessage::function_result(
                    &call.id,
                    outcome.content.to_string(),
                    outcome.is_error,
                ));
            }
        }

        warn!(
            "conversation {} hit {} function rounds without a final reply",
            conversation.id, MAX_FUNCTION_ROUNDS
        );
        Ok(TurnReply {
            text: last_text,
            tokens,
        })
    }

    fn system_prompt(&self, conversation: &Conversation) -> String {
        let today = Utc::now().with_timezone(&self.timezone);
        let known = serde_json::to_string(&conversation.extracted_info).unwrap_or_default();
        let mut prompt = format!(
            "{}\n\nBusiness: {}\nToday: {} ({})\nChannel: {}\n",
            self.settings.system_prompt,
            self.business_name,
            today.format("%A %-d %B %Y"),
            self.timezone,
            conversation.channel
        );
        if conversation.channel.is_spoken() {
            prompt.push_str("Replies are spoken aloud: no lists, links or emoji.\n");
        }
        if conversation.survey_booked {
            prompt.push_str("A site survey is already booked.\n");
        }
        prompt.push_str(&format!("Known details: {}\n", known));
        prompt
    }

    // ── Functions ───────────────────────────────────────────────

    /// Run a function requested by the voice platform's own model mid-call.
    /// Errors inside the function come back as an `{"error": ..}` result.
    pub async fn call_function(
        &self,
        conversation: &Conversation,
        call: &FunctionCall,
    ) -> Result<(Value, Vec<SuggestedAction>), EngineError> {
        let current = self
            .store
            .get_conversation(&conversation.id)?
            .ok_or_else(|| EngineError::Validation(format!("unknown conversation {}", conversation.id)))?;
        if current.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "conversation {} is {}",
                current.id, current.status
            )));
        }
        let mut actions = Vec::new();
        let deadline = Instant::now() + self.deadline_for(current.channel);
        let outcome = self.execute(&current, call, &mut actions, Some(deadline)).await;
        Ok((outcome.content, actions))
    }

    async fn execute(
        &self,
        conversation: &Conversation,
        call: &FunctionCall,
        actions: &mut Vec<SuggestedAction>,
        deadline: Option<Instant>,
    ) -> FunctionOutcome {
        let args = &call.arguments;
        let result = match call.name.as_str() {
            functions::EXTRACT_LEAD_INFO => self.fn_extract(conversation, args).await,
            functions::CHECK_AVAILABILITY => self.fn_availability(args, actions, deadline).await,
            functions::BOOK_SURVEY => self.fn_book(conversation, args, actions, deadline).await,
            functions::RESCHEDULE_SURVEY => {
                self.fn_reschedule(conversation, args, actions, deadline).await
            }
            functions::TRANSFER_TO_HUMAN => self.fn_transfer(conversation, &call.arguments, actions),
            functions::CHECK_SERVICE_AREA => self.fn_service_area(&call.arguments),
            other => {
                warn!("model called unknown function '{}'", other);
                return FunctionOutcome::error(format!("unknown function: {}", other));
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("function {} failed: {:#}", call.name, e);
                FunctionOutcome::error(e)
            }
        }
    }

    async fn fn_extract(
        &self,
        conversation: &Conversation,
        arguments: &Value,
    ) -> anyhow::Result<FunctionOutcome> {
        let mut info = functions::extract_args(arguments)?;
        if let Some(postcode) = &info.postcode {
            info.postcode = Some(normalize_postcode(postcode));
        }
        let update = self
            .store
            .merge_extracted_info(&conversation.id, info, &self.scoring)?;
        debug!(
            "conversation {} scored {} ({})",
            conversation.id, update.score.score, update.score.tier
        );

        if update.tier_changed() {
            info!(
                "conversation {} lead tier {} -> {}",
                conversation.id,
                update
                    .previous_tier
                    .map_or_else(|| "none".to_string(), |t| t.to_string()),
                update.score.tier
            );
            self.sync_crm(&conversation.id).await;
        }
        Ok(FunctionOutcome::ok(json!({
            "recorded": true,
            "lead_score": update.score.score,
            "lead_tier": update.score.tier,
        })))
    }

    async fn fn_availability(
        &self,
        arguments: &Value,
        actions: &mut Vec<SuggestedAction>,
        deadline: Option<Instant>,
    ) -> anyhow::Result<FunctionOutcome> {
        let args = functions::availability_args(arguments)?;
        let range = match args.date {
            Some(date) => crate::providers::base::DateRange::new(date, date),
            None => self.slots.default_range(),
        };
        let duration = self.slots.config().duration_minutes;
        let slots: Vec<Slot> = self
            .slots
            .list_candidates(&range, duration, deadline)
            .await?
            .into_iter()
            .filter(|s| args.time_preference.accepts(s.time))
            .take(OFFERED_SLOTS)
            .collect();

        if slots.is_empty() {
            return Ok(FunctionOutcome::ok(json!({
                "available": false,
                "slots": [],
                "message": "No free survey slots then. Offer to check another day.",
            })));
        }
        actions.push(SuggestedAction::OfferSlots {
            slots: slots.clone(),
        });
        Ok(FunctionOutcome::ok(json!({
            "available": true,
            "slots": slots.iter().map(slot_json).collect::<Vec<_>>(),
        })))
    }

    async fn fn_book(
        &self,
        conversation: &Conversation,
        arguments: &Value,
        actions: &mut Vec<SuggestedAction>,
        deadline: Option<Instant>,
    ) -> anyhow::Result<FunctionOutcome> {
        let args = functions::booking_args(arguments)?;
        let info = &conversation.extracted_info;
        let customer = Attendee {
            name: args.name,
            phone: normalize_phone(args.phone.as_deref().unwrap_or(&conversation.external_identity)),
            email: args.email.or_else(|| info.email.clone()),
            address: Some(args.address),
            postcode: args
                .postcode
                .or_else(|| info.postcode.clone())
                .map(|p| normalize_postcode(&p)),
        };
        let slot = Slot::new(args.date, args.time, self.slots.config().duration_minutes);

        let outcome = self
            .request_booking(conversation, slot, &customer, deadline)
            .await?;
        Ok(booking_reply(outcome, actions))
    }

    async fn fn_reschedule(
        &self,
        conversation: &Conversation,
        arguments: &Value,
        actions: &mut Vec<SuggestedAction>,
        deadline: Option<Instant>,
    ) -> anyhow::Result<FunctionOutcome> {
        let args = functions::reschedule_args(arguments)?;
        let held = self
            .store
            .bookings_for_conversation(&conversation.id)?
            .into_iter()
            .filter(|b| b.status.holds_slot())
            .filter(|b| args.booking_id.as_deref().is_none_or(|id| id == b.id))
            .last();
        let Some(booking) = held else {
            return Ok(FunctionOutcome::error(
                "no booked survey found for this customer; use book_survey instead",
            ));
        };
        let slot = Slot::new(args.date, args.time, booking.slot.duration_minutes);

        let outcome = match self.slots.reschedule(&booking.id, slot, deadline).await {
            Ok(moved) => {
                self.sync_crm(&conversation.id).await;
                BookingOutcome::Booked(moved)
            }
            Err(e) => self.booking_failure(conversation, &booking.customer, slot, e)?,
        };
        Ok(booking_reply(outcome, actions))
    }

    fn fn_transfer(
        &self,
        conversation: &Conversation,
        arguments: &Value,
        actions: &mut Vec<SuggestedAction>,
    ) -> anyhow::Result<FunctionOutcome> {
        let args = functions::transfer_args(arguments)?;
        let urgency = match args.urgency {
            TransferUrgency::Immediate => Urgency::Urgent,
            TransferUrgency::SameDay | TransferUrgency::NextDay => Urgency::High,
        };
        warn!(
            "conversation {} asked for a person ({}): {}",
            conversation.id,
            urgency,
            args.reason
        );
        self.store.add_review_flag(
            Some(&conversation.id),
            "transfer_requested",
            urgency,
            Some(&args.reason),
        )?;
        actions.push(SuggestedAction::Transfer {
            reason: args.reason,
        });
        let action = if args.urgency == TransferUrgency::Immediate {
            "transfer"
        } else {
            "callback"
        };
        Ok(FunctionOutcome::ok(json!({ "action": action })))
    }

    fn fn_service_area(&self, arguments: &Value) -> anyhow::Result<FunctionOutcome> {
        let args = functions::service_area_args(arguments)?;
        let postcode = normalize_postcode(&args.postcode);
        if outward_code(&postcode).is_none() {
            return Ok(FunctionOutcome::ok(json!({
                "valid": false,
                "message": "That doesn't look like a UK postcode. Ask the customer to repeat it.",
            })));
        }
        let covered = in_service_area(&postcode, &self.service_areas);
        Ok(FunctionOutcome::ok(json!({
            "valid": true,
            "postcode": postcode,
            "in_area": covered,
        })))
    }

    // ── Booking ─────────────────────────────────────────────────

    /// Reserve `slot` for the customer of `conversation`. The calendar is
    /// given until `deadline` to confirm.
    pub async fn request_booking(
        &self,
        conversation: &Conversation,
        slot: Slot,
        customer: &Attendee,
        deadline: Option<Instant>,
    ) -> Result<BookingOutcome, EngineError> {
        let current = self
            .store
            .get_conversation(&conversation.id)?
            .ok_or_else(|| EngineError::Validation(format!("unknown conversation {}", conversation.id)))?;
        if current.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "conversation {} is {}",
                current.id, current.status
            )));
        }

        match self.slots.reserve(slot, customer, Some(&current.id), deadline).await {
            Ok(booking) => {
                self.store.mark_survey_booked(&current.id)?;
                self.sync_crm(&current.id).await;
                Ok(BookingOutcome::Booked(booking))
            }
            Err(e) => self.booking_failure(&current, customer, slot, e),
        }
    }

    fn booking_failure(
        &self,
        conversation: &Conversation,
        customer: &Attendee,
        slot: Slot,
        err: ReservationError,
    ) -> Result<BookingOutcome, EngineError> {
        match err {
            ReservationError::SlotUnavailable { alternatives, .. } => {
                Ok(BookingOutcome::SlotUnavailable { alternatives })
            }
            ReservationError::ReconciliationPending { booking_id } => {
                warn!(
                    "booking {} for conversation {} awaits calendar confirmation",
                    booking_id, conversation.id
                );
                self.store.add_review_flag(
                    Some(&conversation.id),
                    "booking_awaiting_confirmation",
                    Urgency::Normal,
                    Some(&format!("booking {} for {}", booking_id, slot.label())),
                )?;
                Ok(BookingOutcome::AwaitingConfirmation { booking_id })
            }
            ReservationError::NotHeld { booking_id } => Ok(BookingOutcome::Failed {
                reason: format!("booking {} is no longer active", booking_id),
            }),
            ReservationError::Gateway(e) => {
                warn!("booking for conversation {} failed: {}", conversation.id, e);
                self.store.add_review_flag(
                    Some(&conversation.id),
                    "booking_failed",
                    Urgency::High,
                    Some(&format!("{} requested {}", mask_phone(&customer.phone), slot.label())),
                )?;
                Ok(BookingOutcome::Failed {
                    reason: e.to_string(),
                })
            }
            ReservationError::Persistence(e) => Err(EngineError::Persistence(e)),
        }
    }

    // ── CRM ─────────────────────────────────────────────────────

    /// Push the conversation's current state to the CRM in the background.
    /// A failed push is queued for the sweeper and never blocks the turn.
    async fn sync_crm(&self, conversation_id: &str) {
        let conversation = match self.store.get_conversation(conversation_id) {
            Ok(Some(conversation)) => conversation,
            Ok(None) => return,
            Err(e) => {
                error!("cannot read conversation {} for CRM sync: {}", conversation_id, e);
                return;
            }
        };
        let snapshot = contact_snapshot(&conversation);
        let gateway = self.gateway.clone();
        let store = self.store.clone();
        self.background
            .spawn(format!("crm-sync:{}", conversation_id), async move {
                push_contact(&gateway, &store, snapshot).await;
            })
            .await;
    }
}

async fn push_contact(gateway: &ServiceGateway, store: &Store, snapshot: ContactSnapshot) {
    match gateway.upsert_contact(&snapshot).await {
        Ok(contact_id) => {
            debug!("CRM contact {} updated for {}", contact_id, mask_phone(&snapshot.phone));
            if let Err(e) = store.set_crm_contact_id(&snapshot.conversation_id, &contact_id) {
                warn!("failed to record CRM contact id: {}", e);
            }
        }
        Err(e) => {
            warn!(
                "CRM upsert for {} failed, queued for retry: {}",
                mask_phone(&snapshot.phone),
                e
            );
            let job = CrmSync {
                conversation_id: snapshot.conversation_id.clone(),
            };
            let queued = serde_json::to_string(&job)
                .map_err(anyhow::Error::from)
                .and_then(|payload| store.enqueue_side_effect(SideEffectKind::CrmUpsert, &payload));
            if let Err(e) = queued {
                error!("failed to queue CRM upsert for {}: {}", snapshot.conversation_id, e);
            }
        }
    }
}

/// Queued when a CRM push fails. The contact is rebuilt from the store when
/// the retry runs, so a late retry never sends outdated details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmSync {
    pub conversation_id: String,
}

pub fn contact_snapshot(conversation: &Conversation) -> ContactSnapshot {
    let info = &conversation.extracted_info;
    ContactSnapshot {
        phone: normalize_phone(&conversation.external_identity),
        name: info.name.clone(),
        email: info.email.clone(),
        postcode: info.postcode.clone(),
        address: info.address.clone(),
        project_type: info.project_type.clone(),
        budget_range: info.budget_range.clone(),
        timeline: info.timeline.clone(),
        lead_score: conversation.lead_score,
        lead_tier: conversation.lead_tier.map(|t| t.to_string()),
        channel: conversation.channel.to_string(),
        conversation_id: conversation.id.clone(),
        survey_booked: conversation.survey_booked,
    }
}

fn validate_event(conversation: &Conversation, event: &InboundEvent) -> Result<(), EngineError> {
    if event.content.trim().is_empty() {
        return Err(EngineError::Validation("empty message".into()));
    }
    if event.channel != conversation.channel {
        return Err(EngineError::Validation(format!(
            "{} event for a {} conversation",
            event.channel, conversation.channel
        )));
    }
    if event.external_identity != conversation.external_identity {
        return Err(EngineError::Validation(
            "event identity does not match conversation".into(),
        ));
    }
    Ok(())
}

/// What the model is told about a booking attempt.
fn booking_reply(outcome: BookingOutcome, actions: &mut Vec<SuggestedAction>) -> FunctionOutcome {
    match outcome {
        BookingOutcome::Booked(booking) => FunctionOutcome::ok(json!({
            "success": true,
            "booking_id": booking.id,
            "slot": slot_json(&booking.slot),
        })),
        BookingOutcome::SlotUnavailable { alternatives } => {
            if !alternatives.is_empty() {
                actions.push(SuggestedAction::OfferSlots {
                    slots: alternatives.clone(),
                });
            }
            FunctionOutcome::ok(json!({
                "success": false,
                "reason": "slot_unavailable",
                "alternatives": alternatives.iter().map(slot_json).collect::<Vec<_>>(),
            }))
        }
        BookingOutcome::AwaitingConfirmation { booking_id } => {
            actions.push(SuggestedAction::BookingPending {
                booking_id: booking_id.clone(),
            });
            FunctionOutcome::ok(json!({
                "success": false,
                "pending": true,
                "booking_id": booking_id,
                "message": "The calendar is slow to confirm. Tell the customer the team will confirm the visit shortly.",
            }))
        }
        BookingOutcome::Failed { reason } => FunctionOutcome::ok(json!({
            "success": false,
            "reason": reason,
            "message": "The booking system is having trouble. Tell the customer the team will call back to arrange the visit.",
        })),
    }
}

fn slot_json(slot: &Slot) -> Value {
    json!({
        "date": slot.date.format("%Y-%m-%d").to_string(),
        "time": slot.time.format("%H:%M").to_string(),
        "label": slot.label(),
    })
}
