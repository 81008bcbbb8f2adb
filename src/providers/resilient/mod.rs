use crate::config::{ResilienceConfig, RetryConfig, TimeoutsConfig};
use crate::errors::GatewayError;
use crate::providers::base::{
    Attendee, CalendarBackend, Capability, ChatProvider, ChatRequest, ChatResponse,
    ContactSnapshot, CrmClient, DateRange, Slot, SpeechToText, SynthesizedAudio, TextToSpeech,
    Transcript,
};
use crate::providers::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a call may be repeated after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Safe to repeat: backoff with jitter up to `max_retries`.
    Idempotent,
    /// One extra attempt, only after a retryable upstream failure. A timed
    /// out attempt is never repeated because the first may still land.
    AtMostOnce,
    NoRetry,
}

/// The vendor clients behind the gateway.
#[derive(Clone)]
pub struct GatewayServices {
    pub chat: Arc<dyn ChatProvider>,
    pub speech_to_text: Arc<dyn SpeechToText>,
    pub text_to_speech: Arc<dyn TextToSpeech>,
    pub crm: Arc<dyn CrmClient>,
    pub calendar: Arc<dyn CalendarBackend>,
}

struct Breakers {
    chat: CircuitBreaker,
    speech_to_text: CircuitBreaker,
    text_to_speech: CircuitBreaker,
    crm: CircuitBreaker,
    calendar: CircuitBreaker,
}

/// Single entry point for every external call.
///
/// Each capability has its own breaker and timeout. Calls carry an optional
/// end-to-end deadline; whichever of deadline and capability timeout comes
/// first bounds the attempt, and running out is recorded against the breaker
/// like any other failure.
pub struct ServiceGateway {
    services: GatewayServices,
    breakers: Breakers,
    timeouts: TimeoutsConfig,
    retry: RetryConfig,
}

impl ServiceGateway {
    pub fn new(services: GatewayServices, config: &ResilienceConfig) -> Self {
        let breaker = |c| CircuitBreaker::new(c, &config.circuit_breaker);
        Self {
            services,
            breakers: Breakers {
                chat: breaker(Capability::Chat),
                speech_to_text: breaker(Capability::SpeechToText),
                text_to_speech: breaker(Capability::TextToSpeech),
                crm: breaker(Capability::Crm),
                calendar: breaker(Capability::Calendar),
            },
            timeouts: config.timeouts.clone(),
            retry: config.retry.clone(),
        }
    }

    /// Override every breaker's cool-down.
    #[must_use]
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        let b = self.breakers;
        self.breakers = Breakers {
            chat: b.chat.with_cool_down(cool_down),
            speech_to_text: b.speech_to_text.with_cool_down(cool_down),
            text_to_speech: b.text_to_speech.with_cool_down(cool_down),
            crm: b.crm.with_cool_down(cool_down),
            calendar: b.calendar.with_cool_down(cool_down),
        };
        self
    }

    pub fn breaker(&self, capability: Capability) -> &CircuitBreaker {
        match capability {
            Capability::Chat => &self.breakers.chat,
            Capability::SpeechToText => &self.breakers.speech_to_text,
            Capability::TextToSpeech => &self.breakers.text_to_speech,
            Capability::Crm => &self.breakers.crm,
            Capability::Calendar => &self.breakers.calendar,
        }
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        Capability::ALL
            .iter()
            .map(|c| self.breaker(*c).snapshot())
            .collect()
    }

    pub fn timeout_for(&self, capability: Capability) -> Duration {
        let secs = match capability {
            Capability::Chat => self.timeouts.chat_secs,
            Capability::SpeechToText => self.timeouts.speech_to_text_secs,
            Capability::TextToSpeech => self.timeouts.text_to_speech_secs,
            Capability::Crm => self.timeouts.crm_secs,
            Capability::Calendar => self.timeouts.calendar_secs,
        };
        Duration::from_secs(secs)
    }

    /// Delay before retry number `attempt` (1-based), with up to 25% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.initial_delay_ms as f64
            * self
                .retry
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.retry.max_delay_ms as f64);
        let jitter = capped * 0.25 * fastrand::f64();
        Duration::from_millis((capped + jitter) as u64)
    }

    fn max_attempts(&self, policy: RetryPolicy) -> u32 {
        match policy {
            RetryPolicy::Idempotent => 1 + self.retry.max_retries,
            RetryPolicy::AtMostOnce => 2,
            RetryPolicy::NoRetry => 1,
        }
    }

    fn should_retry(policy: RetryPolicy, err: &GatewayError) -> bool {
        match (policy, err) {
            (RetryPolicy::NoRetry, _)
            | (_, GatewayError::RateLimited { .. } | GatewayError::CircuitOpen { .. }) => false,
            (RetryPolicy::AtMostOnce, GatewayError::Timeout { .. }) => false,
            _ => err.is_transient(),
        }
    }

    /// Run `op` under the capability's breaker, timeout and retry policy.
    pub async fn invoke<T, F, Fut>(
        &self,
        capability: Capability,
        policy: RetryPolicy,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let breaker = self.breaker(capability);
        let max_attempts = self.max_attempts(policy);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut budget = self.timeout_for(capability);
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!("{} deadline spent before attempt {}", capability, attempt);
                    return Err(GatewayError::Timeout {
                        capability,
                        after: Duration::ZERO,
                    });
                }
                budget = budget.min(remaining);
            }

            let permit = breaker
                .try_acquire()
                .map_err(|retry_in| GatewayError::CircuitOpen {
                    capability,
                    retry_in,
                })?;

            let err = match tokio::time::timeout(budget, op()).await {
                Ok(Ok(value)) => {
                    permit.success();
                    return Ok(value);
                }
                Ok(Err(e)) => GatewayError::from_provider(capability, &e),
                Err(_) => GatewayError::Timeout {
                    capability,
                    after: budget,
                },
            };
            permit.failure(err.is_transient());

            if attempt >= max_attempts || !Self::should_retry(policy, &err) {
                debug!("{} call failed after {} attempt(s): {}", capability, attempt, err);
                return Err(err);
            }

            let delay = match policy {
                RetryPolicy::AtMostOnce => Duration::ZERO,
                _ => self.backoff_delay(attempt),
            };
            if let Some(deadline) = deadline
                && Instant::now() + delay >= deadline
            {
                debug!("{} no time left to retry: {}", capability, err);
                return Err(err);
            }
            warn!(
                "{} attempt {}/{} failed: {}, retrying in {}ms",
                capability,
                attempt,
                max_attempts,
                err,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn chat(
        &self,
        req: &ChatRequest,
        deadline: Option<Instant>,
    ) -> Result<ChatResponse, GatewayError> {
        let chat = &self.services.chat;
        self.invoke(Capability::Chat, RetryPolicy::AtMostOnce, deadline, move || {
            chat.chat(req)
        })
        .await
    }

    pub async fn transcribe(
        &self,
        audio: &[u8],
        mime_type: &str,
        language: &str,
        deadline: Option<Instant>,
    ) -> Result<Transcript, GatewayError> {
        let stt = &self.services.speech_to_text;
        self.invoke(
            Capability::SpeechToText,
            RetryPolicy::Idempotent,
            deadline,
            move || stt.transcribe(audio, mime_type, language),
        )
        .await
    }

    pub async fn synthesize(
        &self,
        text: &str,
        deadline: Option<Instant>,
    ) -> Result<SynthesizedAudio, GatewayError> {
        let tts = &self.services.text_to_speech;
        self.invoke(
            Capability::TextToSpeech,
            RetryPolicy::Idempotent,
            deadline,
            move || tts.synthesize(text),
        )
        .await
    }

    pub async fn upsert_contact(&self, contact: &ContactSnapshot) -> Result<String, GatewayError> {
        let crm = &self.services.crm;
        self.invoke(Capability::Crm, RetryPolicy::Idempotent, None, move || {
            crm.upsert_contact(contact)
        })
        .await
    }

    pub async fn list_free_slots(
        &self,
        range: &DateRange,
        duration_minutes: u32,
        deadline: Option<Instant>,
    ) -> Result<Vec<Slot>, GatewayError> {
        let calendar = &self.services.calendar;
        self.invoke(Capability::Calendar, RetryPolicy::Idempotent, deadline, move || {
            calendar.list_free_slots(range, duration_minutes)
        })
        .await
    }

    /// Never retried: a lost response may still have created the event. The
    /// reference lets reconciliation find it later.
    pub async fn create_event(
        &self,
        slot: &Slot,
        attendee: &Attendee,
        reference: &str,
        deadline: Option<Instant>,
    ) -> Result<String, GatewayError> {
        let calendar = &self.services.calendar;
        self.invoke(Capability::Calendar, RetryPolicy::NoRetry, deadline, move || {
            calendar.create_event(slot, attendee, reference)
        })
        .await
    }

    /// Safe to retry: moving an event to the same time twice is a no-op.
    pub async fn move_event(
        &self,
        event_id: &str,
        slot: &Slot,
        reference: &str,
        deadline: Option<Instant>,
    ) -> Result<(), GatewayError> {
        let calendar = &self.services.calendar;
        self.invoke(Capability::Calendar, RetryPolicy::Idempotent, deadline, move || {
            calendar.move_event(event_id, slot, reference)
        })
        .await
    }

    pub async fn find_event(&self, reference: &str) -> Result<Option<String>, GatewayError> {
        let calendar = &self.services.calendar;
        self.invoke(Capability::Calendar, RetryPolicy::Idempotent, None, move || {
            calendar.find_event(reference)
        })
        .await
    }

    pub async fn cancel_event(&self, event_id: &str) -> Result<(), GatewayError> {
        let calendar = &self.services.calendar;
        self.invoke(Capability::Calendar, RetryPolicy::Idempotent, None, move || {
            calendar.cancel_event(event_id)
        })
        .await
    }
}
