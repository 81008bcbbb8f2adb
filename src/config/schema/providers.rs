use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vendor credentials
// ---------------------------------------------------------------------------

fn default_anthropic_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.4
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_max_tokens", rename = "maxTokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, rename = "apiBase")]
    pub api_base: Option<String>,
}

redact_debug!(AnthropicConfig, redact(api_key), model, max_tokens, temperature, api_base,);

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_anthropic_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_base: None,
        }
    }
}

fn default_deepgram_model() -> String {
    "nova-2".to_string()
}

fn default_language() -> String {
    "en-GB".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DeepgramConfig {
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    #[serde(default = "default_deepgram_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, rename = "apiBase")]
    pub api_base: Option<String>,
}

redact_debug!(DeepgramConfig, redact(api_key), model, language, api_base,);

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_deepgram_model(),
            language: default_language(),
            api_base: None,
        }
    }
}

fn default_voice_id() -> String {
    "EXAVITQu4vr4xnSDxMaL".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ElevenLabsConfig {
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    #[serde(default = "default_voice_id", rename = "voiceId")]
    pub voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default, rename = "apiBase")]
    pub api_base: Option<String>,
}

redact_debug!(ElevenLabsConfig, redact(api_key), voice_id, model, api_base,);

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: default_voice_id(),
            model: default_tts_model(),
            api_base: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct HubSpotConfig {
    #[serde(default, rename = "accessToken")]
    pub access_token: String,
    #[serde(default, rename = "apiBase")]
    pub api_base: Option<String>,
}

redact_debug!(HubSpotConfig, redact(access_token), api_base,);

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct CalendarConfig {
    #[serde(default, rename = "tenantId")]
    pub tenant_id: String,
    #[serde(default, rename = "clientId")]
    pub client_id: String,
    #[serde(default, rename = "clientSecret")]
    pub client_secret: String,
    /// Mailbox whose calendar holds survey appointments.
    #[serde(default, rename = "calendarUser")]
    pub calendar_user: String,
    #[serde(default, rename = "apiBase")]
    pub api_base: Option<String>,
    #[serde(default, rename = "authBase")]
    pub auth_base: Option<String>,
}

redact_debug!(
    CalendarConfig,
    tenant_id,
    client_id,
    redact(client_secret),
    calendar_user,
    api_base,
    auth_base,
);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub deepgram: DeepgramConfig,
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
    #[serde(default)]
    pub hubspot: HubSpotConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
}

// ---------------------------------------------------------------------------
// Resilience
// ---------------------------------------------------------------------------

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}

fn default_minimum_calls() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    #[serde(default = "default_failure_threshold", rename = "failureThreshold")]
    pub failure_threshold: u32,
    #[serde(
        default = "default_recovery_timeout_secs",
        rename = "recoveryTimeoutSecs"
    )]
    pub recovery_timeout_secs: u64,
    /// Rolling window for the failure-rate check.
    #[serde(default = "default_window_secs", rename = "windowSecs")]
    pub window_secs: u64,
    #[serde(
        default = "default_failure_rate_threshold",
        rename = "failureRateThreshold"
    )]
    pub failure_rate_threshold: f64,
    /// Samples required in the window before the failure rate is considered.
    #[serde(default = "default_minimum_calls", rename = "minimumCalls")]
    pub minimum_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            window_secs: default_window_secs(),
            failure_rate_threshold: default_failure_rate_threshold(),
            minimum_calls: default_minimum_calls(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    4000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms", rename = "initialDelayMs")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms", rename = "maxDelayMs")]
    pub max_delay_ms: u64,
    #[serde(
        default = "default_backoff_multiplier",
        rename = "backoffMultiplier"
    )]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_chat_secs() -> u64 {
    30
}

fn default_stt_secs() -> u64 {
    15
}

fn default_tts_secs() -> u64 {
    10
}

fn default_crm_secs() -> u64 {
    15
}

fn default_calendar_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_chat_secs", rename = "chatSecs")]
    pub chat_secs: u64,
    #[serde(default = "default_stt_secs", rename = "speechToTextSecs")]
    pub speech_to_text_secs: u64,
    #[serde(default = "default_tts_secs", rename = "textToSpeechSecs")]
    pub text_to_speech_secs: u64,
    #[serde(default = "default_crm_secs", rename = "crmSecs")]
    pub crm_secs: u64,
    #[serde(default = "default_calendar_secs", rename = "calendarSecs")]
    pub calendar_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            chat_secs: default_chat_secs(),
            speech_to_text_secs: default_stt_secs(),
            text_to_speech_secs: default_tts_secs(),
            crm_secs: default_crm_secs(),
            calendar_secs: default_calendar_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    #[serde(default, rename = "circuitBreaker")]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}
