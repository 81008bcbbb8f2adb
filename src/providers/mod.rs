pub mod anthropic;
pub mod base;
pub mod calendar;
pub mod circuit_breaker;
pub mod deepgram;
pub mod elevenlabs;
pub mod errors;
pub mod hubspot;
pub mod resilient;

use crate::config::Config;
use reqwest::Client;
use resilient::GatewayServices;
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout for vendor HTTP clients (seconds).
pub(crate) const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Hard ceiling per request; the gateway's per-capability timeouts are tighter.
pub(crate) const PROVIDER_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Build a `reqwest::Client` with standard vendor timeouts.
pub(crate) fn provider_http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(PROVIDER_REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Wire the production vendor clients from config.
pub fn services_from_config(config: &Config) -> GatewayServices {
    let providers = &config.providers;
    GatewayServices {
        chat: Arc::new(anthropic::AnthropicProvider::new(&providers.anthropic)),
        speech_to_text: Arc::new(deepgram::DeepgramTranscriber::new(&providers.deepgram)),
        text_to_speech: Arc::new(elevenlabs::ElevenLabsSynthesizer::new(&providers.elevenlabs)),
        crm: Arc::new(hubspot::HubSpotCrm::new(&providers.hubspot)),
        calendar: Arc::new(calendar::GraphCalendar::new(
            &providers.calendar,
            &config.business.timezone,
        )),
    }
}
