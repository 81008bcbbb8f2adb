use super::default_true;
use serde::{Deserialize, Serialize};

fn default_whatsapp_api() -> String {
    "https://waba-v2.360dialog.io".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_whatsapp_api", rename = "apiUrl")]
    pub api_url: String,
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    /// HMAC-SHA256 secret for inbound webhook signatures.
    #[serde(default, rename = "webhookSecret")]
    pub webhook_secret: String,
}

redact_debug!(
    WhatsAppConfig,
    enabled,
    api_url,
    redact(api_key),
    redact(webhook_secret),
);

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_whatsapp_api(),
            api_key: String::new(),
            webhook_secret: String::new(),
        }
    }
}

fn default_greeting() -> String {
    "Hi, thanks for calling! How can I help with your renovation today?".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, rename = "webhookSecret")]
    pub webhook_secret: String,
    #[serde(default = "default_greeting", rename = "firstMessage")]
    pub first_message: String,
}

redact_debug!(VoiceConfig, enabled, redact(webhook_secret), first_message,);

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_secret: String::new(),
            first_message: default_greeting(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}
