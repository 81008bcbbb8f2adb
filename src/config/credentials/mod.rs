use super::schema::Config;

macro_rules! define_credentials {
    ($( $name:literal, $env:literal => $($path:ident).+ );* $(;)?) => {
        /// All known credential slot names.
        pub const CREDENTIAL_NAMES: &[&str] = &[$($name),*];

        /// (slot name, env var name) pairs.
        pub const CREDENTIAL_ENV_VARS: &[(&str, &str)] = &[$(($name, $env)),*];

        /// Get the current value of a credential field by slot name.
        pub fn get_credential_value<'a>(config: &'a Config, name: &str) -> Option<&'a str> {
            match name {
                $($name => Some(config.$($path).+.as_str()),)*
                _ => None,
            }
        }

        /// Apply environment variable overrides.
        ///
        /// Any `LEADLINE_*` env var that is set and non-empty overwrites the
        /// corresponding config field.
        pub fn apply_env_overrides(config: &mut Config) {
            $(
                if let Ok(val) = std::env::var($env)
                    && !val.is_empty()
                {
                    config.$($path).+ = val;
                }
            )*
        }
    };
}

define_credentials! {
    "anthropic-api-key",        "LEADLINE_ANTHROPIC_API_KEY"        => providers.anthropic.api_key;
    "deepgram-api-key",         "LEADLINE_DEEPGRAM_API_KEY"         => providers.deepgram.api_key;
    "elevenlabs-api-key",       "LEADLINE_ELEVENLABS_API_KEY"       => providers.elevenlabs.api_key;
    "hubspot-access-token",     "LEADLINE_HUBSPOT_ACCESS_TOKEN"     => providers.hubspot.access_token;
    "calendar-client-secret",   "LEADLINE_CALENDAR_CLIENT_SECRET"   => providers.calendar.client_secret;
    "whatsapp-api-key",         "LEADLINE_WHATSAPP_API_KEY"         => channels.whatsapp.api_key;
    "whatsapp-webhook-secret",  "LEADLINE_WHATSAPP_WEBHOOK_SECRET"  => channels.whatsapp.webhook_secret;
    "voice-webhook-secret",     "LEADLINE_VOICE_WEBHOOK_SECRET"     => channels.voice.webhook_secret;
}

/// Credential slots that are still empty after overrides.
pub fn missing_credentials(config: &Config) -> Vec<&'static str> {
    CREDENTIAL_NAMES
        .iter()
        .copied()
        .filter(|name| get_credential_value(config, name).is_none_or(str::is_empty))
        .collect()
}
