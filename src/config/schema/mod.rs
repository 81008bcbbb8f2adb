use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`            printed normally via `&self.field_name`
/// - `redact(field_name)`    `String` field: shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Submodules are declared after the macro so they can use `redact_debug!`
mod business;
mod channels;
mod providers;

pub use business::*;
pub use channels::*;
pub use providers::*;

use crate::errors::LeadlineError;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

fn default_db_path() -> String {
    "~/.leadline/leadline.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub business: BusinessConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub booking: BookingConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        crate::utils::expand_home(&self.database.path)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), LeadlineError> {
        self.validate_server()?;
        self.validate_resilience()?;
        self.validate_scoring()?;
        self.validate_conversation()?;
        self.validate_booking()?;
        self.validate_channels()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), LeadlineError> {
        if self.server.port == 0 {
            return Err(LeadlineError::Config("server.port must be > 0".into()));
        }
        if self.server.port < 1024 {
            warn!(
                "server.port {} is a privileged port (< 1024), may require elevated permissions",
                self.server.port
            );
        }
        if self.business.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(LeadlineError::Config(format!(
                "business.timezone '{}' is not a known IANA zone",
                self.business.timezone
            )));
        }
        Ok(())
    }

    fn validate_resilience(&self) -> Result<(), LeadlineError> {
        let cb = &self.resilience.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(LeadlineError::Config(
                "resilience.circuitBreaker.failureThreshold must be > 0".into(),
            ));
        }
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
            return Err(LeadlineError::Config(
                "resilience.circuitBreaker.failureRateThreshold must be in (0.0, 1.0]".into(),
            ));
        }
        if cb.window_secs == 0 {
            return Err(LeadlineError::Config(
                "resilience.circuitBreaker.windowSecs must be > 0".into(),
            ));
        }
        let retry = &self.resilience.retry;
        if retry.backoff_multiplier < 1.0 || !retry.backoff_multiplier.is_finite() {
            return Err(LeadlineError::Config(
                "resilience.retry.backoffMultiplier must be a finite number >= 1.0".into(),
            ));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(LeadlineError::Config(
                "resilience.retry.initialDelayMs must be <= maxDelayMs".into(),
            ));
        }
        let t = &self.resilience.timeouts;
        for (name, secs) in [
            ("chatSecs", t.chat_secs),
            ("speechToTextSecs", t.speech_to_text_secs),
            ("textToSpeechSecs", t.text_to_speech_secs),
            ("crmSecs", t.crm_secs),
            ("calendarSecs", t.calendar_secs),
        ] {
            if secs == 0 {
                return Err(LeadlineError::Config(format!(
                    "resilience.timeouts.{name} must be > 0"
                )));
            }
        }
        Ok(())
    }

    fn validate_scoring(&self) -> Result<(), LeadlineError> {
        let t = &self.scoring.tiers;
        if !(t.cold < t.warm && t.warm < t.hot) {
            return Err(LeadlineError::Config(
                "scoring.tiers must be ordered: cold < warm < hot".into(),
            ));
        }
        if t.hot > 100 {
            return Err(LeadlineError::Config(
                "scoring.tiers.hot must be <= 100".into(),
            ));
        }
        for pattern in &self.scoring.premium_postcode_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(LeadlineError::Config(format!(
                    "scoring.premiumPostcodePatterns: invalid regex '{}': {}",
                    pattern, e
                )));
            }
        }
        let b = &self.scoring.budget;
        if !(b.lower_mid_floor < b.mid_floor && b.mid_floor < b.premium_floor) {
            return Err(LeadlineError::Config(
                "scoring.budget floors must be ordered: lowerMidFloor < midFloor < premiumFloor"
                    .into(),
            ));
        }
        Ok(())
    }

    fn validate_conversation(&self) -> Result<(), LeadlineError> {
        let c = &self.conversation;
        if c.voice_deadline_secs == 0 || c.text_deadline_secs == 0 {
            return Err(LeadlineError::Config(
                "conversation deadlines must be > 0".into(),
            ));
        }
        if c.voice_deadline_secs > c.text_deadline_secs {
            warn!("conversation.voiceDeadlineSecs is longer than textDeadlineSecs");
        }
        if c.history_limit == 0 {
            return Err(LeadlineError::Config(
                "conversation.historyLimit must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn validate_booking(&self) -> Result<(), LeadlineError> {
        let b = &self.booking;
        if b.duration_minutes == 0 || b.duration_minutes > 8 * 60 {
            return Err(LeadlineError::Config(
                "booking.durationMinutes must be between 1 and 480".into(),
            ));
        }
        if b.alternatives == 0 {
            return Err(LeadlineError::Config(
                "booking.alternatives must be > 0".into(),
            ));
        }
        if b.pending_timeout_secs == 0 || b.sweep_interval_secs == 0 {
            return Err(LeadlineError::Config(
                "booking.pendingTimeoutSecs and booking.sweepIntervalSecs must be > 0".into(),
            ));
        }
        for (day, hours) in b.hours.iter_days() {
            if let Some(h) = hours
                && (h.open >= h.close || h.close > 24)
            {
                return Err(LeadlineError::Config(format!(
                    "booking.hours.{day}: open must be before close (0-24)"
                )));
            }
        }
        Ok(())
    }

    fn validate_channels(&self) -> Result<(), LeadlineError> {
        let wa = &self.channels.whatsapp;
        if wa.enabled && wa.api_key.is_empty() {
            return Err(LeadlineError::Config(
                "channels.whatsapp.apiKey is required when whatsapp is enabled".into(),
            ));
        }
        if wa.enabled && wa.webhook_secret.is_empty() {
            warn!("channels.whatsapp.webhookSecret is empty; inbound signatures will not be checked");
        }
        let voice = &self.channels.voice;
        if voice.enabled && voice.webhook_secret.is_empty() {
            warn!("channels.voice.webhookSecret is empty; inbound signatures will not be checked");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
