pub mod credentials;
pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    AnthropicConfig, BookingConfig, BudgetBrackets, BusinessConfig, BusinessHours,
    CalendarConfig, ChannelsConfig, CircuitBreakerConfig, Config, ConversationConfig,
    DeepgramConfig, ElevenLabsConfig, HubSpotConfig, OpeningHours, ProvidersConfig,
    ResilienceConfig, RetryConfig, ScoringConfig, ServerConfig, TierThresholds, TimeoutsConfig,
    VoiceConfig, WhatsAppConfig,
};
