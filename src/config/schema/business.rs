use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Business
// ---------------------------------------------------------------------------

fn default_business_name() -> String {
    "Renovation Co".to_string()
}

fn default_timezone() -> String {
    "Europe/London".to_string()
}

fn default_service_areas() -> Vec<String> {
    ["NW", "N", "W", "WC", "EC", "SW", "SE", "E", "HA", "EN"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConfig {
    #[serde(default = "default_business_name")]
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Postcode area prefixes (letters of the outward code) the team covers.
    #[serde(default = "default_service_areas", rename = "serviceAreas")]
    pub service_areas: Vec<String>,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            name: default_business_name(),
            timezone: default_timezone(),
            service_areas: default_service_areas(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

fn default_hot() -> u8 {
    70
}

fn default_warm() -> u8 {
    40
}

fn default_cold() -> u8 {
    15
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierThresholds {
    #[serde(default = "default_hot")]
    pub hot: u8,
    #[serde(default = "default_warm")]
    pub warm: u8,
    #[serde(default = "default_cold")]
    pub cold: u8,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            hot: default_hot(),
            warm: default_warm(),
            cold: default_cold(),
        }
    }
}

fn default_premium_floor() -> u64 {
    150_000
}

fn default_mid_floor() -> u64 {
    100_000
}

fn default_lower_mid_floor() -> u64 {
    50_000
}

/// Budget brackets in pounds, compared against the upper bound of the
/// parsed budget range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetBrackets {
    #[serde(default = "default_premium_floor", rename = "premiumFloor")]
    pub premium_floor: u64,
    #[serde(default = "default_mid_floor", rename = "midFloor")]
    pub mid_floor: u64,
    #[serde(default = "default_lower_mid_floor", rename = "lowerMidFloor")]
    pub lower_mid_floor: u64,
}

impl Default for BudgetBrackets {
    fn default() -> Self {
        Self {
            premium_floor: default_premium_floor(),
            mid_floor: default_mid_floor(),
            lower_mid_floor: default_lower_mid_floor(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_premium_postcodes() -> Vec<String> {
    strings(&[r"^NW\d", r"^N\d", r"^W\d"])
}

fn default_major_projects() -> Vec<String> {
    strings(&["full_renovation", "full renovation", "extension", "loft"])
}

fn default_room_projects() -> Vec<String> {
    strings(&["kitchen", "bathroom", "basement"])
}

fn default_immediate_timelines() -> Vec<String> {
    strings(&[
        "immediate",
        "asap",
        "urgent",
        "1-2 months",
        "1_2_months",
        "1 to 2 months",
        "next month",
        "this month",
    ])
}

fn default_near_timelines() -> Vec<String> {
    strings(&["3-6 months", "3_6_months", "3 to 6 months"])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub tiers: TierThresholds,
    #[serde(default)]
    pub budget: BudgetBrackets,
    /// Regexes matched against the normalized, uppercased postcode.
    #[serde(
        default = "default_premium_postcodes",
        rename = "premiumPostcodePatterns"
    )]
    pub premium_postcode_patterns: Vec<String>,
    #[serde(default = "default_major_projects", rename = "majorProjects")]
    pub major_projects: Vec<String>,
    #[serde(default = "default_room_projects", rename = "roomProjects")]
    pub room_projects: Vec<String>,
    #[serde(
        default = "default_immediate_timelines",
        rename = "immediateTimelines"
    )]
    pub immediate_timelines: Vec<String>,
    #[serde(default = "default_near_timelines", rename = "nearTimelines")]
    pub near_timelines: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tiers: TierThresholds::default(),
            budget: BudgetBrackets::default(),
            premium_postcode_patterns: default_premium_postcodes(),
            major_projects: default_major_projects(),
            room_projects: default_room_projects(),
            immediate_timelines: default_immediate_timelines(),
            near_timelines: default_near_timelines(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

fn default_voice_deadline_secs() -> u64 {
    10
}

fn default_text_deadline_secs() -> u64 {
    25
}

fn default_history_limit() -> usize {
    40
}

fn default_cache_size() -> usize {
    1024
}

fn default_system_prompt() -> String {
    "You are the friendly assistant for a London home-renovation company. \
     Qualify the customer's project (type, budget, timeline, postcode, property, \
     whether they decide), call extract_lead_info whenever you learn something new, \
     offer a free site survey and use check_availability and book_survey to arrange it. \
     Keep replies short and warm."
        .to_string()
}

fn default_text_fallback() -> String {
    "Sorry, I'm having a bit of trouble right now. Someone from our team will \
     call you back shortly."
        .to_string()
}

fn default_voice_fallback() -> String {
    "I'm really sorry, I'm having a little trouble at the moment. \
     I'll get one of the team to call you straight back."
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// End-to-end budget for a live voice turn.
    #[serde(
        default = "default_voice_deadline_secs",
        rename = "voiceDeadlineSecs"
    )]
    pub voice_deadline_secs: u64,
    #[serde(default = "default_text_deadline_secs", rename = "textDeadlineSecs")]
    pub text_deadline_secs: u64,
    /// Messages sent to the model per turn (most recent).
    #[serde(default = "default_history_limit", rename = "historyLimit")]
    pub history_limit: usize,
    #[serde(default = "default_cache_size", rename = "cacheSize")]
    pub cache_size: usize,
    #[serde(default = "default_system_prompt", rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(default = "default_text_fallback", rename = "textFallback")]
    pub text_fallback: String,
    #[serde(default = "default_voice_fallback", rename = "voiceFallback")]
    pub voice_fallback: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            voice_deadline_secs: default_voice_deadline_secs(),
            text_deadline_secs: default_text_deadline_secs(),
            history_limit: default_history_limit(),
            cache_size: default_cache_size(),
            system_prompt: default_system_prompt(),
            text_fallback: default_text_fallback(),
            voice_fallback: default_voice_fallback(),
        }
    }
}

// ---------------------------------------------------------------------------
// Booking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpeningHours {
    pub open: u32,
    pub close: u32,
}

fn weekday_hours() -> Option<OpeningHours> {
    Some(OpeningHours { open: 8, close: 18 })
}

fn saturday_hours() -> Option<OpeningHours> {
    Some(OpeningHours { open: 9, close: 13 })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    #[serde(default = "weekday_hours")]
    pub weekday: Option<OpeningHours>,
    #[serde(default = "saturday_hours")]
    pub saturday: Option<OpeningHours>,
    #[serde(default)]
    pub sunday: Option<OpeningHours>,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            weekday: weekday_hours(),
            saturday: saturday_hours(),
            sunday: None,
        }
    }
}

impl BusinessHours {
    pub fn iter_days(&self) -> [(&'static str, Option<OpeningHours>); 3] {
        [
            ("weekday", self.weekday),
            ("saturday", self.saturday),
            ("sunday", self.sunday),
        ]
    }
}

fn default_duration_minutes() -> u32 {
    60
}

fn default_alternatives() -> usize {
    3
}

fn default_search_days() -> u32 {
    14
}

fn default_pending_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_side_effect_max_attempts() -> u32 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    #[serde(default = "default_duration_minutes", rename = "durationMinutes")]
    pub duration_minutes: u32,
    /// Alternatives offered when a requested slot is taken.
    #[serde(default = "default_alternatives")]
    pub alternatives: usize,
    #[serde(default = "default_search_days", rename = "searchDays")]
    pub search_days: u32,
    /// Age after which a `pending` booking is handed to reconciliation.
    #[serde(
        default = "default_pending_timeout_secs",
        rename = "pendingTimeoutSecs"
    )]
    pub pending_timeout_secs: u64,
    #[serde(
        default = "default_sweep_interval_secs",
        rename = "sweepIntervalSecs"
    )]
    pub sweep_interval_secs: u64,
    #[serde(
        default = "default_side_effect_max_attempts",
        rename = "sideEffectMaxAttempts"
    )]
    pub side_effect_max_attempts: u32,
    #[serde(default)]
    pub hours: BusinessHours,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_duration_minutes(),
            alternatives: default_alternatives(),
            search_days: default_search_days(),
            pending_timeout_secs: default_pending_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            side_effect_max_attempts: default_side_effect_max_attempts(),
            hours: BusinessHours::default(),
        }
    }
}
