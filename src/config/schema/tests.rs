use super::*;

#[test]
fn test_default_config_validates() {
    let config = Config::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_zero_port() {
    let mut config = Config::default();
    config.server.port = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_timezone_rejected() {
    let mut config = Config::default();
    config.business.timezone = "Mars/Olympus".into();
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_failure_threshold_rejected() {
    let mut config = Config::default();
    config.resilience.circuit_breaker.failure_threshold = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_failure_rate_out_of_range_rejected() {
    let mut config = Config::default();
    config.resilience.circuit_breaker.failure_rate_threshold = 1.5;
    assert!(config.validate().is_err());
    config.resilience.circuit_breaker.failure_rate_threshold = 0.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_capability_timeout_rejected() {
    let mut config = Config::default();
    config.resilience.timeouts.crm_secs = 0;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("crmSecs"));
}

#[test]
fn test_unordered_tiers_rejected() {
    let mut config = Config::default();
    config.scoring.tiers.warm = 80;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_postcode_regex_rejected() {
    let mut config = Config::default();
    config.scoring.premium_postcode_patterns = vec!["^NW(".into()];
    assert!(config.validate().is_err());
}

#[test]
fn test_budget_floors_must_be_ordered() {
    let mut config = Config::default();
    config.scoring.budget.mid_floor = 200_000;
    assert!(config.validate().is_err());
}

#[test]
fn test_opening_hours_must_be_ordered() {
    let mut config = Config::default();
    config.booking.hours.saturday = Some(OpeningHours { open: 13, close: 9 });
    assert!(config.validate().is_err());
}

#[test]
fn test_whatsapp_requires_api_key_when_enabled() {
    let mut config = Config::default();
    config.channels.whatsapp.enabled = true;
    assert!(config.validate().is_err());
    config.channels.whatsapp.api_key = "key".into();
    assert!(config.validate().is_ok());
}

#[test]
fn test_camel_case_round_trip() {
    let json = r#"{
        "resilience": {"circuitBreaker": {"failureThreshold": 3, "recoveryTimeoutSecs": 10}},
        "scoring": {"tiers": {"hot": 80, "warm": 50, "cold": 20}},
        "booking": {"durationMinutes": 90, "hours": {"sunday": {"open": 10, "close": 12}}}
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.resilience.circuit_breaker.recovery_timeout_secs, 10);
    assert_eq!(config.resilience.circuit_breaker.window_secs, 60);
    assert_eq!(config.scoring.tiers.hot, 80);
    assert_eq!(config.booking.duration_minutes, 90);
    assert_eq!(
        config.booking.hours.sunday,
        Some(OpeningHours { open: 10, close: 12 })
    );
    // untouched sections keep their defaults
    assert_eq!(config.booking.hours.weekday, Some(OpeningHours { open: 8, close: 18 }));
    assert_eq!(config.business.timezone, "Europe/London");
    assert!(config.validate().is_ok());
}

#[test]
fn test_debug_redacts_secrets() {
    let mut config = Config::default();
    config.providers.anthropic.api_key = "sk-ant-secret".into();
    config.providers.calendar.client_secret = "graph-secret".into();
    let rendered = format!("{:?}", config);
    assert!(!rendered.contains("sk-ant-secret"));
    assert!(!rendered.contains("graph-secret"));
    assert!(rendered.contains("[REDACTED]"));
}
