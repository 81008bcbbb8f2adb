use leadline::config::{Config, OpeningHours, load_config, save_config};

fn default_config() -> Config {
    serde_json::from_str("{}").unwrap()
}

#[test]
fn test_valid_default_passes() {
    let config = default_config();
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_json_enables_channel_sections_by_presence() {
    let config: Config =
        serde_json::from_str(r#"{"channels": {"whatsapp": {"apiKey": "k"}}}"#).unwrap();
    assert!(config.channels.whatsapp.enabled);
    assert!(!config.channels.voice.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_unordered_tiers_rejected() {
    let mut config = default_config();
    config.scoring.tiers.warm = config.scoring.tiers.hot;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("scoring.tiers"));
}

#[test]
fn test_invalid_postcode_regex_rejected() {
    let mut config = default_config();
    config.scoring.premium_postcode_patterns = vec!["^NW(".into()];
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("premiumPostcodePatterns"));
}

#[test]
fn test_zero_breaker_threshold_rejected() {
    let mut config = default_config();
    config.resilience.circuit_breaker.failure_threshold = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("failureThreshold"));
}

#[test]
fn test_zero_timeout_rejected() {
    let mut config = default_config();
    config.resilience.timeouts.calendar_secs = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("calendarSecs"));
}

#[test]
fn test_unknown_timezone_rejected() {
    let mut config = default_config();
    config.business.timezone = "Europe/Atlantis".into();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("timezone"));
}

#[test]
fn test_inverted_opening_hours_rejected() {
    let mut config = default_config();
    config.booking.hours.saturday = Some(OpeningHours { open: 14, close: 9 });
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("saturday"));
}

#[test]
fn test_whatsapp_without_api_key_rejected() {
    let mut config = default_config();
    config.channels.whatsapp.enabled = true;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("apiKey"));
}

#[test]
fn test_camel_case_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "server": {"port": 9090},
            "business": {"name": "Hampstead Build Co", "serviceAreas": ["NW", "N"]},
            "booking": {"durationMinutes": 90, "pendingTimeoutSecs": 600},
            "resilience": {"circuitBreaker": {"failureThreshold": 3}}
        }"#,
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.business.name, "Hampstead Build Co");
    assert_eq!(config.business.service_areas, vec!["NW", "N"]);
    assert_eq!(config.booking.duration_minutes, 90);
    assert_eq!(config.booking.pending_timeout_secs, 600);
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 3);
    // Untouched sections keep their defaults
    assert_eq!(config.business.timezone, "Europe/London");
    assert!(config.validate().is_ok());

    save_config(&config, Some(&path)).unwrap();
    let reloaded = load_config(Some(&path)).unwrap();
    assert_eq!(reloaded.booking.duration_minutes, 90);
}

#[test]
fn test_debug_output_redacts_secrets() {
    let mut config = default_config();
    config.channels.whatsapp.api_key = "super-secret-key".into();
    config.channels.voice.webhook_secret = "hook-secret".into();
    let debug = format!("{:?}", config);
    assert!(!debug.contains("super-secret-key"));
    assert!(!debug.contains("hook-secret"));
}
