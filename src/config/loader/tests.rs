use super::*;

#[test]
fn test_migrate_moves_top_level_circuit_breaker() {
    let input = serde_json::json!({
        "circuitBreaker": {"failureThreshold": 7}
    });
    let result = migrate_config(input);
    assert!(result.get("circuitBreaker").is_none());
    assert_eq!(
        result["resilience"]["circuitBreaker"]["failureThreshold"],
        serde_json::json!(7)
    );
}

#[test]
fn test_migrate_keeps_existing_nested_value() {
    let input = serde_json::json!({
        "circuitBreaker": {"failureThreshold": 7},
        "resilience": {"circuitBreaker": {"failureThreshold": 2}}
    });
    let result = migrate_config(input);
    assert_eq!(
        result["resilience"]["circuitBreaker"]["failureThreshold"],
        serde_json::json!(2)
    );
}

#[test]
fn test_migrate_non_object_passthrough() {
    let input = serde_json::json!([1, 2, 3]);
    assert_eq!(migrate_config(input.clone()), input);
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&dir.path().join("absent.json"))).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 5);
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");
    let mut config = Config::default();
    config.server.port = 9099;
    config.booking.alternatives = 5;
    save_config(&config, Some(&path)).unwrap();

    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded.server.port, 9099);
    assert_eq!(loaded.booking.alternatives, 5);
}

#[test]
fn test_invalid_config_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"scoring": {"tiers": {"hot": 10, "warm": 40, "cold": 15}}}"#)
        .unwrap();
    let err = load_config(Some(&path)).unwrap_err();
    assert!(format!("{:#}", err).contains("validation"));
}

#[test]
fn test_malformed_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(load_config(Some(&path)).is_err());
}
