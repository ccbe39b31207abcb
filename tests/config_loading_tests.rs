//! Integration tests for configuration loading

use realtime::config::{BASE_URL_ENV, validate_address};
use realtime::prelude::*;
use std::io::Write;

#[test]
fn test_load_full_config_from_file() {
    let yaml = r#"
endpoint:
  host: qms.plant.local
  port: 9443
  secure: true

reconnect:
  max_attempts: 3
  delay_ms: 250

consumer:
  recent_messages: 20
  auto_connect: false
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = ClientConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(
        config.resolve_address(None),
        "wss://qms.plant.local:9443/ws/realtime/"
    );
    assert_eq!(config.reconnect.max_attempts, 3);
    assert_eq!(config.reconnect.delay_ms, 250);
    assert_eq!(config.consumer.recent_messages, 20);
    assert!(!config.consumer.auto_connect);
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = ClientConfig::from_yaml_str("reconnect:\n  delay_ms: 1000\n").unwrap();

    assert_eq!(config.reconnect.delay_ms, 1000);
    assert_eq!(config.reconnect.max_attempts, 10);
    assert_eq!(config.consumer.recent_messages, 100);
    assert!(config.consumer.auto_connect);
    assert_eq!(
        config.resolve_address(None),
        "ws://localhost:8000/ws/realtime/"
    );
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    assert!(ClientConfig::from_yaml_file(path.to_str().unwrap()).is_err());
}

#[test]
fn test_invalid_values_are_rejected() {
    assert!(ClientConfig::from_yaml_str("consumer:\n  recent_messages: 0\n").is_err());
    assert!(ClientConfig::from_yaml_str("endpoint:\n  base_url: ftp://plant.local\n").is_err());
    assert!(ClientConfig::from_yaml_str("reconnect: [1, 2]\n").is_err());
}

#[test]
fn test_base_url_override() {
    let config = ClientConfig::default()
        .with_base_url_override(Some("https://qms.example.com/".to_string()));
    assert_eq!(
        config.resolve_address(None),
        "wss://qms.example.com/ws/realtime/"
    );

    let config = ClientConfig::default().with_base_url_override(Some("   ".to_string()));
    assert_eq!(
        config.resolve_address(None),
        "ws://localhost:8000/ws/realtime/"
    );
}

#[test]
fn test_env_override_is_applied() {
    // SAFETY: no other test in this binary reads or writes this variable
    unsafe { std::env::set_var(BASE_URL_ENV, "http://line-3.plant.local:8080") };
    let config = ClientConfig::default().apply_env_overrides();
    unsafe { std::env::remove_var(BASE_URL_ENV) };

    assert_eq!(
        config.resolve_address(None),
        "ws://line-3.plant.local:8080/ws/realtime/"
    );
}

#[test]
fn test_explicit_address_wins() {
    let config = ClientConfig::default();
    assert_eq!(
        config.resolve_address(Some("ws://override.local/ws/realtime/")),
        "ws://override.local/ws/realtime/"
    );
}

#[test]
fn test_address_validation() {
    assert!(validate_address("ws://localhost:8000/ws/realtime/").is_ok());
    assert!(validate_address("wss://qms.example.com/ws/realtime/").is_ok());

    for bad in ["", "localhost:8000", "http://localhost:8000/", "ws://"] {
        let err = validate_address(bad).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ADDRESS", "address {:?}", bad);
    }
}
