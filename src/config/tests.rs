//! Tests for config loading and validation.

use super::Config;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    config.validate().unwrap();

    assert_eq!(config.registry, "jobs");
    assert_eq!(config.minimum_count, 0);
    assert!(!config.reclaim_stale_locks);
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::load(temp_dir.path().join("config.yaml")).unwrap();
    assert_eq!(config.registry, "jobs");
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.yaml");

    let mut config = Config::default();
    config.session_expiry_secs = 120;
    config.reclaim_stale_locks = true;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.session_expiry_secs, 120);
    assert!(loaded.reclaim_stale_locks);
}

#[test]
fn from_yaml_applies_defaults_for_missing_fields() {
    let config = Config::from_yaml("registry: templates\n").unwrap();
    assert_eq!(config.registry, "templates");
    assert_eq!(config.lock_retry_attempts, 5);
    assert_eq!(config.session_expiry_secs, 60);
}

#[test]
fn from_yaml_ignores_unknown_fields() {
    let config = Config::from_yaml("registry: jobs\nfuture_option: true\n").unwrap();
    assert_eq!(config.registry, "jobs");
}

#[test]
fn validate_rejects_empty_registry() {
    let mut config = Config::default();
    config.registry = String::new();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("registry"));
}

#[test]
fn validate_rejects_registry_with_path_separator() {
    let mut config = Config::default();
    config.registry = "jobs/../etc".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_zero_expiry() {
    let mut config = Config::default();
    config.session_expiry_secs = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("session_expiry_secs"));
}

#[test]
fn validate_rejects_refresh_slower_than_expiry() {
    let mut config = Config::default();
    config.session_expiry_secs = 10;
    config.refresh_interval_secs = 10;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("refresh_interval_secs"));
}

#[test]
fn validate_rejects_zero_lock_retries() {
    let mut config = Config::default();
    config.lock_retry_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn lock_retry_policy_reflects_config() {
    let mut config = Config::default();
    config.lock_retry_attempts = 3;
    config.lock_retry_backoff_ms = 20;

    let policy = config.lock_retry_policy();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.backoff, Duration::from_millis(20));
}
