//! Unit tests for common-config crate

use common_config::{ExecutionConfig, ResourceManagement, RillConfig};

#[test]
fn test_rill_config_default() {
    let config = RillConfig::default();

    assert_eq!(config.execution.resources.concurrency_quota, 1);
    assert!(config.execution.resources.is_memory_unlimited());
    assert_eq!(config.execution.result_buffer_size, 16);
    assert!(config.execution.collect_metrics);
    assert!(!config.execution.check_leaks);
}

#[test]
fn test_memory_limit() {
    assert_eq!(ResourceManagement::new(1, u64::MAX).memory_limit(), None);
    assert_eq!(ResourceManagement::new(1, 0).memory_limit(), None);
    assert_eq!(ResourceManagement::new(1, 4096).memory_limit(), Some(4096));
}

#[test]
fn test_zero_concurrency_rejected() {
    let resources = ResourceManagement::new(0, 1024);
    assert!(resources.validate().is_err());
}

#[test]
fn test_zero_result_buffer_rejected() {
    let config = ExecutionConfig {
        result_buffer_size: 0,
        ..ExecutionConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "execution": {
            "resources": { "concurrency_quota": 4, "memory_bytes_quota": 1048576 },
            "check_leaks": true
        }
    }"#;
    let config = RillConfig::from_json_str(json).unwrap();

    assert_eq!(config.execution.resources.concurrency_quota, 4);
    assert_eq!(config.execution.resources.memory_limit(), Some(1_048_576));
    assert!(config.execution.check_leaks);
    // Unspecified fields keep their defaults
    assert_eq!(config.execution.result_buffer_size, 16);
}

#[test]
fn test_config_from_empty_json() {
    let config = RillConfig::from_json_str("{}").unwrap();
    assert_eq!(config, RillConfig::default());
}

#[test]
fn test_config_from_json_invalid_quota() {
    let json = r#"{"execution": {"resources": {"concurrency_quota": 0, "memory_bytes_quota": 0}}}"#;
    assert!(RillConfig::from_json_str(json).is_err());
}

#[test]
fn test_config_serialization_roundtrip() {
    let config = RillConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: RillConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config, back);
}
