//! Tests for configuration validation and loading

use priority_batch_queue::config::{PipelineConfig, PumpingConfig, QueueConfig, Synchronization};

#[test]
fn test_queue_config_defaults_are_valid() {
    let cfg = QueueConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_size, None);
    assert_eq!(cfg.consumer_count, None);
}

#[test]
fn test_queue_config_invalid_max_size() {
    assert!(QueueConfig::new().with_max_size(0).validate().is_err());
}

#[test]
fn test_queue_config_invalid_consumers() {
    assert!(QueueConfig::new().with_consumer_count(0).validate().is_err());
}

#[test]
fn test_queue_config_invalid_name() {
    assert!(QueueConfig::new().with_name("").validate().is_err());
}

#[test]
fn test_queue_config_from_json() {
    let cfg = QueueConfig::from_json_str(r#"{"name":"push","max_size":100}"#).unwrap();
    assert_eq!(cfg.name.as_deref(), Some("push"));
    assert_eq!(cfg.max_size, Some(100));
    assert_eq!(cfg.consumer_count, None);

    assert!(QueueConfig::from_json_str(r#"{"max_size":0}"#).is_err());
    assert!(QueueConfig::from_json_str("not json").is_err());
}

#[test]
fn test_pumping_config_from_json() {
    let cfg: PumpingConfig = serde_json::from_str(
        r#"{"queue":{"max_size":10},"synchronization":"non_blocking","execution_threads":4}"#,
    )
    .unwrap();
    assert_eq!(cfg.synchronization, Synchronization::NonBlocking);
    assert_eq!(cfg.effective_execution_threads(), 4);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pipeline_config_names_invalid_stage() {
    let cfg = PipelineConfig {
        persist: QueueConfig::new(),
        transfer: QueueConfig::new().with_max_size(0),
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.starts_with("transfer stage invalid"));
}

#[test]
fn test_pipeline_config_round_trip() {
    let cfg = PipelineConfig {
        persist: QueueConfig::new().with_name("persist").with_consumer_count(2),
        transfer: QueueConfig::new().with_max_size(500),
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_queue_config_from_env_prefixed() {
    std::env::set_var("UNIT_CFG_QUEUE_NAME", "mailer");
    std::env::set_var("UNIT_CFG_QUEUE_MAX_SIZE", "64");
    std::env::set_var("UNIT_CFG_QUEUE_CONSUMERS", "3");

    let cfg = QueueConfig::from_env_prefixed("UNIT_CFG_QUEUE").unwrap();
    assert_eq!(cfg.name.as_deref(), Some("mailer"));
    assert_eq!(cfg.max_size, Some(64));
    assert_eq!(cfg.consumer_count, Some(3));

    std::env::set_var("UNIT_CFG_QUEUE_CONSUMERS", "0");
    assert!(QueueConfig::from_env_prefixed("UNIT_CFG_QUEUE").is_err());

    std::env::remove_var("UNIT_CFG_QUEUE_NAME");
    std::env::remove_var("UNIT_CFG_QUEUE_MAX_SIZE");
    std::env::remove_var("UNIT_CFG_QUEUE_CONSUMERS");
}
