//! Tests for error types

use priority_batch_queue::core::{ItemFailure, QueueError};

#[test]
fn test_capacity_exceeded_error() {
    let err = QueueError::CapacityExceeded { max_size: 3 };
    assert_eq!(format!("{}", err), "queue capacity exceeded (max size: 3)");
    assert!(err.is_admission());
}

#[test]
fn test_shutdown_error() {
    let err = QueueError::Shutdown;
    assert_eq!(format!("{}", err), "queue is shutting down");
    assert!(err.is_admission());
}

#[test]
fn test_execution_error() {
    let err = QueueError::Execution("boom".to_string());
    assert_eq!(format!("{}", err), "execution failed: boom");
    assert!(!err.is_admission());
}

#[test]
fn test_invalid_config_error() {
    let err = QueueError::InvalidConfig("max_size must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_size must be greater than 0"
    );
}

#[test]
fn test_item_failure_display() {
    assert_eq!(ItemFailure::Returned.to_string(), "returned false");
    assert_eq!(ItemFailure::Timeout.to_string(), "timed out");
    assert_eq!(
        ItemFailure::from(QueueError::Execution("panic".into())).to_string(),
        "execution failed: panic"
    );
}

#[test]
fn test_error_into_anyhow() {
    let result: priority_batch_queue::core::AppResult<()> = Err(QueueError::Timeout.into());
    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "operation timed out");
    assert_eq!(err.downcast_ref::<QueueError>(), Some(&QueueError::Timeout));
}
