//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(QueueError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(!QueueError::QueueNotFound {
        queue_name: "test".to_string(),
    }
    .is_transient());

    assert!(!QueueError::MessageTooLarge {
        size: 300_000,
        max_size: 250_000
    }
    .is_transient());

    assert!(!QueueError::QueueTypeMismatch {
        queue_name: "orders.fifo".to_string(),
        expected: crate::queue::QueueType::Standard,
    }
    .is_transient());
}

/// Entry failures are only worth retrying when the service was at fault.
#[test]
fn test_batch_entry_failures_transient_only_without_sender_fault() {
    let failure = |sender_fault| BatchEntryFailure {
        id: "msg-0".to_string(),
        code: "InternalError".to_string(),
        message: "boom".to_string(),
        sender_fault,
    };

    assert!(QueueError::BatchEntriesFailed {
        failed: vec![failure(false)],
    }
    .is_transient());

    assert!(!QueueError::BatchEntriesFailed {
        failed: vec![failure(false), failure(true)],
    }
    .is_transient());
}

#[test]
fn test_partial_publish_reports_progress_and_source() {
    let error = QueueError::PartialBatchPublish {
        sent_batches: 2,
        total_batches: 3,
        source: Box::new(QueueError::ConnectionFailed {
            message: "reset".to_string(),
        }),
    };

    let text = error.to_string();
    assert!(text.contains("2 of 3"));
    assert!(text.contains("reset"));
    assert!(error.is_transient());
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_nested_errors_convert_into_queue_error() {
    let error: QueueError = ValidationError::Required {
        field: "group_id".to_string(),
    }
    .into();
    assert!(matches!(error, QueueError::ValidationError(_)));
    assert!(error.to_string().contains("group_id"));

    let error: QueueError = CompressionError::Decode {
        codec: CompressionCode::Gzip,
        message: "bad header".to_string(),
    }
    .into();
    assert!(matches!(error, QueueError::CompressionError(_)));
    assert!(error.to_string().contains("gzip"));
}
