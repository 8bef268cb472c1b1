//! Tests for the in-memory queue service backend.

use super::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn name(value: &str) -> QueueName {
    QueueName::new(value.to_string()).unwrap()
}

fn entry(id: &str, body: &str) -> SendMessageEntry {
    SendMessageEntry {
        id: id.to_string(),
        body: body.to_string(),
        ..Default::default()
    }
}

fn request(url: &str, max_messages: u32) -> ReceiveRequest {
    ReceiveRequest {
        queue_url: url.to_string(),
        max_messages,
        wait_time_seconds: 0,
        attribute_names: vec!["All".to_string()],
        message_attribute_names: vec!["All".to_string()],
        visibility_timeout: None,
    }
}

mod queue_management_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_resolve_queue() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");

        assert_eq!(url, "memory://000000000000/orders");
        assert_eq!(backend.get_queue_url(&name("orders"), None).await.unwrap(), url);
        assert_eq!(
            backend
                .get_queue_url(&name("orders"), Some(DEFAULT_ACCOUNT_ID))
                .await
                .unwrap(),
            url
        );
    }

    #[tokio::test]
    async fn test_unknown_queue_not_found() {
        let backend = InMemorySqsBackend::new();
        let result = backend.get_queue_url(&name("missing"), None).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));

        let result = backend
            .send_message("memory://000000000000/missing", &entry("0", "x"))
            .await;
        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }

    #[test]
    fn test_create_queue_is_idempotent() {
        let backend = InMemorySqsBackend::with_account_id("123456789012");
        let first = backend.create_queue("orders");
        let second = backend.create_queue("orders");
        assert_eq!(first, second);
        assert_eq!(first, "memory://123456789012/orders");
    }
}

mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_delete() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");

        let mut sent = entry("0", "hello");
        sent.message_attributes = BTreeMap::from([("tenant".to_string(), "acme".to_string())]);
        let message_id = backend.send_message(&url, &sent).await.unwrap();

        let received = backend.receive_messages(&request(&url, 10)).await.unwrap();
        assert_eq!(received.len(), 1);
        let message = &received[0];
        assert_eq!(message.message_id, message_id.as_str());
        assert_eq!(message.body.as_deref(), Some("hello"));
        assert_eq!(message.message_attributes.get("tenant").unwrap(), "acme");
        assert_eq!(
            message
                .attributes
                .get(system_attributes::APPROXIMATE_RECEIVE_COUNT)
                .unwrap(),
            "1"
        );
        assert!(message
            .attributes
            .contains_key(system_attributes::SENT_TIMESTAMP));

        assert_eq!(backend.visible_count("orders"), 0);
        assert_eq!(backend.in_flight_count("orders"), 1);

        let receipt = ReceiptHandle::new(message.receipt_handle.clone());
        backend.delete_message(&url, &receipt).await.unwrap();
        assert_eq!(backend.in_flight_count("orders"), 0);
        assert_eq!(backend.deleted_receipts(), vec![receipt.clone()]);

        // The receipt is spent
        let result = backend.delete_message(&url, &receipt).await;
        assert!(matches!(result, Err(QueueError::MessageNotFound { .. })));
    }

    #[tokio::test]
    async fn test_receive_respects_max_messages() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        for i in 0..15 {
            backend
                .send_message(&url, &entry(&i.to_string(), "x"))
                .await
                .unwrap();
        }

        assert_eq!(backend.receive_messages(&request(&url, 4)).await.unwrap().len(), 4);
        // The service never hands out more than ten at once
        assert_eq!(backend.receive_messages(&request(&url, 50)).await.unwrap().len(), 10);
        assert_eq!(backend.receive_messages(&request(&url, 10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_requested_attributes_returned() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        let mut sent = entry("0", "x");
        sent.message_attributes = BTreeMap::from([("tenant".to_string(), "acme".to_string())]);
        backend.send_message(&url, &sent).await.unwrap();

        let mut narrow = request(&url, 1);
        narrow.attribute_names = vec![system_attributes::SENT_TIMESTAMP.to_string()];
        narrow.message_attribute_names = Vec::new();

        let received = backend.receive_messages(&narrow).await.unwrap();
        assert_eq!(received[0].attributes.len(), 1);
        assert!(received[0].message_attributes.is_empty());
    }

    /// Undeleted messages reappear once their visibility timeout lapses.
    #[tokio::test]
    async fn test_visibility_timeout_redelivers() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        backend.send_message(&url, &entry("0", "x")).await.unwrap();

        let mut short = request(&url, 1);
        short.visibility_timeout = Some(0);
        let first = backend.receive_messages(&short).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = backend.receive_messages(&short).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
        assert_eq!(
            second[0]
                .attributes
                .get(system_attributes::APPROXIMATE_RECEIVE_COUNT)
                .unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn test_long_poll_woken_by_send() {
        let backend = Arc::new(InMemorySqsBackend::new());
        let url = backend.create_queue("orders");

        let mut waiting = request(&url, 1);
        waiting.wait_time_seconds = 10;

        let receiver = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.receive_messages(&waiting).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.send_message(&url, &entry("0", "late")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), receiver)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received[0].body.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_empty_poll_returns_after_wait() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        assert!(backend.receive_messages(&request(&url, 1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delayed_message_hidden_until_due() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        let mut delayed = entry("0", "later");
        delayed.delay_seconds = Some(60);
        backend.send_message(&url, &delayed).await.unwrap();

        assert!(backend.receive_messages(&request(&url, 1)).await.unwrap().is_empty());
        assert_eq!(backend.visible_count("orders"), 1);
    }

    #[tokio::test]
    async fn test_bodiless_message_has_no_body() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        backend.push_raw("orders", None, HashMap::new()).unwrap();

        let received = backend.receive_messages(&request(&url, 1)).await.unwrap();
        assert!(received[0].body.is_none());
        assert!(backend.push_raw("missing", None, HashMap::new()).is_err());
    }
}

mod fifo_tests {
    use super::*;

    /// A group with a message in flight delivers nothing else until it is deleted.
    #[tokio::test]
    async fn test_group_blocked_while_in_flight() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders.fifo");

        for (id, group) in [("0", "g1"), ("1", "g1"), ("2", "g2")] {
            let mut sent = entry(id, id);
            sent.group_id = Some(group.to_string());
            backend.send_message(&url, &sent).await.unwrap();
        }

        let first = backend.receive_messages(&request(&url, 10)).await.unwrap();
        let bodies: Vec<_> = first.iter().filter_map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec!["0".to_string(), "2".to_string()]);
        assert_eq!(
            first[0]
                .attributes
                .get(system_attributes::MESSAGE_GROUP_ID)
                .unwrap(),
            "g1"
        );

        assert!(backend.receive_messages(&request(&url, 10)).await.unwrap().is_empty());

        let receipt = ReceiptHandle::new(first[0].receipt_handle.clone());
        backend.delete_message(&url, &receipt).await.unwrap();

        let next = backend.receive_messages(&request(&url, 10)).await.unwrap();
        assert_eq!(next[0].body.as_deref(), Some("1"));
    }
}

mod batch_tests {
    use super::*;

    #[tokio::test]
    async fn test_batch_send_records_and_enqueues() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");

        let entries = vec![entry("msg-0", "a"), entry("msg-1", "b")];
        let outcome = backend.send_message_batch(&url, &entries).await.unwrap();

        let ids: Vec<_> = outcome.successful.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["msg-0", "msg-1"]);
        assert!(outcome.failed.is_empty());
        assert_eq!(backend.sent_batches(), vec![entries]);
        assert_eq!(backend.visible_count("orders"), 2);
    }

    #[tokio::test]
    async fn test_batch_over_ten_entries_rejected() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        let entries: Vec<_> = (0..11).map(|i| entry(&i.to_string(), "x")).collect();

        let result = backend.send_message_batch(&url, &entries).await;
        assert!(matches!(result, Err(QueueError::BatchTooLarge { size: 11, .. })));
    }

    #[tokio::test]
    async fn test_rejected_entry_reported_and_not_enqueued() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        backend.reject_batch_entry("msg-1");

        let entries = vec![entry("msg-0", "a"), entry("msg-1", "b")];
        let outcome = backend.send_message_batch(&url, &entries).await.unwrap();

        assert_eq!(outcome.successful.len(), 1);
        assert_eq!(outcome.failed[0].id, "msg-1");
        assert!(!outcome.failed[0].sender_fault);
        assert_eq!(backend.visible_count("orders"), 1);
    }
}

mod fault_injection_tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");

        backend.fail_next_receives(1);
        assert!(backend.receive_messages(&request(&url, 1)).await.is_err());
        assert!(backend.receive_messages(&request(&url, 1)).await.is_ok());
        assert_eq!(backend.receive_calls(), 2);

        backend.fail_next_sends(1);
        assert!(backend.send_message(&url, &entry("0", "x")).await.is_err());
        assert!(backend.send_message(&url, &entry("0", "x")).await.is_ok());

        backend.fail_batches_after(1);
        assert!(backend.send_message_batch(&url, &[entry("0", "x")]).await.is_ok());
        let error = backend
            .send_message_batch(&url, &[entry("0", "x")])
            .await
            .unwrap_err();
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn test_injected_delete_failure_keeps_message() {
        let backend = InMemorySqsBackend::new();
        let url = backend.create_queue("orders");
        backend.send_message(&url, &entry("0", "x")).await.unwrap();
        let received = backend.receive_messages(&request(&url, 1)).await.unwrap();
        let receipt = ReceiptHandle::new(received[0].receipt_handle.clone());

        backend.fail_next_deletes(1);
        assert!(backend.delete_message(&url, &receipt).await.is_err());
        assert_eq!(backend.in_flight_count("orders"), 1);
        assert!(backend.delete_message(&url, &receipt).await.is_ok());
    }
}
