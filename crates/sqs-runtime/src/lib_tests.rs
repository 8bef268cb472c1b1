//! Tests for the sqs-runtime library surface.

use super::*;
use std::sync::Arc;

#[test]
fn test_size_limits() {
    assert_eq!(MAX_MESSAGE_SIZE, 250_000);
    assert_eq!(MAX_BATCH_PAYLOAD, 250_000);
    assert_eq!(backend::MAX_BATCH_ENTRIES, 10);
}

#[test]
fn test_compression_attribute_convention() {
    assert_eq!(COMPRESSION_ATTRIBUTE, "compression");
    assert_eq!(CompressionCode::Gzip.to_attribute(), "1");
    assert_eq!(CompressionCode::from_attribute("2"), CompressionCode::Snappy);
}

/// Publish and consume through the crate-root API only.
#[tokio::test]
async fn test_round_trip_through_public_api() {
    struct Collect(std::sync::Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl MessageHandler for Collect {
        async fn process(
            &self,
            _ctx: &ProcessingContext,
            messages: &mut [Message],
        ) -> anyhow::Result<()> {
            let mut seen = self.0.lock().unwrap();
            for message in messages.iter() {
                seen.push(String::from_utf8_lossy(&message.value).into_owned());
            }
            Ok(())
        }
    }

    let backend = Arc::new(InMemorySqsBackend::new());
    backend.create_queue("dev-events");

    let config = QueueConfig {
        prefix: "dev".to_string(),
        compression: CompressionCode::Gzip,
        ..Default::default()
    };
    let queue = Arc::new(
        Queue::new_standard("events", &config, backend.clone())
            .await
            .unwrap(),
    );

    Publisher::new(queue.clone())
        .publish(&Message::new("compressed on the wire"))
        .await
        .unwrap();
    assert_ne!(backend.sent_messages()[0].body, "compressed on the wire");

    let handler = Arc::new(Collect(std::sync::Mutex::new(Vec::new())));
    let options = ConsumerOptions {
        wait_time_seconds: 1,
        ..Default::default()
    };
    let consumer = Arc::new(
        Consumer::new(queue, handler.clone(), options, Arc::new(NoopLifecycle)).unwrap(),
    );
    consumer
        .start(&tokio_util::sync::CancellationToken::new())
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while backend.deleted_receipts().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    consumer.close().await;

    assert_eq!(
        *handler.0.lock().unwrap(),
        vec!["compressed on the wire".to_string()]
    );
}
