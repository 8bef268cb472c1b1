//! Tests for the decompress-and-acknowledge handler wrapper.

use super::*;
use crate::backend::{InMemorySqsBackend, ReceiveRequest};
use crate::config::QueueConfig;
use crate::message::ReceiptHandle;
use crate::publisher::Publisher;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Records the bodies it sees and optionally fails
#[derive(Default)]
struct RecordingHandler {
    bodies: Mutex<Vec<Vec<Bytes>>>,
    fail: bool,
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn process(
        &self,
        _ctx: &ProcessingContext,
        messages: &mut [Message],
    ) -> anyhow::Result<()> {
        self.bodies
            .lock()
            .unwrap()
            .push(messages.iter().map(|m| m.value.clone()).collect());
        if self.fail {
            anyhow::bail!("business rule rejected the batch");
        }
        Ok(())
    }
}

async fn setup() -> (Arc<Queue>, Arc<InMemorySqsBackend>) {
    let backend = Arc::new(InMemorySqsBackend::new());
    backend.create_queue("orders");
    let queue = Queue::new_standard("orders", &QueueConfig::default(), backend.clone())
        .await
        .unwrap();
    (Arc::new(queue), backend)
}

/// Receive everything currently visible as consumer-side messages
async fn receive_all(queue: &Queue) -> Vec<Message> {
    let request = ReceiveRequest {
        max_messages: 10,
        message_attribute_names: vec!["All".to_string()],
        ..Default::default()
    };

    queue
        .receive(request)
        .await
        .unwrap()
        .into_iter()
        .map(|raw| Message {
            value: Bytes::from(raw.body.unwrap_or_default()),
            receipt_handle: Some(ReceiptHandle::new(raw.receipt_handle)),
            headers: raw.message_attributes,
            ..Default::default()
        })
        .collect()
}

fn context(queue: &Queue) -> ProcessingContext {
    ProcessingContext::new(queue.name().clone(), "test-worker", CancellationToken::new())
}

#[tokio::test]
async fn test_successful_batch_is_deleted() {
    let (queue, backend) = setup().await;
    let publisher = Publisher::new(queue.clone());
    publisher
        .batch_publish(&[Message::new("a"), Message::new("b")])
        .await
        .unwrap();

    let handler = Arc::new(RecordingHandler::default());
    let wrapper = HandlerWrapper::new(queue.clone(), handler.clone());

    let mut messages = receive_all(&queue).await;
    assert_eq!(messages.len(), 2);
    wrapper.handle(&context(&queue), &mut messages).await.unwrap();

    assert_eq!(handler.bodies.lock().unwrap().len(), 1);
    assert_eq!(backend.deleted_receipts().len(), 2);
    assert_eq!(backend.in_flight_count("orders"), 0);
}

/// A handler error leaves every message of the batch in the queue.
#[tokio::test]
async fn test_failed_batch_is_not_deleted() {
    let (queue, backend) = setup().await;
    Publisher::new(queue.clone())
        .batch_publish(&[Message::new("a"), Message::new("b")])
        .await
        .unwrap();

    let handler = Arc::new(RecordingHandler {
        fail: true,
        ..Default::default()
    });
    let wrapper = HandlerWrapper::new(queue.clone(), handler.clone());

    let mut messages = receive_all(&queue).await;
    let result = wrapper.handle(&context(&queue), &mut messages).await;

    assert!(matches!(result, Err(ProcessingError::Handler(_))));
    assert!(backend.deleted_receipts().is_empty());
    assert_eq!(backend.in_flight_count("orders"), 2);
}

#[tokio::test]
async fn test_compressed_bodies_are_restored_before_handling() {
    let (queue, _backend) = setup().await;
    let publisher = Publisher::new(queue.clone());
    publisher
        .batch_publish(&[
            Message::new("gzip body").with_compression(CompressionCode::Gzip),
            Message::new("snappy body").with_compression(CompressionCode::Snappy),
            Message::new("plain body"),
        ])
        .await
        .unwrap();

    let handler = Arc::new(RecordingHandler::default());
    let wrapper = HandlerWrapper::new(queue.clone(), handler.clone());

    let mut messages = receive_all(&queue).await;
    wrapper.handle(&context(&queue), &mut messages).await.unwrap();

    let bodies = handler.bodies.lock().unwrap()[0].clone();
    assert_eq!(
        bodies,
        vec![
            Bytes::from_static(b"gzip body"),
            Bytes::from_static(b"snappy body"),
            Bytes::from_static(b"plain body"),
        ]
    );
    assert_eq!(messages[0].compression, Some(CompressionCode::Gzip));
    assert_eq!(messages[2].compression, None);
}

/// A body that fails to decompress aborts the batch before the handler runs.
#[tokio::test]
async fn test_decompression_failure_aborts_batch() {
    let (queue, backend) = setup().await;
    let publisher = Publisher::new(queue.clone());
    publisher.publish(&Message::new("fine")).await.unwrap();
    publisher
        .publish(
            &Message::new("definitely not gzip")
                .with_compression(CompressionCode::None)
                .with_header(COMPRESSION_ATTRIBUTE, "1"),
        )
        .await
        .unwrap();

    // The publisher strips caller-supplied codec headers, so corrupt one directly
    let mut messages = receive_all(&queue).await;
    messages[1]
        .headers
        .insert(COMPRESSION_ATTRIBUTE.to_string(), "1".to_string());

    let handler = Arc::new(RecordingHandler::default());
    let wrapper = HandlerWrapper::new(queue.clone(), handler.clone());
    let result = wrapper.handle(&context(&queue), &mut messages).await;

    assert!(matches!(
        result,
        Err(ProcessingError::Decompression { index: 1, .. })
    ));
    assert!(handler.bodies.lock().unwrap().is_empty());
    assert!(backend.deleted_receipts().is_empty());
}

/// Unknown codec codes are treated as uncompressed.
#[tokio::test]
async fn test_unknown_codec_passes_body_through() {
    let (queue, _backend) = setup().await;
    let handler = Arc::new(RecordingHandler::default());
    let wrapper = HandlerWrapper::new(queue.clone(), handler.clone());

    let mut messages = vec![Message::new("raw").with_header(COMPRESSION_ATTRIBUTE, "9")];
    wrapper.handle(&context(&queue), &mut messages).await.unwrap();

    assert_eq!(
        handler.bodies.lock().unwrap()[0],
        vec![Bytes::from_static(b"raw")]
    );
}

#[tokio::test]
async fn test_delete_failure_surfaced_after_success() {
    let (queue, backend) = setup().await;
    Publisher::new(queue.clone())
        .batch_publish(&[Message::new("a"), Message::new("b")])
        .await
        .unwrap();
    backend.fail_next_deletes(1);

    let handler = Arc::new(RecordingHandler::default());
    let wrapper = HandlerWrapper::new(queue.clone(), handler.clone());

    let mut messages = receive_all(&queue).await;
    let result = wrapper.handle(&context(&queue), &mut messages).await;

    match result {
        Err(ProcessingError::Acknowledge { failed, .. }) => assert_eq!(failed, 1),
        other => panic!("expected acknowledge failure, got {:?}", other),
    }
    // The remaining delete was still attempted
    assert_eq!(backend.deleted_receipts().len(), 1);
}

#[tokio::test]
async fn test_wrapper_is_a_message_handler() {
    let (queue, _backend) = setup().await;
    let handler = Arc::new(RecordingHandler {
        fail: true,
        ..Default::default()
    });
    let wrapper: Arc<dyn MessageHandler> = Arc::new(HandlerWrapper::new(queue.clone(), handler));

    let mut messages = vec![Message::new("a")];
    let error = wrapper
        .process(&context(&queue), &mut messages)
        .await
        .unwrap_err();
    assert!(error.to_string().contains("business rule"));
}
