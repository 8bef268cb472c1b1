//! Business handler contract and the decompress-then-acknowledge wrapper.
//!
//! [`HandlerWrapper`] sits between the worker pool and application code. For
//! each batch it decompresses bodies that advertise a codec, calls the wrapped
//! [`MessageHandler`], and deletes the batch from the queue only when the
//! handler succeeded. Any failure leaves the messages in the queue, so the
//! visibility timeout redelivers them: handlers must be idempotent.

use crate::compression::{CompressionCode, COMPRESSION_ATTRIBUTE};
use crate::context::ProcessingContext;
use crate::error::{CompressionError, QueueError};
use crate::message::Message;
use crate::queue::Queue;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// Application code processing received messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one batch.
    ///
    /// Returning an error leaves every message of the batch for redelivery.
    async fn process(
        &self,
        ctx: &ProcessingContext,
        messages: &mut [Message],
    ) -> anyhow::Result<()>;
}

/// Why a batch was not acknowledged
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to decompress message at index {index}: {source}")]
    Decompression {
        index: usize,
        #[source]
        source: CompressionError,
    },

    #[error("Message handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("Failed to delete {failed} processed messages: {source}")]
    Acknowledge {
        failed: usize,
        #[source]
        source: QueueError,
    },
}

/// Decorates a [`MessageHandler`] with decompression and manual acknowledgement
pub struct HandlerWrapper {
    queue: Arc<Queue>,
    inner: Arc<dyn MessageHandler>,
}

impl HandlerWrapper {
    pub fn new(queue: Arc<Queue>, inner: Arc<dyn MessageHandler>) -> Self {
        Self { queue, inner }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Decompress, process and acknowledge one batch
    pub async fn handle(
        &self,
        ctx: &ProcessingContext,
        messages: &mut [Message],
    ) -> Result<(), ProcessingError> {
        let span = info_span!(
            "process_batch",
            request_id = %ctx.request_id(),
            queue = %self.queue.name(),
            worker_id = %ctx.worker_id(),
            batch_size = messages.len(),
        );

        async move {
            decompress_all(messages)?;

            if let Err(e) = self.inner.process(ctx, messages).await {
                warn!(error = %e, "Handler failed, batch left for redelivery");
                return Err(ProcessingError::Handler(e));
            }

            self.acknowledge(messages).await?;

            if self.queue.logging() {
                debug!("Batch processed and deleted");
            }

            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Delete every received message of the batch.
    ///
    /// Every delete is attempted; the first failure is reported.
    async fn acknowledge(&self, messages: &[Message]) -> Result<(), ProcessingError> {
        let mut failed = 0;
        let mut first_error = None;

        for message in messages {
            let Some(receipt) = &message.receipt_handle else {
                continue;
            };

            if let Err(e) = self.queue.delete(receipt).await {
                warn!(
                    receipt = %receipt,
                    error = %e,
                    "Failed to delete processed message"
                );
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(source) => Err(ProcessingError::Acknowledge { failed, source }),
            None => Ok(()),
        }
    }
}

/// Replace compressed bodies with their decompressed form.
///
/// Stops at the first failure, leaving later messages untouched.
fn decompress_all(messages: &mut [Message]) -> Result<(), ProcessingError> {
    for (index, message) in messages.iter_mut().enumerate() {
        let Some(attribute) = message.headers.get(COMPRESSION_ATTRIBUTE) else {
            continue;
        };

        let codec = CompressionCode::from_attribute(attribute);
        let body = codec
            .compressor()
            .decompress(&message.value)
            .map_err(|source| ProcessingError::Decompression { index, source })?;

        message.value = Bytes::from(body);
        message.compression = Some(codec);
    }

    Ok(())
}

#[async_trait]
impl MessageHandler for HandlerWrapper {
    async fn process(
        &self,
        ctx: &ProcessingContext,
        messages: &mut [Message],
    ) -> anyhow::Result<()> {
        self.handle(ctx, messages).await.map_err(anyhow::Error::from)
    }
}
