//! Queue handles binding a validated name to its backend URL.

use crate::backend::{BatchSendOutcome, RawMessage, ReceiveRequest, SendMessageEntry, SqsBackend};
use crate::compression::{CompressionCode, Compressor};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::message::{MessageId, QueueName, ReceiptHandle};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Delivery semantics of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Standard,
    Fifo,
}

impl QueueType {
    /// Type implied by a queue name's suffix
    pub fn for_name(name: &QueueName) -> Self {
        if name.is_fifo() {
            Self::Fifo
        } else {
            Self::Standard
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Fifo => write!(f, "fifo"),
        }
    }
}

/// A resolved queue: name, URL, type and default codec.
///
/// Cheap to share behind an `Arc`; every publisher and consumer of the queue
/// uses the same backend handle.
pub struct Queue {
    name: QueueName,
    url: String,
    queue_type: QueueType,
    compression: CompressionCode,
    config: Arc<QueueConfig>,
    backend: Arc<dyn SqsBackend>,
}

impl Queue {
    /// Open a standard queue.
    ///
    /// Fails if the prefixed name ends in `.fifo` or the backend cannot
    /// resolve its URL.
    pub async fn new_standard(
        name: &str,
        config: &QueueConfig,
        backend: Arc<dyn SqsBackend>,
    ) -> Result<Self, QueueError> {
        Self::open(name, QueueType::Standard, config, backend).await
    }

    /// Open a FIFO queue; the prefixed name must end in `.fifo`
    pub async fn new_fifo(
        name: &str,
        config: &QueueConfig,
        backend: Arc<dyn SqsBackend>,
    ) -> Result<Self, QueueError> {
        Self::open(name, QueueType::Fifo, config, backend).await
    }

    async fn open(
        name: &str,
        expected: QueueType,
        config: &QueueConfig,
        backend: Arc<dyn SqsBackend>,
    ) -> Result<Self, QueueError> {
        config.validate()?;

        let name = QueueName::with_prefix(&config.prefix, name)?;
        if QueueType::for_name(&name) != expected {
            return Err(QueueError::QueueTypeMismatch {
                queue_name: name.to_string(),
                expected,
            });
        }

        let account_id = Some(config.account_id.as_str()).filter(|id| !id.is_empty());
        let url = backend.get_queue_url(&name, account_id).await?;

        info!(
            queue = %name,
            queue_type = %expected,
            backend = backend.name(),
            "Opened queue"
        );

        Ok(Self {
            name,
            url,
            queue_type: expected,
            compression: config.compression,
            config: Arc::new(config.clone()),
            backend,
        })
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn is_fifo(&self) -> bool {
        self.queue_type == QueueType::Fifo
    }

    /// Codec applied to messages that do not request one
    pub fn compression(&self) -> CompressionCode {
        self.compression
    }

    /// Strategy for the default codec
    pub fn compressor(&self) -> &'static dyn Compressor {
        self.compression.compressor()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Whether per-message debug events are enabled
    pub fn logging(&self) -> bool {
        self.config.logging
    }

    pub fn backend(&self) -> &Arc<dyn SqsBackend> {
        &self.backend
    }

    pub async fn send(&self, entry: &SendMessageEntry) -> Result<MessageId, QueueError> {
        self.backend.send_message(&self.url, entry).await
    }

    pub async fn send_batch(
        &self,
        entries: &[SendMessageEntry],
    ) -> Result<BatchSendOutcome, QueueError> {
        self.backend.send_message_batch(&self.url, entries).await
    }

    /// Long-poll this queue.
    ///
    /// `request.queue_url` is overwritten with this queue's URL.
    pub async fn receive(&self, mut request: ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
        request.queue_url = self.url.clone();
        self.backend.receive_messages(&request).await
    }

    pub async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        if self.logging() {
            debug!(queue = %self.name, receipt = %receipt, "Deleting message");
        }
        self.backend.delete_message(&self.url, receipt).await
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("queue_type", &self.queue_type)
            .field("compression", &self.compression)
            .field("backend", &self.backend.name())
            .finish()
    }
}
