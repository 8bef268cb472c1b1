//! Per-batch processing context.

use crate::message::QueueName;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Values carried alongside every batch handed to a message handler.
///
/// The request id correlates every log event of one handler invocation. The
/// cancellation token fires when the owning consumer shuts down; handlers
/// doing long work should watch it.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    request_id: String,
    queue_name: QueueName,
    worker_id: String,
    cancellation: CancellationToken,
}

impl ProcessingContext {
    /// Create a context with a fresh request id
    pub fn new(
        queue_name: QueueName,
        worker_id: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            queue_name,
            worker_id: worker_id.into(),
            cancellation,
        }
    }

    /// Replace the generated request id, e.g. with one propagated from upstream
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
