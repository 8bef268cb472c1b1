//! Queue service backends.
//!
//! [`SqsBackend`] is the narrow slice of the queue service API the runtime
//! needs. [`HttpSqsBackend`] talks to the real service (or an emulator) over
//! HTTP; [`InMemorySqsBackend`] keeps queues in process for tests and demos.

use crate::error::QueueError;
use crate::message::{MessageId, QueueName, ReceiptHandle};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

pub mod http;
pub mod memory;

pub use http::HttpSqsBackend;
pub use memory::InMemorySqsBackend;

/// Data type used for every custom message attribute
pub const STRING_DATA_TYPE: &str = "String";

/// Hard limit on entries in a send-batch request
pub const MAX_BATCH_ENTRIES: usize = 10;

/// Hard limit on messages returned by one receive call
pub const MAX_RECEIVE_MESSAGES: u32 = 10;

/// Parameters of a receive call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub queue_url: String,
    pub max_messages: u32,
    pub wait_time_seconds: u32,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
    pub visibility_timeout: Option<u32>,
}

/// A message as returned by a receive call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: String,
    pub receipt_handle: String,
    /// `None` when the service returned no body at all
    pub body: Option<String>,
    pub attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, String>,
}

/// One message of a send or send-batch request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMessageEntry {
    /// Unique within a batch request
    pub id: String,
    pub body: String,
    pub message_attributes: BTreeMap<String, String>,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    pub delay_seconds: Option<u32>,
}

impl SendMessageEntry {
    /// Bytes the entry counts against the service's size limits.
    ///
    /// The body plus, for each attribute, its name, data type and value.
    pub fn payload_size(&self) -> usize {
        let attributes: usize = self
            .message_attributes
            .iter()
            .map(|(name, value)| name.len() + STRING_DATA_TYPE.len() + value.len())
            .sum();
        self.body.len() + attributes
    }
}

/// Per-entry result of a send-batch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSendOutcome {
    pub successful: Vec<BatchEntrySuccess>,
    pub failed: Vec<BatchEntryFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntrySuccess {
    pub id: String,
    pub message_id: MessageId,
}

/// An entry the service refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryFailure {
    pub id: String,
    pub code: String,
    pub message: String,
    /// The request, not the service, was at fault
    pub sender_fault: bool,
}

/// Queue service operations consumed by the runtime.
///
/// Implementations must be safe to share between every publisher and
/// consumer task without external locking.
#[async_trait]
pub trait SqsBackend: Send + Sync {
    /// Resolve the URL of a named queue
    async fn get_queue_url(
        &self,
        queue_name: &QueueName,
        account_id: Option<&str>,
    ) -> Result<String, QueueError>;

    /// Long-poll for messages
    async fn receive_messages(
        &self,
        request: &ReceiveRequest,
    ) -> Result<Vec<RawMessage>, QueueError>;

    /// Send a single message
    async fn send_message(
        &self,
        queue_url: &str,
        entry: &SendMessageEntry,
    ) -> Result<MessageId, QueueError>;

    /// Send up to ten messages in one call
    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[SendMessageEntry],
    ) -> Result<BatchSendOutcome, QueueError>;

    /// Delete a received message
    async fn delete_message(
        &self,
        queue_url: &str,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Backend name for logs and errors
    fn name(&self) -> &'static str;
}
