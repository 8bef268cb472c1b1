//! Message types for queue operations including core domain identifiers.

use crate::compression::CompressionCode;
use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Longest delivery delay the queue service accepts
pub const MAX_DELAY: Duration = Duration::from_secs(900);

/// System attribute names requested on every receive
pub mod system_attributes {
    pub const SENT_TIMESTAMP: &str = "SentTimestamp";
    pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
    pub const APPROXIMATE_FIRST_RECEIVE_TIMESTAMP: &str = "ApproximateFirstReceiveTimestamp";
    pub const MESSAGE_GROUP_ID: &str = "MessageGroupId";
    pub const MESSAGE_DEDUPLICATION_ID: &str = "MessageDeduplicationId";
    pub const SEQUENCE_NUMBER: &str = "SequenceNumber";
    pub const SENDER_ID: &str = "SenderId";

    /// Every system attribute the consumer asks for
    pub const ALL: [&str; 7] = [
        SENT_TIMESTAMP,
        APPROXIMATE_RECEIVE_COUNT,
        APPROXIMATE_FIRST_RECEIVE_TIMESTAMP,
        MESSAGE_GROUP_ID,
        MESSAGE_DEDUPLICATION_ID,
        SEQUENCE_NUMBER,
        SENDER_ID,
    ];
}

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Suffix marking a FIFO queue
    pub const FIFO_SUFFIX: &'static str = ".fifo";

    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        // Validate length
        if name.is_empty() || name.len() > 80 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-80 characters".to_string(),
            });
        }

        let base = name.strip_suffix(Self::FIFO_SUFFIX).unwrap_or(&name);
        if base.is_empty()
            || !base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, underscores and a '.fifo' suffix allowed"
                    .to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Create queue name with prefix; an empty prefix leaves the name untouched
    pub fn with_prefix(prefix: &str, base_name: &str) -> Result<Self, ValidationError> {
        if prefix.is_empty() {
            return Self::new(base_name.to_string());
        }

        let full_name = format!("{}-{}", prefix, base_name);
        Self::new(full_name)
    }

    /// Whether the name carries the FIFO suffix
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(Self::FIFO_SUFFIX)
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Identifier assigned to a message by the queue service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token for deleting a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String) -> Self {
        Self(handle)
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A unit of queue traffic, on either the publish or the consume side
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Message body
    pub value: Bytes,
    /// FIFO ordering key
    pub group_id: Option<String>,
    /// Present only on messages received from a queue
    pub receipt_handle: Option<ReceiptHandle>,
    /// Service-assigned id, present only on received messages
    pub message_id: Option<MessageId>,
    /// System metadata such as the sent timestamp
    pub attributes: HashMap<String, String>,
    /// Custom metadata carried as message attributes
    pub headers: HashMap<String, String>,
    pub deduplication_id: Option<String>,
    pub delay: Option<Duration>,
    /// Requested codec; `None` falls back to the queue default
    pub compression: Option<CompressionCode>,
}

impl Message {
    /// Create new message with body
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// Add FIFO group id for ordered processing
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Add custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add FIFO deduplication id
    pub fn with_deduplication_id(mut self, id: impl Into<String>) -> Self {
        self.deduplication_id = Some(id.into());
        self
    }

    /// Delay delivery of the message
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Request a specific codec
    pub fn with_compression(mut self, compression: CompressionCode) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Delay in whole seconds, if a delay is set and within `0..=900s`
    pub fn delay_seconds(&self) -> Option<u32> {
        self.delay
            .filter(|delay| *delay <= MAX_DELAY)
            .and_then(|delay| u32::try_from(delay.as_secs()).ok())
    }

    /// Time the queue service accepted the message
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let millis = self
            .attributes
            .get(system_attributes::SENT_TIMESTAMP)?
            .parse::<i64>()
            .ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Number of times the message has been received, including this one
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get(system_attributes::APPROXIMATE_RECEIVE_COUNT)?
            .parse()
            .ok()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
