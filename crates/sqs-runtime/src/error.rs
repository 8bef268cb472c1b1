//! Error types for queue operations.

use crate::backend::BatchEntryFailure;
use crate::compression::CompressionCode;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found or receipt expired: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Queue '{queue_name}' cannot be opened as a {expected} queue")]
    QueueTypeMismatch {
        queue_name: String,
        expected: crate::queue::QueueType,
    },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Message at index {index} is too large: {size} bytes (max: {max_size})")]
    BatchEntryTooLarge {
        index: usize,
        size: usize,
        max_size: usize,
    },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("{} batch entries were rejected by the queue", failed.len())]
    BatchEntriesFailed { failed: Vec<BatchEntryFailure> },

    #[error("Batch publish stopped after {sent_batches} of {total_batches} batches: {source}")]
    PartialBatchPublish {
        sent_batches: usize,
        total_batches: usize,
        #[source]
        source: Box<QueueError>,
    },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Compression failed: {0}")]
    CompressionError(#[from] CompressionError),

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::QueueTypeMismatch { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::BatchEntryTooLarge { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::BatchEntriesFailed { failed } => failed.iter().all(|f| !f.sender_fault),
            Self::PartialBatchPublish { source, .. } => source.is_transient(),
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::InvalidState { .. } => false,
            Self::CompressionError(_) => false,
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }
}

/// Errors raised by a compression codec
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("{codec} encoding failed: {message}")]
    Encode {
        codec: CompressionCode,
        message: String,
    },

    #[error("{codec} decoding failed: {message}")]
    Decode {
        codec: CompressionCode,
        message: String,
    },
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed response from queue service: {message}")]
    MalformedResponse { message: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
