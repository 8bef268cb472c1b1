//! Connection and consumer configuration.

use crate::compression::CompressionCode;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings shared by queues, publishers and consumers.
///
/// Immutable once a queue has been opened with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub region: String,
    /// Owning account of the queues; empty means the caller's own account
    pub account_id: String,
    /// Endpoint override, e.g. a local emulator
    pub endpoint: Option<String>,
    /// Prepended to every queue name as `{prefix}-{name}`
    pub prefix: String,
    /// Codec applied to messages that do not request one
    pub compression: CompressionCode,
    /// Emit per-message debug events
    pub logging: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            account_id: String::new(),
            endpoint: None,
            prefix: String::new(),
            compression: CompressionCode::None,
            logging: false,
            access_key_id: None,
            secret_access_key: None,
            // Must exceed the 20 second long poll
            request_timeout_seconds: 30,
        }
    }
}

impl QueueConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "region".to_string(),
            });
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(ConfigurationError::Invalid {
                message: "access_key_id and secret_access_key must be set together".to_string(),
            });
        }

        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
                message: format!("endpoint '{}' is not a valid URL: {}", endpoint, e),
            })?;
        }

        Ok(())
    }

    /// Request timeout for backend calls
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Concurrency and polling knobs of a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Polling loops per consumer, capped at two
    pub number_of_workers: usize,
    /// Pool workers per polling loop
    pub concurrency_per_worker: usize,
    /// Messages requested per poll, at most ten
    pub max_messages_count: u32,
    /// Hand each poll result to the handler as one batch
    pub send_batch_message: bool,
    /// When false the consumer runs a single loop with a single pool worker
    pub is_async: bool,
    pub wait_time_seconds: u32,
    pub visibility_timeout_seconds: Option<u32>,
    /// Fixed pause after a failed poll
    pub error_backoff_seconds: u64,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            number_of_workers: 1,
            concurrency_per_worker: 1,
            max_messages_count: 10,
            send_batch_message: false,
            is_async: true,
            wait_time_seconds: 20,
            visibility_timeout_seconds: None,
            error_backoff_seconds: 20,
        }
    }
}

impl ConsumerOptions {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
