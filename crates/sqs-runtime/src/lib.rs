//! # SQS Runtime
//!
//! Reliable consumption and batched publishing on top of SQS-style queues
//! (standard and FIFO, visibility timeouts, long polling, at-least-once
//! delivery).
//!
//! This library provides:
//! - Publishing single messages or size-bounded batches, with transparent
//!   gzip/snappy compression of large bodies
//! - Long-polling consumers feeding self-healing worker pools
//! - Manual acknowledgement: messages are deleted only after the handler succeeds
//! - FIFO-safe concurrency limits
//! - Graceful shutdown through an injected lifecycle
//!
//! ## Module Organization
//!
//! - [`backend`] - Queue service API and its HTTP and in-memory implementations
//! - [`queue`] - Queue handles and queue types
//! - [`publisher`] / [`batch`] - Publishing and batch packing
//! - [`consumer`] / [`pool`] / [`handler`] - Consumption, workers and acknowledgement
//! - [`compression`] - Body codecs
//! - [`lifecycle`] - Graceful shutdown
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqs_runtime::{
//!     HttpSqsBackend, Message, Publisher, Queue, QueueConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig::default();
//! let backend = Arc::new(HttpSqsBackend::new(&config)?);
//! let queue = Arc::new(Queue::new_standard("orders", &config, backend).await?);
//!
//! let publisher = Publisher::new(queue);
//! publisher.publish(&Message::new("hello")).await?;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod backend;
pub mod batch;
pub mod compression;
pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod message;
pub mod pool;
pub mod publisher;
pub mod queue;

// Re-export commonly used types at crate root for convenience
pub use backend::{HttpSqsBackend, InMemorySqsBackend, SqsBackend};
pub use batch::{BatchRequest, MAX_BATCH_PAYLOAD, MAX_MESSAGE_SIZE};
pub use compression::{CompressionCode, Compressor, COMPRESSION_ATTRIBUTE};
pub use config::{ConsumerOptions, QueueConfig};
pub use consumer::{Consumer, ConsumerWorker};
pub use context::ProcessingContext;
pub use error::{
    CompressionError, ConfigurationError, QueueError, SerializationError, ValidationError,
};
pub use handler::{HandlerWrapper, MessageHandler, ProcessingError};
pub use lifecycle::{Closer, Lifecycle, NoopLifecycle, ShutdownRegistry};
pub use message::{Message, MessageId, QueueName, ReceiptHandle};
pub use pool::Pool;
pub use publisher::Publisher;
pub use queue::{Queue, QueueType};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
