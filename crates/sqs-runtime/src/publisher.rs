//! Single and batched message publishing.
//!
//! Both paths share one preparation step: choose a codec, compress the body,
//! advertise the codec through the compression attribute, and carry FIFO
//! ordering keys and delivery delay onto the wire entry.
//!
//! A body larger than [`MAX_MESSAGE_SIZE`] is always gzip compressed,
//! whatever the message asked for. Compression failures are not fatal: the
//! body is sent uncompressed and a warning is logged.
//!
//! ## Partial publication
//!
//! [`Publisher::batch_publish`] sends its batches one after another and never
//! retries or rolls back. When a later batch fails after earlier ones were
//! accepted the error is [`QueueError::PartialBatchPublish`], reporting how many
//! batches made it.

use crate::backend::SendMessageEntry;
use crate::batch::{self, BatchRequest, MAX_MESSAGE_SIZE};
use crate::compression::{CompressionCode, COMPRESSION_ATTRIBUTE};
use crate::error::{QueueError, SerializationError, ValidationError};
use crate::message::{Message, MessageId};
use crate::queue::Queue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

/// Sends messages to one queue
#[derive(Debug, Clone)]
pub struct Publisher {
    queue: Arc<Queue>,
}

impl Publisher {
    pub fn new(queue: Arc<Queue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Codec a message will be sent with
    pub fn codec_for(&self, message: &Message) -> CompressionCode {
        if message.value.len() > MAX_MESSAGE_SIZE {
            CompressionCode::Gzip
        } else {
            message.compression.unwrap_or_else(|| self.queue.compression())
        }
    }

    /// Build the wire entry for a message.
    ///
    /// Fails if the body is not UTF-8 once encoded, a FIFO message lacks a
    /// group id, or the encoded entry exceeds [`MAX_MESSAGE_SIZE`].
    pub fn prepare(&self, message: &Message, id: String) -> Result<SendMessageEntry, QueueError> {
        let requested = self.codec_for(message);

        let (payload, codec) = match requested.compressor().compress(&message.value) {
            Ok(compressed) => (compressed, requested),
            Err(e) => {
                warn!(
                    queue = %self.queue.name(),
                    codec = %requested,
                    error = %e,
                    "Compression failed, sending message uncompressed"
                );
                (message.value.to_vec(), CompressionCode::None)
            }
        };

        let body = String::from_utf8(payload).map_err(|_| SerializationError::InvalidUtf8)?;

        let mut message_attributes: BTreeMap<String, String> = message
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        message_attributes.remove(COMPRESSION_ATTRIBUTE);
        if codec != CompressionCode::None {
            message_attributes.insert(COMPRESSION_ATTRIBUTE.to_string(), codec.to_attribute());
        }

        let (group_id, deduplication_id) = if self.queue.is_fifo() {
            let group_id = message
                .group_id
                .clone()
                .filter(|g| !g.is_empty())
                .ok_or_else(|| ValidationError::Required {
                    field: "group_id".to_string(),
                })?;
            (Some(group_id), message.deduplication_id.clone())
        } else {
            (None, None)
        };

        let entry = SendMessageEntry {
            id,
            body,
            message_attributes,
            group_id,
            deduplication_id,
            delay_seconds: message.delay_seconds(),
        };

        let size = entry.payload_size();
        if size > MAX_MESSAGE_SIZE {
            return Err(QueueError::MessageTooLarge {
                size,
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        Ok(entry)
    }

    /// Send one message and return the id the service assigned
    pub async fn publish(&self, message: &Message) -> Result<MessageId, QueueError> {
        let entry = self.prepare(message, "msg-0".to_string())?;
        let message_id = self.queue.send(&entry).await?;

        if self.queue.logging() {
            debug!(
                queue = %self.queue.name(),
                message_id = %message_id,
                size = entry.payload_size(),
                "Published message"
            );
        }

        Ok(message_id)
    }

    /// Send many messages through as few batch calls as possible.
    ///
    /// Returns the assigned ids in input order. Fails before sending anything
    /// if any message cannot be prepared; see the module docs for failures
    /// after the first batch.
    pub async fn batch_publish(&self, messages: &[Message]) -> Result<Vec<MessageId>, QueueError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let entry = self
                .prepare(message, format!("msg-{}", index))
                .map_err(|e| match e {
                    QueueError::MessageTooLarge { size, max_size } => {
                        QueueError::BatchEntryTooLarge {
                            index,
                            size,
                            max_size,
                        }
                    }
                    other => other,
                })?;
            entries.push(entry);
        }

        let sizes: Vec<usize> = entries.iter().map(SendMessageEntry::payload_size).collect();
        let batches = batch::pack(entries).map_err(|index| QueueError::BatchEntryTooLarge {
            index,
            size: sizes[index],
            max_size: batch::MAX_BATCH_PAYLOAD,
        })?;

        let total_batches = batches.len();
        let mut message_ids = Vec::with_capacity(messages.len());

        for (sent_batches, batch) in batches.into_iter().enumerate() {
            match self.send_batch(batch).await {
                Ok(ids) => message_ids.extend(ids),
                Err(e) if sent_batches == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        queue = %self.queue.name(),
                        sent_batches,
                        total_batches,
                        error = %e,
                        "Batch publish stopped part way"
                    );
                    return Err(QueueError::PartialBatchPublish {
                        sent_batches,
                        total_batches,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            queue = %self.queue.name(),
            messages = messages.len(),
            batches = total_batches,
            "Published message batch"
        );

        Ok(message_ids)
    }

    async fn send_batch(&self, batch: BatchRequest) -> Result<Vec<MessageId>, QueueError> {
        let size = batch.size();
        let entries = batch.into_entries();
        let outcome = self.queue.send_batch(&entries).await?;

        if !outcome.failed.is_empty() {
            return Err(QueueError::BatchEntriesFailed {
                failed: outcome.failed,
            });
        }

        if self.queue.logging() {
            debug!(
                queue = %self.queue.name(),
                batch_size = entries.len(),
                size,
                "Sent batch"
            );
        }

        let mut assigned: HashMap<String, MessageId> = outcome
            .successful
            .into_iter()
            .map(|success| (success.id, success.message_id))
            .collect();

        entries
            .iter()
            .map(|entry| {
                assigned
                    .remove(&entry.id)
                    .ok_or_else(|| SerializationError::MalformedResponse {
                        message: format!("no result for batch entry '{}'", entry.id),
                    })
                    .map_err(QueueError::from)
            })
            .collect()
    }
}
