//! Size and count bounded batches for batched publishing.

use crate::backend::{SendMessageEntry, MAX_BATCH_ENTRIES};

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;

/// Largest payload of a single message, in bytes
pub const MAX_MESSAGE_SIZE: usize = 250_000;

/// Largest combined payload of one batch send, in bytes
pub const MAX_BATCH_PAYLOAD: usize = 250_000;

/// Accumulator for one batch send.
///
/// Holds at most [`MAX_BATCH_ENTRIES`] entries whose combined payload never
/// exceeds the configured limit.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    entries: Vec<SendMessageEntry>,
    size: usize,
    max_size: usize,
}

impl BatchRequest {
    pub fn new() -> Self {
        Self::with_max_size(MAX_BATCH_PAYLOAD)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(MAX_BATCH_ENTRIES),
            size: 0,
            max_size,
        }
    }

    /// Whether an entry of `entry_size` bytes fits without breaking a bound
    pub fn can_add(&self, entry_size: usize) -> bool {
        self.entries.len() < MAX_BATCH_ENTRIES && self.size + entry_size <= self.max_size
    }

    /// Add an entry, handing it back if it does not fit
    pub fn try_add(&mut self, entry: SendMessageEntry) -> Result<(), SendMessageEntry> {
        let entry_size = entry.payload_size();
        if !self.can_add(entry_size) {
            return Err(entry);
        }

        self.size += entry_size;
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[SendMessageEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SendMessageEntry> {
        self.entries
    }

    /// Combined payload size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Greedily pack entries, in order, into as few batches as the bounds allow.
///
/// A batch is sealed as soon as the next entry does not fit. Fails with the
/// index of the first entry that does not fit even in an empty batch.
pub fn pack(entries: Vec<SendMessageEntry>) -> Result<Vec<BatchRequest>, usize> {
    let mut batches = Vec::new();
    let mut current = BatchRequest::new();

    for (index, entry) in entries.into_iter().enumerate() {
        if let Err(entry) = current.try_add(entry) {
            if current.is_empty() {
                return Err(index);
            }
            batches.push(std::mem::take(&mut current));
            current.try_add(entry).map_err(|_| index)?;
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }

    Ok(batches)
}
