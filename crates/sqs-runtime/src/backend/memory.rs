//! In-memory queue service backend for testing and development.
//!
//! This backend keeps every queue in process and implements the parts of the
//! queue service the runtime relies on:
//! - Visibility timeouts with redelivery of undeleted messages
//! - Long polling woken by new sends
//! - Per-group delivery ordering on FIFO queues
//! - System attributes (sent timestamp, receive count, group id)
//!
//! Every send, batch send and delete is recorded, and failures can be
//! injected, so tests can assert on exactly what reached the "wire".

use super::{
    BatchEntrySuccess, BatchSendOutcome, RawMessage, ReceiveRequest, SendMessageEntry, SqsBackend,
    MAX_BATCH_ENTRIES, MAX_RECEIVE_MESSAGES,
};
use crate::error::QueueError;
use crate::message::{system_attributes, MessageId, QueueName, ReceiptHandle};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Account id used in queue URLs when none is configured
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Visibility timeout applied when a receive does not ask for one
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound between availability checks while long polling
const POLL_SLICE: Duration = Duration::from_millis(50);

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct Storage {
    /// Queue URL by queue name
    urls: HashMap<String, String>,
    /// Queues by URL
    queues: HashMap<String, InMemoryQueue>,
    sends: Vec<SendMessageEntry>,
    batches: Vec<Vec<SendMessageEntry>>,
    deletes: Vec<ReceiptHandle>,
    receive_calls: usize,
    next_receipt: u64,
    faults: FaultPlan,
}

#[derive(Default)]
struct FaultPlan {
    receives: usize,
    sends: usize,
    deletes: usize,
    /// Batch sends allowed to succeed before every further one fails
    batches_after: Option<usize>,
    /// Entry ids the service rejects in batch sends
    rejected_entries: HashSet<String>,
}

struct InMemoryQueue {
    fifo: bool,
    messages: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    fn new(fifo: bool) -> Self {
        Self {
            fifo,
            messages: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Return messages whose visibility timeout has lapsed to the queue
    fn restore_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                self.messages.push_front(flight.message);
            }
        }
    }

    /// Take up to `max` deliverable messages.
    ///
    /// On FIFO queues a group with a message in flight is skipped, and only the
    /// head of each group is eligible.
    fn take_available(&mut self, max: usize, now: Instant) -> Vec<StoredMessage> {
        let mut blocked: HashSet<String> = if self.fifo {
            self.in_flight
                .values()
                .filter_map(|flight| flight.message.group_id.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let mut taken = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.messages.len());

        while let Some(message) = self.messages.pop_front() {
            let group_blocked = message
                .group_id
                .as_ref()
                .map(|group| blocked.contains(group))
                .unwrap_or(false);

            if taken.len() < max && message.available_at <= now && !group_blocked {
                if self.fifo {
                    if let Some(group) = &message.group_id {
                        blocked.insert(group.clone());
                    }
                }
                taken.push(message);
            } else {
                if self.fifo {
                    if let Some(group) = &message.group_id {
                        blocked.insert(group.clone());
                    }
                }
                remaining.push_back(message);
            }
        }

        self.messages = remaining;
        taken
    }
}

#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    body: Option<String>,
    message_attributes: HashMap<String, String>,
    group_id: Option<String>,
    deduplication_id: Option<String>,
    sent_timestamp: i64,
    first_receive_timestamp: Option<i64>,
    receive_count: u32,
    available_at: Instant,
}

impl StoredMessage {
    fn from_entry(entry: &SendMessageEntry, now: Instant) -> Self {
        let delay = Duration::from_secs(u64::from(entry.delay_seconds.unwrap_or(0)));

        Self {
            message_id: MessageId::new().to_string(),
            body: Some(entry.body.clone()),
            message_attributes: entry
                .message_attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            group_id: entry.group_id.clone(),
            deduplication_id: entry.deduplication_id.clone(),
            sent_timestamp: Utc::now().timestamp_millis(),
            first_receive_timestamp: None,
            receive_count: 0,
            available_at: now + delay,
        }
    }

    fn system_attributes(&self) -> HashMap<String, String> {
        let mut attributes = HashMap::new();
        attributes.insert(
            system_attributes::SENT_TIMESTAMP.to_string(),
            self.sent_timestamp.to_string(),
        );
        attributes.insert(
            system_attributes::APPROXIMATE_RECEIVE_COUNT.to_string(),
            self.receive_count.to_string(),
        );
        if let Some(first) = self.first_receive_timestamp {
            attributes.insert(
                system_attributes::APPROXIMATE_FIRST_RECEIVE_TIMESTAMP.to_string(),
                first.to_string(),
            );
        }
        if let Some(group_id) = &self.group_id {
            attributes.insert(
                system_attributes::MESSAGE_GROUP_ID.to_string(),
                group_id.clone(),
            );
        }
        if let Some(dedup_id) = &self.deduplication_id {
            attributes.insert(
                system_attributes::MESSAGE_DEDUPLICATION_ID.to_string(),
                dedup_id.clone(),
            );
        }
        attributes.insert(
            system_attributes::SENDER_ID.to_string(),
            "in-memory".to_string(),
        );
        attributes
    }
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

// ============================================================================
// Backend
// ============================================================================

/// Process-local queue service
pub struct InMemorySqsBackend {
    account_id: String,
    storage: Mutex<Storage>,
    arrivals: Notify,
}

impl InMemorySqsBackend {
    /// Create a backend with no queues
    pub fn new() -> Self {
        Self::with_account_id(DEFAULT_ACCOUNT_ID)
    }

    /// Create a backend whose queue URLs carry the given account id
    pub fn with_account_id(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            storage: Mutex::new(Storage::default()),
            arrivals: Notify::new(),
        }
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        // A panicking test thread must not wedge every later call
        self.storage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue_url(&self, name: &str) -> String {
        format!("memory://{}/{}", self.account_id, name)
    }

    /// Create a queue and return its URL; creating an existing queue is a no-op
    pub fn create_queue(&self, name: &str) -> String {
        let url = self.queue_url(name);
        let mut storage = self.storage();
        storage.urls.insert(name.to_string(), url.clone());
        storage
            .queues
            .entry(url.clone())
            .or_insert_with(|| InMemoryQueue::new(name.ends_with(QueueName::FIFO_SUFFIX)));
        url
    }

    /// Enqueue a message directly, bypassing the send path.
    ///
    /// A `None` body models a service message without a body.
    pub fn push_raw(
        &self,
        queue_name: &str,
        body: Option<String>,
        message_attributes: HashMap<String, String>,
    ) -> Result<String, QueueError> {
        let url = self.queue_url(queue_name);
        let mut message = StoredMessage::from_entry(&SendMessageEntry::default(), Instant::now());
        message.body = body;
        message.message_attributes = message_attributes;
        let message_id = message.message_id.clone();

        {
            let mut storage = self.storage();
            let queue = storage
                .queues
                .get_mut(&url)
                .ok_or_else(|| not_found(queue_name))?;
            queue.messages.push_back(message);
        }

        self.arrivals.notify_waiters();
        Ok(message_id)
    }

    /// Entries sent through single-message sends, in order
    pub fn sent_messages(&self) -> Vec<SendMessageEntry> {
        self.storage().sends.clone()
    }

    /// Entries of every batch send call, one inner vector per call
    pub fn sent_batches(&self) -> Vec<Vec<SendMessageEntry>> {
        self.storage().batches.clone()
    }

    /// Receipts of every successful delete, in order
    pub fn deleted_receipts(&self) -> Vec<ReceiptHandle> {
        self.storage().deletes.clone()
    }

    /// Number of receive calls made so far, including failed ones
    pub fn receive_calls(&self) -> usize {
        self.storage().receive_calls
    }

    /// Messages waiting to be received
    pub fn visible_count(&self, queue_name: &str) -> usize {
        let url = self.queue_url(queue_name);
        self.storage()
            .queues
            .get(&url)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Messages received but neither deleted nor expired
    pub fn in_flight_count(&self, queue_name: &str) -> usize {
        let url = self.queue_url(queue_name);
        self.storage()
            .queues
            .get(&url)
            .map(|q| q.in_flight.len())
            .unwrap_or(0)
    }

    /// Fail the next `count` receive calls with a connection error
    pub fn fail_next_receives(&self, count: usize) {
        self.storage().faults.receives = count;
    }

    /// Fail the next `count` single-message sends
    pub fn fail_next_sends(&self, count: usize) {
        self.storage().faults.sends = count;
    }

    /// Fail the next `count` deletes
    pub fn fail_next_deletes(&self, count: usize) {
        self.storage().faults.deletes = count;
    }

    /// Let `count` batch sends succeed, then fail every later one
    pub fn fail_batches_after(&self, count: usize) {
        self.storage().faults.batches_after = Some(count);
    }

    /// Report the batch entry with this id as failed instead of enqueuing it
    pub fn reject_batch_entry(&self, id: impl Into<String>) {
        self.storage().faults.rejected_entries.insert(id.into());
    }

    /// One non-blocking pass over a queue
    fn try_receive(&self, request: &ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
        let now = Instant::now();
        let max = request.max_messages.clamp(1, MAX_RECEIVE_MESSAGES) as usize;
        let visibility = request
            .visibility_timeout
            .map(|secs| Duration::from_secs(u64::from(secs)))
            .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT);

        let mut storage = self.storage();
        let receipt_base = storage.next_receipt;
        let queue = storage
            .queues
            .get_mut(&request.queue_url)
            .ok_or_else(|| not_found(&request.queue_url))?;

        queue.restore_expired(now);
        let taken = queue.take_available(max, now);

        let mut received = Vec::with_capacity(taken.len());
        for (offset, mut message) in taken.into_iter().enumerate() {
            message.receive_count += 1;
            if message.first_receive_timestamp.is_none() {
                message.first_receive_timestamp = Some(Utc::now().timestamp_millis());
            }

            let receipt = format!("{}-{}", message.message_id, receipt_base + offset as u64);
            received.push(to_raw(&message, &receipt, request));
            queue.in_flight.insert(
                receipt,
                InFlightMessage {
                    message,
                    visible_at: now + visibility,
                },
            );
        }

        storage.next_receipt = receipt_base + received.len() as u64;
        Ok(received)
    }

    fn enqueue(&self, queue_url: &str, entries: &[SendMessageEntry]) -> Result<Vec<String>, QueueError> {
        let now = Instant::now();
        let mut storage = self.storage();
        let queue = storage
            .queues
            .get_mut(queue_url)
            .ok_or_else(|| not_found(queue_url))?;

        let ids = entries
            .iter()
            .map(|entry| {
                let message = StoredMessage::from_entry(entry, now);
                let id = message.message_id.clone();
                queue.messages.push_back(message);
                id
            })
            .collect();

        Ok(ids)
    }
}

impl Default for InMemorySqsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemorySqsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySqsBackend")
            .field("account_id", &self.account_id)
            .finish()
    }
}

fn not_found(queue: &str) -> QueueError {
    QueueError::QueueNotFound {
        queue_name: queue.to_string(),
    }
}

fn injected(operation: &str) -> QueueError {
    QueueError::ConnectionFailed {
        message: format!("injected {} failure", operation),
    }
}

fn wants(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n == "All" || n == name)
}

fn to_raw(message: &StoredMessage, receipt: &str, request: &ReceiveRequest) -> RawMessage {
    let attributes = message
        .system_attributes()
        .into_iter()
        .filter(|(name, _)| wants(&request.attribute_names, name))
        .collect();
    let message_attributes = message
        .message_attributes
        .iter()
        .filter(|(name, _)| wants(&request.message_attribute_names, name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    RawMessage {
        message_id: message.message_id.clone(),
        receipt_handle: receipt.to_string(),
        body: message.body.clone(),
        attributes,
        message_attributes,
    }
}

#[async_trait]
impl SqsBackend for InMemorySqsBackend {
    async fn get_queue_url(
        &self,
        queue_name: &QueueName,
        account_id: Option<&str>,
    ) -> Result<String, QueueError> {
        if let Some(account_id) = account_id.filter(|id| !id.is_empty()) {
            if account_id != self.account_id {
                return Err(not_found(queue_name.as_str()));
            }
        }

        self.storage()
            .urls
            .get(queue_name.as_str())
            .cloned()
            .ok_or_else(|| not_found(queue_name.as_str()))
    }

    async fn receive_messages(
        &self,
        request: &ReceiveRequest,
    ) -> Result<Vec<RawMessage>, QueueError> {
        {
            let mut storage = self.storage();
            storage.receive_calls += 1;
            if storage.faults.receives > 0 {
                storage.faults.receives -= 1;
                return Err(injected("receive"));
            }
        }

        let deadline = Instant::now() + Duration::from_secs(u64::from(request.wait_time_seconds));

        loop {
            // Register interest before looking so a concurrent send is not missed
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let received = self.try_receive(request)?;
            if !received.is_empty() {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            // Sliced so lapsed visibility timeouts are noticed without a send
            let wake_at = deadline.min(now + POLL_SLICE);
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn send_message(
        &self,
        queue_url: &str,
        entry: &SendMessageEntry,
    ) -> Result<MessageId, QueueError> {
        {
            let mut storage = self.storage();
            if storage.faults.sends > 0 {
                storage.faults.sends -= 1;
                return Err(injected("send"));
            }
        }

        let ids = self.enqueue(queue_url, std::slice::from_ref(entry))?;
        self.storage().sends.push(entry.clone());
        self.arrivals.notify_waiters();

        let id = ids.into_iter().next().unwrap_or_default();
        Ok(id.parse().unwrap_or_default())
    }

    async fn send_message_batch(
        &self,
        queue_url: &str,
        entries: &[SendMessageEntry],
    ) -> Result<BatchSendOutcome, QueueError> {
        if entries.len() > MAX_BATCH_ENTRIES {
            return Err(QueueError::BatchTooLarge {
                size: entries.len(),
                max_size: MAX_BATCH_ENTRIES,
            });
        }

        let (accepted, failed) = {
            let mut storage = self.storage();
            if let Some(remaining) = storage.faults.batches_after.as_mut() {
                if *remaining == 0 {
                    return Err(injected("batch send"));
                }
                *remaining -= 1;
            }

            let rejected = &storage.faults.rejected_entries;
            let (accepted, refused): (Vec<_>, Vec<_>) = entries
                .iter()
                .cloned()
                .partition(|entry| !rejected.contains(&entry.id));
            let failed: Vec<_> = refused
                .into_iter()
                .map(|entry| super::BatchEntryFailure {
                    id: entry.id,
                    code: "InternalError".to_string(),
                    message: "injected entry failure".to_string(),
                    sender_fault: false,
                })
                .collect();
            (accepted, failed)
        };

        let ids = self.enqueue(queue_url, &accepted)?;
        self.storage().batches.push(entries.to_vec());
        self.arrivals.notify_waiters();

        let successful = accepted
            .into_iter()
            .zip(ids)
            .map(|(entry, id)| BatchEntrySuccess {
                id: entry.id,
                message_id: id.parse().unwrap_or_default(),
            })
            .collect();

        Ok(BatchSendOutcome { successful, failed })
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let mut storage = self.storage();
        if storage.faults.deletes > 0 {
            storage.faults.deletes -= 1;
            return Err(injected("delete"));
        }

        let queue = storage
            .queues
            .get_mut(queue_url)
            .ok_or_else(|| not_found(queue_url))?;

        if queue.in_flight.remove(receipt.handle()).is_none() {
            return Err(QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            });
        }

        storage.deletes.push(receipt.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
