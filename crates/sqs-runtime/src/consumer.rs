//! Queue consumption: the [`Consumer`] orchestrator and its polling loops.
//!
//! A consumer runs one or two [`ConsumerWorker`] loops. Each loop owns a
//! [`Pool`], long-polls the queue, turns the result into [`Message`] values
//! and submits them to the pool, either one message per task or the whole
//! poll as a single task. Every task is handled through a [`HandlerWrapper`],
//! so messages are deleted only after the business handler succeeds.
//!
//! FIFO queues are consumed by exactly one loop with one pool worker, one
//! message at a time, so the service's per-group ordering survives
//! processing.

use crate::backend::{RawMessage, ReceiveRequest, MAX_RECEIVE_MESSAGES};
use crate::config::ConsumerOptions;
use crate::error::{ConfigurationError, QueueError};
use crate::handler::{HandlerWrapper, MessageHandler};
use crate::lifecycle::{Closer, Lifecycle};
use crate::message::{system_attributes, Message, ReceiptHandle};
use crate::pool::Pool;
use crate::queue::{Queue, QueueType};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Most polling loops a single consumer runs
pub const MAX_CONSUMER_WORKERS: usize = 2;

/// Longest long-poll the queue service supports
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

/// Attribute name requesting every custom message attribute
const ALL_MESSAGE_ATTRIBUTES: &str = "All";

/// Apply the queue-type and concurrency policy to requested options.
///
/// - FIFO queues get one loop, one pool worker, one message per poll and no
///   batching, whatever was requested
/// - otherwise more than ten (or zero) messages per poll is rejected
/// - synchronous consumers get one loop and one pool worker
/// - at most [`MAX_CONSUMER_WORKERS`] loops
pub fn effective_options(
    queue_type: QueueType,
    mut options: ConsumerOptions,
) -> Result<ConsumerOptions, QueueError> {
    if queue_type == QueueType::Fifo {
        options.send_batch_message = false;
        options.max_messages_count = 1;
        options.number_of_workers = 1;
        options.concurrency_per_worker = 1;
    }

    if options.max_messages_count == 0 || options.max_messages_count > MAX_RECEIVE_MESSAGES {
        return Err(ConfigurationError::Invalid {
            message: format!(
                "max_messages_count must be between 1 and {}, got {}",
                MAX_RECEIVE_MESSAGES, options.max_messages_count
            ),
        }
        .into());
    }

    if !options.is_async {
        options.number_of_workers = 1;
        options.concurrency_per_worker = 1;
    }

    options.number_of_workers = options.number_of_workers.clamp(1, MAX_CONSUMER_WORKERS);
    options.concurrency_per_worker = options.concurrency_per_worker.max(1);
    options.wait_time_seconds = options.wait_time_seconds.min(MAX_WAIT_TIME_SECONDS);

    Ok(options)
}

enum State {
    Idle,
    Running {
        cancellation: CancellationToken,
        tracker: TaskTracker,
    },
    Closed {
        tracker: Option<TaskTracker>,
    },
}

/// Long-running consumer of one queue
pub struct Consumer {
    queue: Arc<Queue>,
    handler: Arc<HandlerWrapper>,
    options: ConsumerOptions,
    lifecycle: Arc<dyn Lifecycle>,
    state: Mutex<State>,
}

impl Consumer {
    /// Build a consumer; see [`effective_options`] for how `options` is adjusted
    pub fn new(
        queue: Arc<Queue>,
        handler: Arc<dyn MessageHandler>,
        options: ConsumerOptions,
        lifecycle: Arc<dyn Lifecycle>,
    ) -> Result<Self, QueueError> {
        let options = effective_options(queue.queue_type(), options)?;
        let handler = Arc::new(HandlerWrapper::new(Arc::clone(&queue), handler));

        Ok(Self {
            queue,
            handler,
            options,
            lifecycle,
            state: Mutex::new(State::Idle),
        })
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Options after policy adjustment
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Name the consumer registers under
    pub fn name(&self) -> String {
        format!("consumer:{}", self.queue.name())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether polling loops are running and not yet cancelled
    pub fn is_running(&self) -> bool {
        match &*self.state() {
            State::Running { cancellation, .. } => !cancellation.is_cancelled(),
            _ => false,
        }
    }

    /// Start the polling loops under a child of `parent`.
    ///
    /// Registers the consumer with its lifecycle. Cancelling `parent` stops
    /// the loops; [`Consumer::close`] also waits for them. A consumer starts at
    /// most once.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), QueueError> {
        let cancellation = parent.child_token();
        let tracker = TaskTracker::new();

        {
            let mut state = self.state();
            if !matches!(*state, State::Idle) {
                return Err(QueueError::InvalidState {
                    message: format!("{} has already been started", self.name()),
                });
            }
            *state = State::Running {
                cancellation: cancellation.clone(),
                tracker: tracker.clone(),
            };
        }

        self.lifecycle
            .register(&self.name(), Arc::clone(self) as Arc<dyn Closer>);

        for n in 0..self.options.number_of_workers {
            let worker = ConsumerWorker::new(
                format!("{}#{}", self.queue.name(), n),
                Arc::clone(&self.queue),
                Arc::clone(&self.handler) as Arc<dyn MessageHandler>,
                self.options.clone(),
            );
            tracker.spawn(worker.start(cancellation.clone()));
        }
        tracker.close();

        info!(
            queue = %self.queue.name(),
            queue_type = %self.queue.queue_type(),
            workers = self.options.number_of_workers,
            concurrency_per_worker = self.options.concurrency_per_worker,
            max_messages = self.options.max_messages_count,
            send_batch = self.options.send_batch_message,
            "Consumer started"
        );

        Ok(())
    }

    /// Cancel the polling loops and wait until they and their pools have
    /// drained. Safe to call more than once and before [`Consumer::start`].
    pub async fn close(&self) {
        let tracker = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, State::Closed { tracker: None }) {
                State::Idle => None,
                State::Running {
                    cancellation,
                    tracker,
                } => {
                    cancellation.cancel();
                    *state = State::Closed {
                        tracker: Some(tracker.clone()),
                    };
                    Some(tracker)
                }
                State::Closed { tracker } => {
                    *state = State::Closed {
                        tracker: tracker.clone(),
                    };
                    tracker
                }
            }
        };

        if let Some(tracker) = tracker {
            tracker.wait().await;
            info!(queue = %self.queue.name(), "Consumer closed");
        }
    }
}

#[async_trait]
impl Closer for Consumer {
    async fn close(&self) {
        Consumer::close(self).await;
    }
}

/// One polling loop feeding its own worker pool
pub struct ConsumerWorker {
    id: String,
    queue: Arc<Queue>,
    handler: Arc<dyn MessageHandler>,
    options: ConsumerOptions,
}

impl ConsumerWorker {
    pub fn new(
        id: String,
        queue: Arc<Queue>,
        handler: Arc<dyn MessageHandler>,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            options,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Poll until cancelled, then close the pool
    pub async fn start(self, cancellation: CancellationToken) {
        let pool = Pool::run(
            self.id.clone(),
            self.queue.name().clone(),
            self.options.concurrency_per_worker,
            Arc::clone(&self.handler),
            cancellation.clone(),
        );

        info!(worker_id = %self.id, "Consumer worker started");

        loop {
            let received = tokio::select! {
                _ = cancellation.cancelled() => break,
                result = self.queue.receive(self.receive_request()) => result,
            };

            match received {
                Ok(messages) => {
                    if let Err(e) = self.dispatch(&pool, messages).await {
                        error!(worker_id = %self.id, error = %e, "Failed to hand messages to pool");
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        worker_id = %self.id,
                        error = %e,
                        transient = e.is_transient(),
                        backoff_secs = self.options.error_backoff_seconds,
                        "Failed to receive messages"
                    );
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = tokio::time::sleep(self.options.error_backoff()) => {}
                    }
                }
            }
        }

        pool.close().await;
        info!(worker_id = %self.id, "Consumer worker stopped");
    }

    fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            queue_url: self.queue.url().to_string(),
            max_messages: self.options.max_messages_count,
            wait_time_seconds: self.options.wait_time_seconds,
            attribute_names: system_attributes::ALL
                .iter()
                .map(|name| name.to_string())
                .collect(),
            message_attribute_names: vec![ALL_MESSAGE_ATTRIBUTES.to_string()],
            visibility_timeout: self.options.visibility_timeout_seconds,
        }
    }

    /// Delete bodiless messages and submit the rest to the pool
    async fn dispatch(&self, pool: &Pool, received: Vec<RawMessage>) -> Result<(), QueueError> {
        let mut messages = Vec::with_capacity(received.len());

        for raw in received {
            match into_message(raw) {
                Ok(message) => {
                    if self.queue.logging() {
                        debug!(
                            worker_id = %self.id,
                            message_id = ?message.message_id,
                            size = message.value.len(),
                            "Received message"
                        );
                    }
                    messages.push(message);
                }
                Err(receipt) => {
                    warn!(worker_id = %self.id, receipt = %receipt, "Deleting message without a body");
                    if let Err(e) = self.queue.delete(&receipt).await {
                        error!(worker_id = %self.id, error = %e, "Failed to delete message without a body");
                    }
                }
            }
        }

        if messages.is_empty() {
            return Ok(());
        }

        if self.options.send_batch_message {
            pool.submit(messages).await
        } else {
            for message in messages {
                pool.submit(vec![message]).await?;
            }
            Ok(())
        }
    }
}

/// Convert a received message, or hand back its receipt if it has no body
fn into_message(raw: RawMessage) -> Result<Message, ReceiptHandle> {
    let receipt = ReceiptHandle::new(raw.receipt_handle);
    let Some(body) = raw.body else {
        return Err(receipt);
    };

    let group_id = raw
        .attributes
        .get(system_attributes::MESSAGE_GROUP_ID)
        .cloned();
    let deduplication_id = raw
        .attributes
        .get(system_attributes::MESSAGE_DEDUPLICATION_ID)
        .cloned();

    Ok(Message {
        value: Bytes::from(body),
        group_id,
        receipt_handle: Some(receipt),
        message_id: raw.message_id.parse().ok(),
        attributes: raw.attributes,
        headers: raw.message_attributes,
        deduplication_id,
        delay: None,
        compression: None,
    })
}
