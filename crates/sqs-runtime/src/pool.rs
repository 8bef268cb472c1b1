//! Self-healing pool of workers draining a shared task channel.
//!
//! Each task is one batch of messages. Workers call the handler and log a
//! returned error; a panic inside the handler is caught at the worker boundary,
//! the worker reports its id to the supervisor and exits, and the supervisor
//! spawns a replacement so the pool keeps its capacity.
//!
//! Workers also report a normal exit, which happens only once the task
//! channel is closed and empty. The supervisor is the only task that edits the
//! live-worker map once the pool is running, and it stops when that map is
//! empty.

use crate::context::ProcessingContext;
use crate::error::QueueError;
use crate::handler::MessageHandler;
use crate::message::{Message, QueueName};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;

/// A unit of work: the messages handed to one handler call
pub type Task = Vec<Message>;

type WorkerMap = Arc<Mutex<HashMap<usize, Instant>>>;

/// State shared by every worker of a pool
struct Shared {
    name: String,
    queue_name: QueueName,
    handler: Arc<dyn MessageHandler>,
    cancellation: CancellationToken,
    tasks: tokio::sync::Mutex<mpsc::Receiver<Task>>,
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    /// Task channel closed and drained
    Finished(usize),
    /// Handler panicked; the worker needs a replacement
    Panicked(usize),
}

/// One task loop.
///
/// Exits when the task channel closes, or after a handler panic. Either way
/// it reports its exit to the supervisor.
struct Worker {
    id: usize,
    shared: Arc<Shared>,
    exits: mpsc::UnboundedSender<WorkerExit>,
}

impl Worker {
    fn label(&self) -> String {
        format!("{}/{}", self.shared.name, self.id)
    }

    async fn start(self) {
        let worker_id = self.label();
        debug!(worker_id = %worker_id, "Worker started");

        loop {
            let task = {
                let mut tasks = self.shared.tasks.lock().await;
                tasks.recv().await
            };
            let Some(mut batch) = task else {
                break;
            };

            let ctx = ProcessingContext::new(
                self.shared.queue_name.clone(),
                worker_id.clone(),
                self.shared.cancellation.clone(),
            );

            let outcome = AssertUnwindSafe(self.shared.handler.process(&ctx, &mut batch))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        worker_id = %worker_id,
                        request_id = %ctx.request_id(),
                        error = %e,
                        "Message handler returned an error"
                    );
                }
                Err(panic) => {
                    error!(
                        worker_id = %worker_id,
                        request_id = %ctx.request_id(),
                        panic = %panic_message(&*panic),
                        "Worker panicked while handling messages"
                    );
                    // The supervisor outlives every worker it tracks
                    let _ = self.exits.send(WorkerExit::Panicked(self.id));
                    return;
                }
            }
        }

        debug!(worker_id = %worker_id, "Worker stopped");
        let _ = self.exits.send(WorkerExit::Finished(self.id));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Everything needed to spawn another worker
#[derive(Clone)]
struct Spawner {
    shared: Arc<Shared>,
    exits: mpsc::UnboundedSender<WorkerExit>,
    tracker: TaskTracker,
    next_id: Arc<AtomicUsize>,
}

impl Spawner {
    fn spawn(&self, workers: &mut HashMap<usize, Instant>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        workers.insert(id, Instant::now());

        let worker = Worker {
            id,
            shared: Arc::clone(&self.shared),
            exits: self.exits.clone(),
        };
        self.tracker.spawn(worker.start());
        id
    }
}

/// Fixed-capacity worker pool fed through [`Pool::submit`]
pub struct Pool {
    name: String,
    concurrency: usize,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: WorkerMap,
    tracker: TaskTracker,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Spawn `concurrency` workers and their supervisor.
    ///
    /// Must be called inside a Tokio runtime. `cancellation` is handed to the
    /// handler through each batch's [`ProcessingContext`]; it does not stop
    /// the pool, [`Pool::close`] does.
    pub fn run(
        name: impl Into<String>,
        queue_name: QueueName,
        concurrency: usize,
        handler: Arc<dyn MessageHandler>,
        cancellation: CancellationToken,
    ) -> Self {
        let name = name.into();
        let concurrency = concurrency.max(1);

        // One slot per worker so a slow pool pushes back on the poller
        let (sender, receiver) = mpsc::channel(concurrency);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let spawner = Spawner {
            shared: Arc::new(Shared {
                name: name.clone(),
                queue_name,
                handler,
                cancellation,
                tasks: tokio::sync::Mutex::new(receiver),
            }),
            exits: exit_tx,
            tracker: TaskTracker::new(),
            next_id: Arc::new(AtomicUsize::new(0)),
        };

        let workers: WorkerMap = Arc::new(Mutex::new(HashMap::new()));
        {
            let mut live = lock(&workers);
            for _ in 0..concurrency {
                spawner.spawn(&mut live);
            }
        }

        let tracker = spawner.tracker.clone();
        let supervisor = tokio::spawn(supervise(
            name.clone(),
            spawner,
            exit_rx,
            Arc::clone(&workers),
        ));

        info!(pool = %name, concurrency, "Worker pool started");

        Self {
            name,
            concurrency,
            sender: Mutex::new(Some(sender)),
            workers,
            tracker,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured number of workers
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Workers currently alive
    pub fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Queue a task, waiting while every worker is busy and the channel is full
    pub async fn submit(&self, task: Task) -> Result<(), QueueError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let Some(sender) = sender else {
            return Err(closed(&self.name));
        };

        sender.send(task).await.map_err(|_| closed(&self.name))
    }

    /// Stop accepting tasks and wait until every worker has exited.
    ///
    /// Tasks already queued are still processed, including those queued
    /// behind a worker that panics during the close. Calling again is a no-op.
    pub async fn close(&self) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(sender) = sender else {
            return;
        };
        drop(sender);

        // Returns once the channel is drained and the last worker has exited
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.await {
                error!(pool = %self.name, error = %e, "Pool supervisor failed");
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        lock(&self.workers).clear();

        info!(pool = %self.name, "Worker pool closed");
    }
}

fn closed(name: &str) -> QueueError {
    QueueError::InvalidState {
        message: format!("worker pool '{}' is closed", name),
    }
}

fn lock(workers: &WorkerMap) -> MutexGuard<'_, HashMap<usize, Instant>> {
    workers.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replace every worker that panics; stop once no worker is left.
///
/// Panicked workers are always replaced, so the map only empties after every
/// worker has seen the closed, drained task channel.
async fn supervise(
    name: String,
    spawner: Spawner,
    mut exits: mpsc::UnboundedReceiver<WorkerExit>,
    workers: WorkerMap,
) {
    // The spawner holds a sender, so recv only yields None if it is dropped
    while let Some(exit) = exits.recv().await {
        let mut live = lock(&workers);
        match exit {
            WorkerExit::Finished(id) => {
                live.remove(&id);
            }
            WorkerExit::Panicked(id) => {
                live.remove(&id);
                let replacement = spawner.spawn(&mut live);
                warn!(
                    pool = %name,
                    failed_worker = id,
                    replacement_worker = replacement,
                    "Replaced panicked worker"
                );
            }
        }

        if live.is_empty() {
            break;
        }
    }

    debug!(pool = %name, "Pool supervisor stopped");
}
