//! Tests for the self-healing worker pool.

use super::*;
use async_trait::async_trait;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Counts processed batches; panics on bodies equal to "panic"
#[derive(Default)]
struct CountingHandler {
    processed: AtomicUsize,
    errored: AtomicUsize,
}

#[async_trait]
impl MessageHandler for CountingHandler {
    async fn process(
        &self,
        _ctx: &ProcessingContext,
        messages: &mut [Message],
    ) -> anyhow::Result<()> {
        for message in messages.iter() {
            match message.value.as_ref() {
                b"panic" => panic!("poison message"),
                b"error" => {
                    self.errored.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("handler error");
                }
                _ => {}
            }
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn queue_name() -> QueueName {
    QueueName::new("orders".to_string()).unwrap()
}

fn start_pool(concurrency: usize, handler: Arc<CountingHandler>) -> Pool {
    Pool::run(
        "test-pool",
        queue_name(),
        concurrency,
        handler,
        CancellationToken::new(),
    )
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_pool_processes_submitted_tasks() {
    let handler = Arc::new(CountingHandler::default());
    let pool = start_pool(3, handler.clone());
    assert_eq!(pool.worker_count(), 3);

    for i in 0..20 {
        pool.submit(vec![Message::new(format!("m{}", i))]).await.unwrap();
    }
    pool.close().await;

    assert_eq!(handler.processed.load(Ordering::SeqCst), 20);
}

/// A returned error is logged; the worker keeps going.
#[tokio::test]
async fn test_handler_error_does_not_replace_worker() {
    let handler = Arc::new(CountingHandler::default());
    let pool = start_pool(1, handler.clone());

    pool.submit(vec![Message::new("error")]).await.unwrap();
    pool.submit(vec![Message::new("ok")]).await.unwrap();
    pool.close().await;

    assert_eq!(handler.errored.load(Ordering::SeqCst), 1);
    assert_eq!(handler.processed.load(Ordering::SeqCst), 1);
}

/// A panicking worker is replaced and the pool keeps its capacity.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_worker_is_replaced() {
    let handler = Arc::new(CountingHandler::default());
    let pool = start_pool(2, handler.clone());

    pool.submit(vec![Message::new("panic")]).await.unwrap();

    // The replacement gets a fresh id beyond the initial ones
    wait_until(|| {
        let live = lock(&pool.workers);
        live.len() == 2 && live.keys().any(|id| *id >= 2)
    })
    .await;

    for i in 0..10 {
        pool.submit(vec![Message::new(format!("m{}", i))]).await.unwrap();
    }
    pool.close().await;

    assert_eq!(handler.processed.load(Ordering::SeqCst), 10);
}

/// Even a pool of one survives repeated panics.
#[tokio::test]
async fn test_single_worker_pool_survives_many_panics() {
    let handler = Arc::new(CountingHandler::default());
    let pool = start_pool(1, handler.clone());

    for _ in 0..3 {
        pool.submit(vec![Message::new("panic")]).await.unwrap();
    }
    pool.submit(vec![Message::new("ok")]).await.unwrap();

    wait_until(|| handler.processed.load(Ordering::SeqCst) == 1).await;
    assert_eq!(pool.worker_count(), 1);
    pool.close().await;
}

#[tokio::test]
async fn test_submit_after_close_fails() {
    let pool = start_pool(1, Arc::new(CountingHandler::default()));
    pool.close().await;

    let result = pool.submit(vec![Message::new("late")]).await;
    assert!(matches!(result, Err(QueueError::InvalidState { .. })));
    assert_eq!(pool.worker_count(), 0);

    // Closing twice is harmless
    pool.close().await;
}

/// Close waits for work already in progress.
#[tokio::test]
async fn test_close_drains_in_flight_work() {
    struct SlowHandler {
        finished: AtomicBool,
    }

    #[async_trait]
    impl MessageHandler for SlowHandler {
        async fn process(
            &self,
            _ctx: &ProcessingContext,
            _messages: &mut [Message],
        ) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let handler = Arc::new(SlowHandler {
        finished: AtomicBool::new(false),
    });
    let pool = Pool::run("slow", queue_name(), 1, handler.clone(), CancellationToken::new());

    pool.submit(vec![Message::new("a")]).await.unwrap();
    pool.close().await;

    assert!(handler.finished.load(Ordering::SeqCst));
}

/// Tasks queued behind a panicking worker are still handled when the pool
/// closes straight away.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_after_panic_drains_queued_tasks() {
    let mut lost = 0;

    for _ in 0..200 {
        let handler = Arc::new(CountingHandler::default());
        let pool = start_pool(1, handler.clone());

        pool.submit(vec![Message::new("panic")]).await.unwrap();
        pool.submit(vec![Message::new("ok")]).await.unwrap();
        pool.close().await;

        if handler.processed.load(Ordering::SeqCst) != 1 {
            lost += 1;
        }
        assert_eq!(pool.worker_count(), 0);
    }

    assert_eq!(lost, 0, "queued task dropped in {} of 200 closes", lost);
}

/// Several panics queued ahead of normal work across a wider pool.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_after_many_panics_drains_queue() {
    for _ in 0..50 {
        let handler = Arc::new(CountingHandler::default());
        let pool = start_pool(2, handler.clone());

        for i in 0..6 {
            let body = if i % 2 == 0 { "panic".to_string() } else { format!("m{}", i) };
            pool.submit(vec![Message::new(body)]).await.unwrap();
        }
        pool.close().await;

        assert_eq!(handler.processed.load(Ordering::SeqCst), 3);
    }
}

#[test]
fn test_panic_message_extraction() {
    let payload: Box<dyn Any + Send> = Box::new("static str");
    assert_eq!(panic_message(&*payload), "static str");

    let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
    assert_eq!(panic_message(&*payload), "owned");

    let payload: Box<dyn Any + Send> = Box::new(42u32);
    assert_eq!(panic_message(&*payload), "unknown panic");
}
