//! Tests for the shutdown registry.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Records the order it was closed in
struct OrderedCloser {
    name: &'static str,
    closed: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Closer for OrderedCloser {
    async fn close(&self) {
        self.closed.lock().unwrap().push(self.name);
    }
}

struct HangingCloser;

#[async_trait]
impl Closer for HangingCloser {
    async fn close(&self) {
        std::future::pending::<()>().await;
    }
}

#[derive(Default)]
struct CountingCloser {
    calls: AtomicUsize,
}

#[async_trait]
impl Closer for CountingCloser {
    async fn close(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_closes_in_reverse_registration_order() {
    let closed = Arc::new(Mutex::new(Vec::new()));
    let registry = ShutdownRegistry::new();

    for name in ["publisher", "consumer-a", "consumer-b"] {
        registry.register(
            name,
            Arc::new(OrderedCloser {
                name,
                closed: closed.clone(),
            }),
        );
    }
    assert_eq!(registry.len(), 3);

    let timed_out = registry.shutdown().await;
    assert!(timed_out.is_empty());
    assert_eq!(
        *closed.lock().unwrap(),
        vec!["consumer-b", "consumer-a", "publisher"]
    );
    assert!(registry.is_empty());
}

/// A component that never finishes does not block the others.
#[tokio::test(start_paused = true)]
async fn test_hanging_closer_times_out() {
    let registry = ShutdownRegistry::with_timeout(Duration::from_secs(1));
    let counting = Arc::new(CountingCloser::default());

    registry.register("counting", counting.clone());
    registry.register("hanging", Arc::new(HangingCloser));

    let timed_out = registry.shutdown().await;
    assert_eq!(timed_out, vec!["hanging".to_string()]);
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_shutdown_is_noop() {
    let registry = ShutdownRegistry::new();
    let counting = Arc::new(CountingCloser::default());
    registry.register("counting", counting.clone());

    registry.shutdown().await;
    registry.shutdown().await;
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_noop_lifecycle_accepts_registrations() {
    NoopLifecycle.register("anything", Arc::new(CountingCloser::default()));
}
