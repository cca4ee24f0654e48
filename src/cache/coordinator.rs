//! Fetch Coordinator - per-chunk single-flight
//!
//! Collapses concurrent misses for the same chunk into one in-flight
//! operation. The registry maps a chunk index to a cloneable shared future;
//! late callers clone and await it instead of starting their own fetch.
//!
//! Each operation runs as its own task, so it completes even if every
//! caller stops waiting. The slot is released by that task when it
//! finishes, whether it succeeded or failed, so failures are never cached
//! and the next call starts a fresh attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

type Registry<T> = Arc<Mutex<HashMap<u64, SharedFetch<T>>>>;

/// Releases a chunk's slot when its task ends, including on panic or abort
struct SlotGuard<T> {
    registry: Registry<T>,
    key: u64,
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// Registry of in-flight operations keyed by chunk index
pub struct FetchCoordinator<T> {
    /// At most one live entry per chunk index
    pending: Registry<T>,
    /// Operations actually started
    started: AtomicU64,
    /// Calls that joined an operation already in flight
    joined: AtomicU64,
}

impl<T> FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty coordinator
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Run `operation` for `key` unless one is already in flight, in which
    /// case wait for that one and share its result.
    ///
    /// `operation` is only a constructor: it is called at most once, under
    /// the registry lock, and must not call back into the coordinator. The
    /// future it returns is spawned on the current runtime.
    pub async fn run_exclusive<F, Fut>(&self, key: u64, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fetch = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(in_flight) => {
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    trace!(key, "joining in-flight fetch");
                    in_flight.clone()
                }
                None => {
                    self.started.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(&self.pending);
                    let op = operation();
                    // The guard blocks on this lock, so the slot is always
                    // inserted before it can be released.
                    let task = tokio::spawn(async move {
                        let _slot = SlotGuard { registry, key };
                        op.await
                    });
                    let fetch = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(Error::Internal(format!("fetch task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    pending.insert(key, fetch.clone());
                    fetch
                }
            }
        };

        fetch.await
    }

    /// Whether an operation for `key` is in flight
    pub fn is_pending(&self, key: u64) -> bool {
        self.pending.lock().contains_key(&key)
    }

    /// Number of in-flight operations
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Operations started so far
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Calls that were served by an operation already in flight
    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}

impl<T> Default for FetchCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type Gate = Arc<Mutex<Option<oneshot::Receiver<()>>>>;

    fn gated_call(
        coord: Arc<FetchCoordinator<u64>>,
        calls: Arc<AtomicUsize>,
        gate: Gate,
        outcome: Result<u64>,
    ) -> tokio::task::JoinHandle<Result<u64>> {
        tokio::spawn(async move {
            coord
                .run_exclusive(7, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let rx = gate.lock().take();
                    async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        outcome
                    }
                })
                .await
        })
    }

    async fn wait_for_callers(coord: &FetchCoordinator<u64>, n: u64) {
        while coord.started() + coord.joined() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_operation() {
        let coord = Arc::new(FetchCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let gate: Gate = Arc::new(Mutex::new(Some(rx)));

        let handles: Vec<_> = (0..5)
            .map(|_| gated_call(coord.clone(), calls.clone(), gate.clone(), Ok(42)))
            .collect();

        wait_for_callers(&coord, 5).await;
        assert!(coord.is_pending(7));
        tx.send(()).unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.started(), 1);
        assert_eq!(coord.joined(), 4);
        assert_eq!(coord.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_then_cleared() {
        let coord = Arc::new(FetchCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let gate: Gate = Arc::new(Mutex::new(Some(rx)));
        let boom = Error::Source("connection reset".into());

        let handles: Vec<_> = (0..3)
            .map(|_| gated_call(coord.clone(), calls.clone(), gate.clone(), Err(boom.clone())))
            .collect();

        wait_for_callers(&coord, 3).await;
        tx.send(()).unwrap();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(boom.clone()));
        }
        assert!(!coord.is_pending(7));

        // A later call starts a fresh attempt.
        let retry = gated_call(coord.clone(), calls.clone(), gate.clone(), Ok(1));
        assert_eq!(retry.await.unwrap(), Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_collapse() {
        let coord = FetchCoordinator::<u64>::new();
        let a = coord.run_exclusive(1, || async { Ok(10) });
        let b = coord.run_exclusive(2, || async { Ok(20) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!((a, b), (Ok(10), Ok(20)));
        assert_eq!(coord.started(), 2);
        assert_eq!(coord.joined(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_rerun() {
        let coord = FetchCoordinator::<u64>::new();
        assert_eq!(coord.run_exclusive(3, || async { Ok(1) }).await, Ok(1));
        assert_eq!(coord.run_exclusive(3, || async { Ok(2) }).await, Ok(2));
        assert_eq!(coord.started(), 2);
    }

    #[tokio::test]
    async fn test_operation_outlives_abandoned_caller() {
        let coord = FetchCoordinator::<u64>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();

        let counted = calls.clone();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            coord.run_exclusive(9, move || async move {
                let _ = rx.await;
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(coord.is_pending(9));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while coord.is_pending(9) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("operation never finished");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.pending_count(), 0);
        // The slot is free again, so the next call runs a new operation.
        assert_eq!(coord.run_exclusive(9, || async { Ok(6) }).await, Ok(6));
        assert_eq!(coord.started(), 2);
    }

    #[tokio::test]
    async fn test_panicking_operation_releases_slot() {
        let coord = FetchCoordinator::<u64>::new();
        let result = coord
            .run_exclusive(4, || async { panic!("decoder bug") })
            .await;
        assert_matches!(result, Err(Error::Internal(_)));
        assert!(!coord.is_pending(4));
    }
}
