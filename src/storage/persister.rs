//! Bounded background writer for best-effort store mirroring
//!
//! Hot paths hand their store writes to a [`Persister`] instead of awaiting them.
//! Each write runs on its own task with its own timeout; a semaphore caps how many
//! talk to the store at once. Writes to the same record key are chained, so they
//! land in the order they were queued. On shutdown [`Persister::drain`] waits for
//! pending writes up to a deadline and abandons the rest.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;

use super::StoreResult;

/// Default number of writes allowed to run concurrently
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Resolves once the last queued write for a key has finished or was dropped
type Tail = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct Pending {
    tasks: JoinSet<()>,
    tails: HashMap<String, Tail>,
}

impl Pending {
    fn reap(&mut self) {
        while self.tasks.try_join_next().is_some() {}
        self.tails.retain(|_, tail| tail.peek().is_none());
    }
}

/// Background store writer
#[derive(Clone)]
pub struct Persister {
    pending: Arc<Mutex<Pending>>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Persister {
    /// Create a writer where every operation gets `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self::with_limit(timeout, DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_limit(timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Pending::default())),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            timeout,
        }
    }

    /// Per-operation budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue a write; never blocks the caller
    ///
    /// The write starts only after every earlier write queued for the same
    /// `key` has finished. Must be called from within a tokio runtime.
    pub fn spawn(&self, op: &'static str, key: String, fut: BoxFuture<'static, StoreResult<()>>) {
        let permits = Arc::clone(&self.permits);
        let budget = self.timeout;

        let (done, finished) = oneshot::channel::<()>();
        let tail: Tail = finished.map(|_| ()).boxed().shared();

        let mut pending = self.lock();
        pending.reap();
        let previous = pending.tails.insert(key.clone(), tail);

        pending.tasks.spawn(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match tokio::time::timeout(budget, fut).await {
                Ok(Ok(())) => tracing::debug!(op, key = %key, "Store write succeeded"),
                Ok(Err(e)) => tracing::warn!(op, key = %key, error = %e, "Store write failed"),
                Err(_) => tracing::warn!(
                    op,
                    key = %key,
                    timeout_ms = budget.as_millis() as u64,
                    "Store write timed out"
                ),
            }
            let _ = done.send(());
        });
    }

    /// Number of writes not yet reaped
    pub fn pending(&self) -> usize {
        let mut pending = self.lock();
        pending.reap();
        pending.tasks.len()
    }

    /// Wait for pending writes, giving up after `deadline`
    ///
    /// Returns the number of writes abandoned.
    pub async fn drain(&self, deadline: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.lock()).tasks;
        if tasks.is_empty() {
            return 0;
        }

        let waited = tokio::time::timeout(deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if waited.is_err() {
            let abandoned = tasks.len();
            tracing::warn!(abandoned, "Store writes abandoned at shutdown");
            tasks.abort_all();
            return abandoned;
        }

        tracing::info!("Pending store writes drained");
        0
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
