//! Process lifecycle: periodic cleanup, signal handling and graceful shutdown

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::Result;

/// Default time between two cleanup sweeps
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default budget for all shutdown targets together
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Component with a periodic sweep
#[async_trait]
pub trait Cleaner: Send + Sync {
    fn name(&self) -> &str;

    async fn clean(&self);
}

/// Component that must release resources before exit
#[async_trait]
pub trait ShutdownTarget: Send + Sync {
    fn name(&self) -> &str;

    async fn shutdown(&self) -> Result<()>;
}

/// Cancellation handle shared by every long-running loop
///
/// Cloned receivers observe the same flag; [`Cancel::cancel`] is idempotent.
#[derive(Clone)]
pub struct Cancel {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Cancel {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`Cancel::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Invoke every cleaner once per `interval` until cancelled
///
/// The first sweep happens one interval after the call, not immediately.
pub async fn run_cleanup(cleaners: Vec<Arc<dyn Cleaner>>, interval: Duration, cancel: Cancel) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        cleaners = cleaners.len(),
        interval_secs = interval.as_secs(),
        "Cleanup loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for cleaner in &cleaners {
                    tracing::debug!(cleaner = cleaner.name(), "Running cleanup");
                    cleaner.clean().await;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("Cleanup loop stopped");
}

/// Shut every target down concurrently within `timeout`
///
/// Individual failures and the timeout itself are logged; this never fails.
pub async fn graceful_shutdown(targets: Vec<Arc<dyn ShutdownTarget>>, timeout: Duration) {
    tracing::info!(
        targets = targets.len(),
        timeout_secs = timeout.as_secs(),
        "Graceful shutdown started"
    );

    let all = join_all(targets.iter().map(|target| async move {
        let result = target.shutdown().await;
        (target.name().to_string(), result)
    }));

    match tokio::time::timeout(timeout, all).await {
        Ok(results) => {
            for (name, result) in results {
                match result {
                    Ok(()) => tracing::info!(target_name = %name, "Shut down"),
                    Err(e) => tracing::error!(target_name = %name, error = %e, "Shutdown failed"),
                }
            }
        }
        Err(_) => tracing::warn!(
            timeout_secs = timeout.as_secs(),
            "Graceful shutdown timed out, exiting anyway"
        ),
    }
}

/// Wait for SIGINT or SIGTERM
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => log_ctrl_c(result),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                log_ctrl_c(tokio::signal::ctrl_c().await);
            }
        }
    }

    #[cfg(not(unix))]
    log_ctrl_c(tokio::signal::ctrl_c().await);
}

fn log_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::info!("Received SIGINT"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        hits: AtomicUsize,
    }

    #[async_trait]
    impl Cleaner for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn clean(&self) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl ShutdownTarget for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn shutdown(&self) -> Result<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ShutdownTarget for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn shutdown(&self) -> Result<()> {
            Err(crate::error::Error::other("boom"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_ticks_until_cancelled() {
        let counting = Arc::new(Counting {
            hits: AtomicUsize::new(0),
        });
        let cancel = Cancel::new();
        let handle = tokio::spawn(run_cleanup(
            vec![counting.clone() as Arc<dyn Cleaner>],
            Duration::from_secs(60),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(185)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(counting.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_respects_timeout() {
        let started = tokio::time::Instant::now();
        graceful_shutdown(
            vec![
                Arc::new(Slow(Duration::from_secs(3600))) as Arc<dyn ShutdownTarget>,
                Arc::new(Failing),
            ],
            Duration::from_secs(15),
        )
        .await;
        assert!(started.elapsed() < Duration::from_secs(16));
    }

    #[tokio::test]
    async fn test_shutdown_runs_targets_concurrently() {
        let started = std::time::Instant::now();
        graceful_shutdown(
            vec![
                Arc::new(Slow(Duration::from_millis(100))) as Arc<dyn ShutdownTarget>,
                Arc::new(Slow(Duration::from_millis(100))),
                Arc::new(Failing),
            ],
            Duration::from_secs(5),
        )
        .await;
        assert!(started.elapsed() < Duration::from_millis(190));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let cancel = Cancel::new();
        assert!(!cancel.is_cancelled());
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.clone().is_cancelled());
    }

    #[test]
    fn test_cancelled_resolves_after_cancel() {
        let cancel = Cancel::new();
        cancel.cancel();
        tokio_test::block_on(cancel.cancelled());
    }
}
