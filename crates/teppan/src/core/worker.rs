//! Module for signalling shutdown to the server's background tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A one-way switch from running to stopped that tasks can wait on.
///
/// Once triggered it stays triggered; every current and future waiter
/// observes it.
pub(crate) struct Shutdown {
    /// Flag indicating whether background tasks should continue running
    running: AtomicBool,

    /// Wakes tasks parked in [`Shutdown::stopped`]
    notifier: Notify,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            notifier: Notify::new(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_waiters();
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub(crate) async fn stopped(&self) {
        loop {
            let notified = self.notifier.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent trigger is not missed.
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

/// A handle for a background task that runs until the shared [`Shutdown`] fires.
///
/// # Example
///
/// ```ignore
/// let shutdown = Arc::new(Shutdown::new());
/// let worker = WorkerHandle::new(shutdown.clone(), |shutdown| {
///     tokio::spawn(async move {
///         while shutdown.is_running() {
///             tokio::select! {
///                 _ = shutdown.stopped() => {},
///                 _ = tokio::time::sleep(Duration::from_secs(5)) => println!("Tick"),
///             }
///         }
///     })
/// });
///
/// // Stops the task and waits for it to finish
/// worker.join().await;
/// ```
pub(crate) struct WorkerHandle {
    shutdown: Arc<Shutdown>,

    /// Handle to the spawned task, becomes `None` once joined or shut down
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns the task built by `task`, passing it the shared shutdown signal.
    pub(crate) fn new<F>(shutdown: Arc<Shutdown>, task: F) -> Self
    where
        F: FnOnce(Arc<Shutdown>) -> JoinHandle<()>,
    {
        let handle = task(shutdown.clone());
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Triggers shutdown and waits for the task to finish.
    pub(crate) async fn join(mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
    }

    /// Triggers shutdown without waiting; the task is reaped in the background.
    pub(crate) fn shutdown(&mut self) {
        self.shutdown.trigger();

        if let Some(handle) = self.handle.take() {
            if tokio::runtime::Handle::try_current().is_ok() {
                tokio::spawn(async move {
                    let _ = handle.await;
                });
            }
        }
    }
}

impl Drop for WorkerHandle {
    /// Ensures the background task is told to stop when the handle is dropped.
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time;

    #[tokio::test]
    async fn test_stopped_resolves_after_trigger() {
        let shutdown = Arc::new(Shutdown::new());
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.stopped().await }
        });

        time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        shutdown.trigger();
        time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_after_trigger_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        time::timeout(Duration::from_millis(100), shutdown.stopped()).await.unwrap();
        assert!(!shutdown.is_running());
    }

    #[tokio::test]
    async fn test_join_stops_worker() {
        let shutdown = Arc::new(Shutdown::new());
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = observed.clone();

        let worker = WorkerHandle::new(shutdown.clone(), |shutdown| {
            tokio::spawn(async move {
                shutdown.stopped().await;
                observed_clone.store(true, Ordering::SeqCst);
            })
        });

        worker.join().await;
        assert!(observed.load(Ordering::SeqCst));
        assert!(!shutdown.is_running());
    }

    #[tokio::test]
    async fn test_worker_drop_triggers_shutdown() {
        let shutdown = Arc::new(Shutdown::new());
        let observed = Arc::new(AtomicBool::new(false));
        let observed_clone = observed.clone();

        {
            let _worker = WorkerHandle::new(shutdown.clone(), |shutdown| {
                tokio::spawn(async move {
                    shutdown.stopped().await;
                    observed_clone.store(true, Ordering::SeqCst);
                })
            });
        }

        time::sleep(Duration::from_millis(50)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_multiple_shutdowns() {
        let shutdown = Arc::new(Shutdown::new());
        let mut worker = WorkerHandle::new(shutdown.clone(), |shutdown| {
            tokio::spawn(async move { shutdown.stopped().await })
        });

        worker.shutdown();
        worker.shutdown();
        worker.shutdown();

        assert!(!shutdown.is_running());
    }
}
