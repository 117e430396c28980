//! Module for handling long-running background tasks.

use std::pin::pin;
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tokio::{task::JoinHandle, sync::Notify};

/// Cooperative stop signal shared between a task and whoever owns it.
///
/// Cloning is cheap; every clone observes the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Flag indicating whether tasks should continue running
    running: Arc<AtomicBool>,

    /// Wakes tasks parked in [`Shutdown::stopped`]
    notifier: Arc<Notify>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            notifier: Arc::new(Notify::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals every holder to stop. Idempotent.
    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_waiters();
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn stopped(&self) {
        loop {
            // Register interest before checking the flag so a trigger between
            // the check and the await is not lost.
            let mut notified = pin!(self.notifier.notified());
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

/// A handle for managing a background task.
///
/// The task receives a [`Shutdown`] and is expected to return once it fires.
/// Dropping the handle fires it.
///
/// # Example
///
/// ```ignore
/// use courier::core::worker::WorkerHandle;
///
/// async fn example() {
///     let worker = WorkerHandle::new(|shutdown| {
///         tokio::spawn(async move {
///             while shutdown.is_running() {
///                 tokio::select! {
///                     _ = shutdown.stopped() => {}
///                     _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => println!("tick"),
///                 }
///             }
///         })
///     });
///
///     // Worker will be shut down when dropped
/// }
/// ```
pub struct WorkerHandle {
    shutdown: Shutdown,

    /// Handle to the spawned task, becomes `None` after shutdown is initiated
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns a task with a fresh [`Shutdown`].
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Shutdown) -> JoinHandle<()>,
    {
        Self::with_shutdown(Shutdown::new(), task)
    }

    /// Spawns a task bound to an existing [`Shutdown`], so an outer signal
    /// (Ctrl-C, a parent component) also stops it.
    pub fn with_shutdown<F>(shutdown: Shutdown, task: F) -> Self
    where
        F: FnOnce(Shutdown) -> JoinHandle<()>,
    {
        let handle = task(shutdown.clone());
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// True once the task has returned or the handle has been released.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signals the task to stop without waiting for it.
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();

        if let Some(handle) = self.handle.take() {
            tokio::spawn(async move {
                let _ = handle.await;
            });
        }
    }

    /// Signals the task to stop and waits until it has.
    pub async fn join(mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
