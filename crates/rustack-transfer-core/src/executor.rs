//! The bounded worker pool transfers run on.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::error::{TransferError, TransferResult};

/// A transfer that must reach a terminal state when its executor is shut
/// down forcibly.
pub(crate) trait ShutdownHook: Send + Sync {
    /// Cancel the transfer. Storage cleanup it still needs goes on
    /// `runtime`, outside the executor's tracked tasks.
    fn on_forced_shutdown(self: Arc<Self>, runtime: &Handle);
}

/// A caller-owned pool running transfer work on a tokio runtime.
///
/// At most `max_concurrency` submitted tasks run at a time. Delayed work
/// sleeps without holding a slot, so a waiting poll never blocks storage
/// requests.
#[derive(Debug)]
pub struct TransferExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
    shutdown: AtomicBool,
    terminated: AtomicBool,
    tasks: Mutex<Vec<AbortHandle>>,
    hooks: Mutex<Vec<Weak<dyn ShutdownHook>>>,
}

impl TransferExecutor {
    /// Create an executor on the current tokio runtime.
    pub fn new(max_concurrency: usize) -> TransferResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| anyhow::anyhow!("transfer executor needs a tokio runtime: {e}"))?;
        Ok(Self::with_handle(handle, max_concurrency))
    }

    /// Create an executor spawning onto `handle`.
    #[must_use]
    pub fn with_handle(handle: Handle, max_concurrency: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            shutdown: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Run `work` on the pool.
    ///
    /// Rejected with [`TransferError::Canceled`] after [`shutdown`](Self::shutdown).
    ///
    /// # Examples
    ///
    /// ```
    /// use rustack_transfer_core::TransferExecutor;
    ///
    /// # tokio_test::block_on(async {
    /// let executor = TransferExecutor::new(4).unwrap();
    /// let handle = executor.submit(async { Ok(21 * 2) }).unwrap();
    /// assert_eq!(handle.await.unwrap().unwrap(), 42);
    ///
    /// executor.shutdown();
    /// assert!(executor.submit(async { Ok(()) }).is_err());
    /// # });
    /// ```
    pub fn submit<F, T>(&self, work: F) -> TransferResult<JoinHandle<TransferResult<T>>>
    where
        F: Future<Output = TransferResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            warn!("rejecting transfer work submitted after shutdown");
            return Err(TransferError::Canceled);
        }
        Ok(self.spawn_tracked(None, work))
    }

    /// Run `work` on the pool after `delay`.
    ///
    /// Already-running transfers keep polling after a graceful shutdown;
    /// only [`shutdown_now`](Self::shutdown_now) rejects delayed work.
    pub fn schedule_after<F, T>(
        &self,
        delay: Duration,
        work: F,
    ) -> TransferResult<JoinHandle<TransferResult<T>>>
    where
        F: Future<Output = TransferResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.terminated.load(Ordering::Acquire) {
            warn!("rejecting delayed transfer work after forced shutdown");
            return Err(TransferError::Canceled);
        }
        Ok(self.spawn_tracked(Some(delay), work))
    }

    fn spawn_tracked<F, T>(&self, delay: Option<Duration>, work: F) -> JoinHandle<TransferResult<T>>
    where
        F: Future<Output = TransferResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let handle = self.handle.spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| TransferError::Canceled)?;
            work.await
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());
        handle
    }

    /// Run `hook` if the executor is shut down with
    /// [`shutdown_now`](Self::shutdown_now) while the transfer is alive.
    pub(crate) fn register_shutdown_hook(&self, hook: &Arc<dyn ShutdownHook>) {
        let mut hooks = self.hooks.lock();
        hooks.retain(|registered| registered.strong_count() > 0);
        hooks.push(Arc::downgrade(hook));
    }

    /// Stop accepting new work. Running transfers finish normally.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!("transfer executor shut down");
        }
    }

    /// Stop accepting any work, abort every running task and cancel the
    /// transfers they belonged to.
    pub fn shutdown_now(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.terminated.store(true, Ordering::Release);
        self.permits.close();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        debug!(tasks = tasks.len(), "aborting transfer tasks");
        for task in tasks {
            task.abort();
        }
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks.iter().filter_map(Weak::upgrade) {
            hook.on_forced_shutdown(&self.handle);
        }
    }

    /// Whether new submissions are rejected.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Number of tracked tasks that have not finished yet.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }
}
