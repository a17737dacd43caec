//! Monitors: the outstanding unit of work behind a transfer.
//!
//! A monitor hands out a [`TransferFuture`] that resolves when its current
//! unit of work finishes. Multipart transfers replace that unit of work on
//! every poll, so waiters must fetch the future again until
//! [`TransferMonitor::is_done`] holds.

use std::fmt;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rustack_transfer_model::PartETag;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::error::{TransferError, TransferResult};

/// A cloneable handle on a monitor's current unit of work.
pub type TransferFuture = Shared<BoxFuture<'static, TransferResult<()>>>;

/// The asynchronous work backing a transfer.
pub trait TransferMonitor: Send + Sync + fmt::Debug {
    /// The currently outstanding unit of work.
    fn future(&self) -> TransferFuture;

    /// Whether the transfer has no more work to do.
    fn is_done(&self) -> bool;
}

/// Map a task join failure into a transfer error.
pub(crate) fn join_error(err: JoinError) -> TransferError {
    if err.is_cancelled() {
        TransferError::Canceled
    } else {
        anyhow::anyhow!("transfer task failed: {err}").into()
    }
}

// ---------------------------------------------------------------------------
// TaskSlot
// ---------------------------------------------------------------------------

struct ScheduledTask {
    future: TransferFuture,
    abort: AbortHandle,
}

#[derive(Default)]
struct SlotInner {
    current: Option<ScheduledTask>,
    closed: bool,
}

/// Holds the most recently scheduled task of a monitor.
///
/// Spawning and installing happen under one lock, so a task that
/// reschedules its successor can never be overwritten by an older one.
#[derive(Default)]
pub(crate) struct TaskSlot {
    inner: Mutex<SlotInner>,
}

impl fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TaskSlot")
            .field("scheduled", &inner.current.is_some())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl TaskSlot {
    /// Spawn a task with `spawn` and make it the current one.
    ///
    /// Fails with [`TransferError::Canceled`] once the slot is closed.
    pub(crate) fn launch<F>(&self, spawn: F) -> TransferResult<()>
    where
        F: FnOnce() -> TransferResult<JoinHandle<TransferResult<()>>>,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TransferError::Canceled);
        }
        let handle = spawn()?;
        let abort = handle.abort_handle();
        let future = async move { handle.await.unwrap_or_else(|e| Err(join_error(e))) }
            .boxed()
            .shared();
        inner.current = Some(ScheduledTask { future, abort });
        Ok(())
    }

    /// The current task's future. Resolves to `Canceled` when nothing was
    /// ever scheduled and the slot is closed.
    pub(crate) fn current(&self) -> TransferFuture {
        let inner = self.inner.lock();
        match &inner.current {
            Some(task) => task.future.clone(),
            None if inner.closed => futures::future::ready(Err(TransferError::Canceled))
                .boxed()
                .shared(),
            None => futures::future::pending().boxed().shared(),
        }
    }

    /// Whether the current task has finished (or nothing is scheduled).
    pub(crate) fn is_finished(&self) -> bool {
        self.inner
            .lock()
            .current
            .as_ref()
            .is_none_or(|task| task.abort.is_finished())
    }

    /// Whether the slot no longer accepts tasks.
    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Refuse further tasks and abort the current one.
    pub(crate) fn close_and_abort(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        if let Some(task) = &inner.current {
            task.abort.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// PartTasks
// ---------------------------------------------------------------------------

/// A spawned part transfer.
#[derive(Debug)]
pub(crate) struct PartTask {
    pub(crate) part_number: u32,
    pub(crate) handle: JoinHandle<TransferResult<PartETag>>,
}

#[derive(Debug, Default)]
struct PartsInner {
    tasks: Vec<PartTask>,
    canceled: bool,
}

/// The part tasks of one multipart session.
///
/// Parts are registered by the initiating iteration only, before the first
/// poll is scheduled; polls then only inspect or drain them.
#[derive(Debug, Default)]
pub(crate) struct PartTasks {
    inner: Mutex<PartsInner>,
}

impl PartTasks {
    /// Register a part task. A task pushed after cancellation is aborted.
    pub(crate) fn push(
        &self,
        part_number: u32,
        handle: JoinHandle<TransferResult<PartETag>>,
    ) -> TransferResult<()> {
        let mut inner = self.inner.lock();
        if inner.canceled {
            handle.abort();
            return Err(TransferError::Canceled);
        }
        inner.tasks.push(PartTask {
            part_number,
            handle,
        });
        Ok(())
    }

    /// Whether every registered part task has finished.
    pub(crate) fn all_finished(&self) -> bool {
        self.inner
            .lock()
            .tasks
            .iter()
            .all(|task| task.handle.is_finished())
    }

    /// Take all registered tasks.
    pub(crate) fn take(&self) -> Vec<PartTask> {
        std::mem::take(&mut self.inner.lock().tasks)
    }

    /// Abort and forget every part task.
    pub(crate) fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.canceled = true;
        for task in inner.tasks.drain(..) {
            task.handle.abort();
        }
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub(crate) fn is_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    /// Number of registered tasks.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }
}
