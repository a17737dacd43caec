//! The multipart session and the poll loop driving it to completion.
//!
//! Uploads and copies share one state machine:
//!
//! 1. The first iteration runs the transfer's [`MultipartCallable`]. A
//!    single-request transfer finishes right there; a multipart one
//!    registers its part tasks and asks to be polled.
//! 2. Each poll checks the part tasks without waiting on them. While any is
//!    still running the monitor sleeps for the poll interval (holding no
//!    worker slot) and polls again.
//! 3. Once every part finished, the session is completed with the part
//!    ETags sorted by part number.
//!
//! Cancellation ends in `Canceled`; any other failure aborts the session
//! and ends in `Failed`. Either way the error reaches every waiter.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use rustack_transfer_model::{
    AbortMultipartUploadRequest, CompleteMultipartUploadOutput, CompleteMultipartUploadRequest,
    ObjectStorage, PartETag,
};
use tokio::runtime::Handle;
use tracing::{debug, info, trace};

use crate::error::{TransferError, TransferResult};
use crate::executor::{ShutdownHook, TransferExecutor};
use crate::monitor::{PartTasks, TaskSlot, TransferFuture, TransferMonitor, join_error};
use crate::progress::ProgressEventCode;
use crate::state::TransferState;
use crate::transfer::TransferBase;

// ---------------------------------------------------------------------------
// MultipartSession
// ---------------------------------------------------------------------------

/// A multipart session on the storage backend.
pub(crate) struct MultipartSession {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    key: String,
    upload_id: OnceLock<String>,
    aborted: AtomicBool,
}

impl fmt::Debug for MultipartSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartSession")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("upload_id", &self.upload_id.get())
            .field("aborted", &self.aborted.load(Ordering::Relaxed))
            .finish()
    }
}

impl MultipartSession {
    pub(crate) fn new(
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
            key: key.into(),
            upload_id: OnceLock::new(),
            aborted: AtomicBool::new(false),
        }
    }

    pub(crate) fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub(crate) fn bucket(&self) -> &str {
        &self.bucket
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Record the session's upload id.
    pub(crate) fn set_upload_id(&self, upload_id: impl Into<String>) {
        let upload_id = upload_id.into();
        debug!(bucket = %self.bucket, key = %self.key, upload_id = %upload_id, "multipart session started");
        if self.upload_id.set(upload_id).is_err() {
            trace!(bucket = %self.bucket, key = %self.key, "upload id already recorded");
        }
    }

    /// The session's upload id, once initiated.
    pub(crate) fn upload_id(&self) -> Option<&str> {
        self.upload_id.get().map(String::as_str)
    }

    /// Assemble `parts` (already sorted by part number) into the object.
    pub(crate) async fn complete(
        &self,
        parts: Vec<PartETag>,
    ) -> TransferResult<CompleteMultipartUploadOutput> {
        let upload_id = self
            .upload_id()
            .ok_or_else(|| anyhow::anyhow!("multipart session was never initiated"))?;
        debug!(bucket = %self.bucket, key = %self.key, upload_id, parts = parts.len(), "completing multipart session");
        let output = self
            .storage
            .complete_multipart_upload(CompleteMultipartUploadRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                upload_id: upload_id.to_owned(),
                parts,
            })
            .await?;
        Ok(output)
    }

    /// Abort the session on the backend. Issued at most once; a failure is
    /// only logged.
    pub(crate) async fn abort(&self) {
        let Some(upload_id) = self.upload_id() else {
            return;
        };
        if self.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        let request = AbortMultipartUploadRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: upload_id.to_owned(),
        };
        match self.storage.abort_multipart_upload(request).await {
            Ok(()) => debug!(bucket = %self.bucket, key = %self.key, upload_id, "multipart session aborted"),
            Err(err) => info!(
                bucket = %self.bucket,
                key = %self.key,
                upload_id,
                error = %err,
                "Unable to abort multipart upload, you may need to manually remove uploaded parts"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// MultipartCallable
// ---------------------------------------------------------------------------

/// What the first iteration of a transfer produced.
#[derive(Debug)]
pub(crate) enum CallOutcome<T> {
    /// The transfer finished within the call.
    Completed {
        output: T,
        /// Whether a multipart session was used (the monitor then fires the
        /// `Completed` event itself).
        multipart: bool,
    },
    /// Parts were submitted; the session must be polled.
    Submitted,
}

/// The transfer-specific half of a multipart monitor.
#[async_trait]
pub(crate) trait MultipartCallable: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    /// Perform the transfer, or start its session and register its parts
    /// in `parts`.
    async fn call(&self, parts: &PartTasks) -> TransferResult<CallOutcome<Self::Output>>;

    /// The session this transfer uses when it goes multipart.
    fn session(&self) -> &MultipartSession;

    /// Parts already stored before this attempt (resumed uploads).
    fn existing_parts(&self) -> Vec<PartETag> {
        Vec::new()
    }

    /// Map the completed session into the transfer's result.
    fn completed_output(&self, output: CompleteMultipartUploadOutput) -> Self::Output;
}

// ---------------------------------------------------------------------------
// MultipartMonitor
// ---------------------------------------------------------------------------

enum Step<T> {
    Done { output: T, multipart: bool },
    Pending,
}

/// Drives one upload or copy from its first request to a terminal state.
pub(crate) struct MultipartMonitor<C: MultipartCallable> {
    base: Arc<TransferBase>,
    callable: C,
    executor: Arc<TransferExecutor>,
    poll_interval: Duration,
    slot: TaskSlot,
    parts: PartTasks,
    started: AtomicBool,
    done: AtomicBool,
    canceled: AtomicBool,
    output: OnceLock<C::Output>,
}

impl<C: MultipartCallable> fmt::Debug for MultipartMonitor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartMonitor")
            .field("transfer", &self.base.description())
            .field("session", self.callable.session())
            .field("slot", &self.slot)
            .field("done", &self.done.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: MultipartCallable> MultipartMonitor<C> {
    pub(crate) fn new(
        base: Arc<TransferBase>,
        callable: C,
        executor: Arc<TransferExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            base,
            callable,
            executor,
            poll_interval,
            slot: TaskSlot::default(),
            parts: PartTasks::default(),
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            output: OnceLock::new(),
        }
    }

    /// Attach to the transfer and submit the first iteration.
    pub(crate) fn start(self: &Arc<Self>) -> TransferResult<()> {
        let monitor: Arc<dyn TransferMonitor> = Arc::clone(self) as Arc<dyn TransferMonitor>;
        self.base.set_monitor(&monitor);
        let hook: Arc<dyn ShutdownHook> = Arc::clone(self) as Arc<dyn ShutdownHook>;
        self.executor.register_shutdown_hook(&hook);
        let this = Arc::clone(self);
        self.slot
            .launch(|| self.executor.submit(this.run()))
    }

    pub(crate) fn base(&self) -> &Arc<TransferBase> {
        &self.base
    }

    pub(crate) fn callable(&self) -> &C {
        &self.callable
    }

    /// The transfer result, once completed.
    pub(crate) fn output(&self) -> Option<C::Output> {
        self.output.get().cloned()
    }

    /// One iteration. Boxed because iterations schedule their successors.
    fn run(self: Arc<Self>) -> BoxFuture<'static, TransferResult<()>> {
        async move {
            let step = if self.started.swap(true, Ordering::AcqRel) {
                self.poll().await
            } else {
                self.first_call().await
            };
            let scheduled = match step {
                Ok(Step::Done { output, multipart }) => {
                    self.finish(output, multipart);
                    return Ok(());
                }
                Ok(Step::Pending) => self.reschedule(),
                Err(err) => Err(err),
            };
            match scheduled {
                Ok(()) => Ok(()),
                Err(err) => Err(self.fail(err).await),
            }
        }
        .boxed()
    }

    async fn first_call(&self) -> TransferResult<Step<C::Output>> {
        self.base.set_state(TransferState::InProgress);
        match self.callable.call(&self.parts).await? {
            CallOutcome::Completed { output, multipart } => Ok(Step::Done { output, multipart }),
            CallOutcome::Submitted => Ok(Step::Pending),
        }
    }

    async fn poll(&self) -> TransferResult<Step<C::Output>> {
        if self.canceled.load(Ordering::Acquire) || self.parts.is_canceled() {
            return Err(TransferError::Canceled);
        }
        if !self.parts.all_finished() {
            trace!(transfer = %self.base.description(), "parts still in flight");
            return Ok(Step::Pending);
        }

        let mut etags = self.callable.existing_parts();
        let mut canceled = false;
        let mut first_error = None;
        for task in self.parts.take() {
            match task.handle.await {
                Ok(Ok(etag)) => etags.push(etag),
                Ok(Err(err)) if err.is_canceled() => canceled = true,
                Ok(Err(err)) => {
                    trace!(part_number = task.part_number, error = %err, "part failed");
                    first_error.get_or_insert(err);
                }
                Err(join) => match join_error(join) {
                    TransferError::Canceled => canceled = true,
                    err => {
                        first_error.get_or_insert(err);
                    }
                },
            }
        }
        if canceled {
            return Err(TransferError::Canceled);
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        etags.sort_by_key(|part| part.part_number);
        let completed = self.callable.session().complete(etags).await?;
        Ok(Step::Done {
            output: self.callable.completed_output(completed),
            multipart: true,
        })
    }

    fn reschedule(self: &Arc<Self>) -> TransferResult<()> {
        let this = Arc::clone(self);
        self.slot
            .launch(|| self.executor.schedule_after(self.poll_interval, this.run()))
    }

    fn finish(&self, output: C::Output, multipart: bool) {
        if self.output.set(output).is_err() {
            trace!(transfer = %self.base.description(), "result already recorded");
        }
        self.done.store(true, Ordering::Release);
        if self.base.set_state(TransferState::Completed) && multipart {
            self.base.fire(ProgressEventCode::Completed);
        }
        debug!(transfer = %self.base.description(), "transfer completed");
    }

    async fn fail(&self, err: TransferError) -> TransferError {
        if err.is_canceled() {
            if self.base.set_state(TransferState::Canceled) {
                self.base.fire(ProgressEventCode::Canceled);
            }
        } else {
            self.callable.session().abort().await;
            if self.base.set_state(TransferState::Failed) {
                self.base.fire(ProgressEventCode::Failed);
            }
            debug!(transfer = %self.base.description(), error = %err, "transfer failed");
        }
        self.done.store(true, Ordering::Release);
        err
    }

    /// Abort the current iteration and every part task.
    pub(crate) fn cancel_futures(&self) {
        self.canceled.store(true, Ordering::Release);
        self.slot.close_and_abort();
        self.parts.cancel();
    }

    /// Cancel everything, move to `Canceled` and abort the session.
    pub(crate) async fn abort(&self) {
        self.cancel_futures();
        self.mark_canceled();
        self.callable.session().abort().await;
    }

    /// Move to `Canceled`, firing the event when the transition applied.
    pub(crate) fn mark_canceled(&self) {
        if self.base.set_state(TransferState::Canceled) {
            self.base.fire(ProgressEventCode::Canceled);
        }
    }
}

impl<C: MultipartCallable> ShutdownHook for MultipartMonitor<C> {
    fn on_forced_shutdown(self: Arc<Self>, runtime: &Handle) {
        if self.base.is_done() {
            return;
        }
        self.cancel_futures();
        self.mark_canceled();
        self.done.store(true, Ordering::Release);
        runtime.spawn(async move { self.callable.session().abort().await });
    }
}

impl<C: MultipartCallable> TransferMonitor for MultipartMonitor<C> {
    fn future(&self) -> TransferFuture {
        self.slot.current()
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire) || (self.slot.is_closed() && self.slot.is_finished())
    }
}
