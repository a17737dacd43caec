//! Single-object downloads to a local file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use digest::Digest;
use md5::Md5;
use parking_lot::Mutex;
use rustack_transfer_model::{GetObjectRequest, ObjectMetadata, ObjectStorage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::error::{TransferError, TransferResult};
use crate::executor::{ShutdownHook, TransferExecutor};
use crate::monitor::{TaskSlot, TransferFuture, TransferMonitor};
use crate::persistable::PersistableDownload;
use crate::progress::ProgressEventCode;
use crate::state::{PauseResult, PauseStatus, TransferState};
use crate::transfer::{Transfer, TransferBase};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// The GET a download task performs.
#[derive(Debug)]
pub(crate) struct DownloadJob {
    pub(crate) storage: Arc<dyn ObjectStorage>,
    /// Request actually sent (its range accounts for a resumed prefix).
    pub(crate) request: GetObjectRequest,
    /// Append to the existing file instead of truncating it.
    pub(crate) append: bool,
    /// Compare the content's MD5 with the object's single-part ETag.
    pub(crate) check_integrity: bool,
    /// The file already holds every requested byte.
    pub(crate) nothing_left: bool,
}

// ---------------------------------------------------------------------------
// DownloadMonitor
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct DownloadMonitor {
    base: Arc<TransferBase>,
    slot: TaskSlot,
}

impl TransferMonitor for DownloadMonitor {
    fn future(&self) -> TransferFuture {
        self.slot.current()
    }

    fn is_done(&self) -> bool {
        self.base.is_done() || self.slot.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

struct DownloadInner {
    base: Arc<TransferBase>,
    monitor: Arc<DownloadMonitor>,
    request: GetObjectRequest,
    file: PathBuf,
    metadata: Mutex<ObjectMetadata>,
}

impl DownloadInner {
    fn cancel_quietly(&self) -> bool {
        self.monitor.slot.close_and_abort();
        self.base.set_state_quietly(TransferState::Canceled)
    }

    fn notify_canceled(&self) {
        self.base.notify_state_change(TransferState::Canceled);
        self.base.fire(ProgressEventCode::Canceled);
    }
}

impl ShutdownHook for DownloadInner {
    fn on_forced_shutdown(self: Arc<Self>, _runtime: &Handle) {
        if self.cancel_quietly() {
            self.notify_canceled();
        }
    }
}

/// Handle on a download in flight.
#[derive(Clone)]
pub struct Download {
    inner: Arc<DownloadInner>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("bucket", &self.inner.request.bucket)
            .field("key", &self.inner.request.key)
            .field("file", &self.inner.file)
            .field("monitor", &self.inner.monitor)
            .finish()
    }
}

impl Download {
    /// Create an unstarted download. `metadata` is the object's HEAD
    /// metadata, replaced by the GET's once the content arrives.
    pub(crate) fn new(
        base: Arc<TransferBase>,
        request: GetObjectRequest,
        file: PathBuf,
        metadata: ObjectMetadata,
    ) -> Self {
        let monitor = Arc::new(DownloadMonitor {
            base: Arc::clone(&base),
            slot: TaskSlot::default(),
        });
        let as_monitor: Arc<dyn TransferMonitor> = Arc::clone(&monitor) as Arc<dyn TransferMonitor>;
        base.set_monitor(&as_monitor);
        Self {
            inner: Arc::new(DownloadInner {
                base,
                monitor,
                request,
                file,
                metadata: Mutex::new(metadata),
            }),
        }
    }

    /// Submit the download task.
    pub(crate) fn start(&self, job: DownloadJob, executor: &TransferExecutor) -> TransferResult<()> {
        let hook: Arc<dyn ShutdownHook> = Arc::clone(&self.inner) as Arc<dyn ShutdownHook>;
        executor.register_shutdown_hook(&hook);
        let inner = Arc::clone(&self.inner);
        self.inner
            .monitor
            .slot
            .launch(|| executor.submit(run_download(inner, job)))
    }

    pub(crate) fn shared_base(&self) -> Arc<TransferBase> {
        Arc::clone(&self.inner.base)
    }

    /// Source bucket.
    #[must_use]
    pub fn bucket_name(&self) -> &str {
        &self.inner.request.bucket
    }

    /// Source key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.request.key
    }

    /// Destination file.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.inner.file
    }

    /// Metadata of the downloaded object.
    #[must_use]
    pub fn object_metadata(&self) -> ObjectMetadata {
        self.inner.metadata.lock().clone()
    }

    fn persistable(&self) -> PersistableDownload {
        PersistableDownload {
            bucket: self.inner.request.bucket.clone(),
            key: self.inner.request.key.clone(),
            version_id: self.inner.request.version_id.clone(),
            range: self.inner.request.range,
            file: self.inner.file.clone(),
        }
    }

    /// Stop the download, keeping what was written so far, and return a
    /// token to resume it with.
    pub fn pause(&self) -> TransferResult<PersistableDownload> {
        let result = self.try_pause(true);
        let status = result.status();
        result
            .into_info_to_resume()
            .ok_or(TransferError::PauseFailed(status))
    }

    /// Try to pause the download. Downloads can always be resumed, so
    /// `force_cancel` makes no difference; only a finished download cannot
    /// be paused.
    pub fn try_pause(&self, _force_cancel: bool) -> PauseResult<PersistableDownload> {
        if self.is_done() {
            return PauseResult::without_token(PauseStatus::NoEffect);
        }
        let token = self.persistable();
        self.abort();
        debug!(bucket = %token.bucket, key = %token.key, "download paused");
        PauseResult::paused(token)
    }

    /// Cancel the download.
    pub fn abort(&self) {
        if self.abort_without_notifying() {
            self.notify_canceled();
        }
    }

    /// Cancel the download task and move to `Canceled` without notifying
    /// anyone. Returns whether the transition applied.
    pub fn abort_without_notifying(&self) -> bool {
        self.inner.cancel_quietly()
    }

    /// Deliver the `Canceled` notification held back by
    /// [`abort_without_notifying`](Self::abort_without_notifying).
    pub fn notify_canceled(&self) {
        self.inner.notify_canceled();
    }
}

impl Transfer for Download {
    fn base(&self) -> &TransferBase {
        &self.inner.base
    }
}

async fn run_download(inner: Arc<DownloadInner>, job: DownloadJob) -> TransferResult<()> {
    let base = Arc::clone(&inner.base);
    base.set_state(TransferState::InProgress);
    base.fire(ProgressEventCode::Started);

    match download_to_file(&inner, job).await {
        Ok(()) => {
            if base.set_state(TransferState::Completed) {
                base.fire(ProgressEventCode::Completed);
            }
            debug!(file = %inner.file.display(), "download completed");
            Ok(())
        }
        Err(err) => {
            // A canceled download stays canceled.
            if base.state() != TransferState::Canceled && base.set_state(TransferState::Failed) {
                base.fire(ProgressEventCode::Failed);
            }
            debug!(file = %inner.file.display(), error = %err, "download failed");
            Err(err)
        }
    }
}

async fn download_to_file(inner: &DownloadInner, job: DownloadJob) -> TransferResult<()> {
    if job.nothing_left {
        trace!(file = %inner.file.display(), "file already holds the requested range");
        return Ok(());
    }
    let bucket = job.request.bucket.clone();
    let key = job.request.key.clone();
    let output = job.storage.get_object(job.request).await?;
    *inner.metadata.lock() = output.metadata.clone();

    if let Some(parent) = inner.file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut options = tokio::fs::OpenOptions::new();
    if job.append {
        options.create(true).append(true);
    } else {
        options.create(true).write(true).truncate(true);
    }
    let mut file = options.open(&inner.file).await?;

    let chain = inner.base.progress_listener_chain();
    let mut body = output.body;
    let mut hasher = Md5::new();
    let mut buf = vec![0; READ_BUFFER_SIZE];
    loop {
        let n = body.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        hasher.update(&buf[..n]);
        chain.fire_bytes(n as u64);
    }
    file.flush().await?;

    if job.check_integrity {
        if let Some(etag) = output.metadata.etag.as_deref() {
            let expected = etag.trim_matches('"');
            // Multipart ETags are not a content MD5.
            if !expected.contains('-') {
                let actual = hex::encode(hasher.finalize());
                if actual != expected {
                    return Err(TransferError::IntegrityCheck {
                        bucket,
                        key,
                        expected: expected.to_owned(),
                        actual,
                    });
                }
            }
        }
    }
    Ok(())
}
