//! Single-object uploads.
//!
//! Small sources go up in one `PUT`. Sources above the multipart threshold
//! are split into parts: file sources upload their parts in parallel on the
//! executor, streams and client-side encrypted uploads send them one after
//! another.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rustack_transfer_model::{
    AccessControlList, CannedAcl, CompleteMultipartUploadOutput, InitiateMultipartUploadRequest,
    ListPartsRequest, ObjectBody, ObjectMetadata, ObjectStorage, PartETag, PartSummary,
    PutObjectRequest, SseCustomerKey, StorageClass, UploadPartRequest,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::error::{TransferError, TransferResult};
use crate::executor::TransferExecutor;
use crate::monitor::PartTasks;
use crate::multipart::{CallOutcome, MultipartCallable, MultipartMonitor, MultipartSession};
use crate::persistable::PersistableUpload;
use crate::progress::{ProgressEventCode, ProgressListener, ProgressListenerChain};
use crate::state::{PauseResult, PauseStatus};
use crate::transfer::{Transfer, TransferBase};
use crate::utils::{PartRange, determine_pause_status, part_ranges};

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// Where the uploaded bytes come from.
pub enum UploadSource {
    /// A local file; its size always determines the content length.
    File(PathBuf),
    /// An arbitrary reader producing exactly `content_length` bytes.
    Stream {
        /// The content.
        reader: ObjectBody,
        /// Number of bytes to read.
        content_length: u64,
    },
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream { content_length, .. } => f
                .debug_struct("Stream")
                .field("content_length", content_length)
                .finish_non_exhaustive(),
        }
    }
}

/// An upload of one object.
#[derive(TypedBuilder)]
pub struct UploadRequest {
    /// Destination bucket.
    #[builder(setter(into))]
    pub bucket: String,
    /// Destination key.
    #[builder(setter(into))]
    pub key: String,
    /// Content source.
    pub source: UploadSource,
    /// Object metadata. The content type is guessed from the file name when
    /// unset.
    #[builder(default)]
    pub metadata: ObjectMetadata,
    /// Canned ACL applied to the object.
    #[builder(default, setter(strip_option))]
    pub canned_acl: Option<CannedAcl>,
    /// Explicit ACL applied to the object (wins over the canned ACL).
    #[builder(default, setter(strip_option))]
    pub access_control_list: Option<AccessControlList>,
    /// Storage class of the object.
    #[builder(default, setter(strip_option))]
    pub storage_class: Option<StorageClass>,
    /// Customer-provided encryption key. Uploads using one cannot be paused
    /// with a resume token.
    #[builder(default, setter(strip_option))]
    pub sse_customer_key: Option<SseCustomerKey>,
    /// Listener for this upload's progress events.
    #[builder(default, setter(strip_option))]
    pub progress_listener: Option<Arc<dyn ProgressListener>>,
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("source", &self.source)
            .field("storage_class", &self.storage_class)
            .finish_non_exhaustive()
    }
}

/// Outcome of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Entity tag of the stored object.
    pub etag: String,
    /// Version of the stored object.
    pub version_id: Option<String>,
}

// ---------------------------------------------------------------------------
// UploadCallable
// ---------------------------------------------------------------------------

/// How an upload will be performed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UploadPlan {
    pub(crate) content_length: u64,
    pub(crate) multipart: bool,
    pub(crate) parallel: bool,
    pub(crate) part_size: u64,
    pub(crate) multipart_upload_threshold: u64,
}

/// Performs one upload: a single `PUT` or a multipart session.
pub(crate) struct UploadCallable {
    base: Arc<TransferBase>,
    executor: Arc<TransferExecutor>,
    session: MultipartSession,
    plan: UploadPlan,
    metadata: ObjectMetadata,
    canned_acl: Option<CannedAcl>,
    access_control_list: Option<AccessControlList>,
    storage_class: Option<StorageClass>,
    sse_customer_key: Option<SseCustomerKey>,
    file: Option<PathBuf>,
    stream: Mutex<Option<ObjectBody>>,
    resume_upload_id: Option<String>,
    existing_parts: Mutex<Vec<PartETag>>,
    persistable: OnceLock<PersistableUpload>,
}

impl UploadCallable {
    pub(crate) fn new(
        storage: Arc<dyn ObjectStorage>,
        base: Arc<TransferBase>,
        executor: Arc<TransferExecutor>,
        request: UploadRequest,
        plan: UploadPlan,
        resume_upload_id: Option<String>,
    ) -> Self {
        let (file, stream) = match request.source {
            UploadSource::File(path) => (Some(path), None),
            UploadSource::Stream { reader, .. } => (None, Some(reader)),
        };
        Self {
            base,
            executor,
            session: MultipartSession::new(storage, request.bucket, request.key),
            plan,
            metadata: request.metadata,
            canned_acl: request.canned_acl,
            access_control_list: request.access_control_list,
            storage_class: request.storage_class,
            sse_customer_key: request.sse_customer_key,
            file,
            stream: Mutex::new(stream),
            resume_upload_id,
            existing_parts: Mutex::new(Vec::new()),
            persistable: OnceLock::new(),
        }
    }

    fn storage(&self) -> &Arc<dyn ObjectStorage> {
        self.session.storage()
    }

    fn chain(&self) -> &Arc<ProgressListenerChain> {
        self.base.progress_listener_chain()
    }

    /// The resume token, once the parallel multipart path captured it.
    pub(crate) fn persistable(&self) -> Option<PersistableUpload> {
        self.persistable.get().cloned()
    }

    async fn upload_in_one_chunk(&self) -> TransferResult<UploadResult> {
        let body = self.read_whole_source().await?;
        let bytes = body.len() as u64;
        let mut metadata = self.metadata.clone();
        metadata.content_length = bytes;

        let output = self
            .storage()
            .put_object(PutObjectRequest {
                bucket: self.session.bucket().to_owned(),
                key: self.session.key().to_owned(),
                body,
                metadata,
                canned_acl: self.canned_acl,
                access_control_list: self.access_control_list.clone(),
                storage_class: self.storage_class,
                sse_customer_key: self.sse_customer_key.clone(),
            })
            .await?;
        self.chain().fire_bytes(bytes);
        self.chain().fire(ProgressEventCode::Completed);
        debug!(bucket = %self.session.bucket(), key = %self.session.key(), bytes, "uploaded in one request");

        Ok(UploadResult {
            bucket: self.session.bucket().to_owned(),
            key: self.session.key().to_owned(),
            etag: output.etag,
            version_id: output.version_id,
        })
    }

    async fn upload_in_parts(&self, parts: &PartTasks) -> TransferResult<CallOutcome<UploadResult>> {
        let upload_id = match &self.resume_upload_id {
            Some(upload_id) => upload_id.clone(),
            None => self.initiate().await?,
        };
        self.session.set_upload_id(upload_id.clone());

        let skip = if self.resume_upload_id.is_some() {
            self.collect_existing_parts(&upload_id).await?
        } else {
            HashSet::new()
        };

        if self.plan.parallel {
            self.submit_parts(parts, &upload_id, &skip)
        } else {
            self.upload_parts_serially(&upload_id, &skip).await
        }
    }

    async fn initiate(&self) -> TransferResult<String> {
        let output = self
            .storage()
            .initiate_multipart_upload(InitiateMultipartUploadRequest {
                bucket: self.session.bucket().to_owned(),
                key: self.session.key().to_owned(),
                metadata: self.metadata.clone(),
                canned_acl: if self.access_control_list.is_some() {
                    None
                } else {
                    self.canned_acl
                },
                access_control_list: self.access_control_list.clone(),
                storage_class: self.storage_class,
                sse_customer_key: self.sse_customer_key.clone(),
            })
            .await?;
        Ok(output.upload_id)
    }

    /// List the parts a resumed session already stored, credit their bytes
    /// and remember their ETags.
    async fn collect_existing_parts(&self, upload_id: &str) -> TransferResult<HashSet<u32>> {
        let mut stored: BTreeMap<u32, PartSummary> = BTreeMap::new();
        let mut marker = None;
        loop {
            let page = self
                .storage()
                .list_parts(ListPartsRequest {
                    bucket: self.session.bucket().to_owned(),
                    key: self.session.key().to_owned(),
                    upload_id: upload_id.to_owned(),
                    part_number_marker: marker,
                })
                .await?;
            for part in page.parts {
                stored.insert(part.part_number, part);
            }
            if !page.is_truncated {
                break;
            }
            marker = page.next_part_number_marker;
            if marker.is_none() {
                break;
            }
        }

        let mut existing = self.existing_parts.lock();
        for part in stored.values() {
            self.base.progress().update_progress(part.size);
            existing.push(PartETag::new(part.part_number, part.etag.clone()));
        }
        debug!(upload_id, parts = stored.len(), "resuming multipart session");
        Ok(stored.into_keys().collect())
    }

    fn submit_parts(
        &self,
        parts: &PartTasks,
        upload_id: &str,
        skip: &HashSet<u32>,
    ) -> TransferResult<CallOutcome<UploadResult>> {
        let file = self
            .file
            .clone()
            .ok_or_else(|| anyhow::anyhow!("parallel upload requires a file source"))?;

        if self.sse_customer_key.is_none() {
            let token = PersistableUpload {
                bucket: self.session.bucket().to_owned(),
                key: self.session.key().to_owned(),
                file: file.clone(),
                multipart_upload_id: upload_id.to_owned(),
                part_size: self.plan.part_size,
                multipart_upload_threshold: self.plan.multipart_upload_threshold,
            };
            if self.persistable.set(token).is_err() {
                trace!(upload_id, "resume token already captured");
            }
        }

        for range in part_ranges(self.plan.content_length, self.plan.part_size) {
            if skip.contains(&range.part_number) {
                continue;
            }
            let request = self.part_request(upload_id, range, Bytes::new());
            let handle = self.executor.submit(upload_part_from_file(
                Arc::clone(self.storage()),
                Arc::clone(self.chain()),
                file.clone(),
                range,
                request,
            ))?;
            parts.push(range.part_number, handle)?;
        }
        trace!(upload_id, parts = parts.len(), "submitted upload parts");
        Ok(CallOutcome::Submitted)
    }

    async fn upload_parts_serially(
        &self,
        upload_id: &str,
        skip: &HashSet<u32>,
    ) -> TransferResult<CallOutcome<UploadResult>> {
        let mut reader = self.open_source().await?;
        let mut etags = self.existing_parts();

        for range in part_ranges(self.plan.content_length, self.plan.part_size) {
            let mut buf = vec![0; to_usize(range.size)?];
            reader.read_exact(&mut buf).await?;
            if skip.contains(&range.part_number) {
                continue;
            }

            self.chain().fire(ProgressEventCode::PartStarted);
            let request = self.part_request(upload_id, range, Bytes::from(buf));
            match self.storage().upload_part(request).await {
                Ok(output) => {
                    self.chain().fire_bytes(range.size);
                    self.chain().fire(ProgressEventCode::PartCompleted);
                    etags.push(output.into());
                }
                Err(err) => {
                    self.chain().fire(ProgressEventCode::PartFailed);
                    return Err(err.into());
                }
            }
        }

        etags.sort_by_key(|part| part.part_number);
        let completed = self.session.complete(etags).await?;
        Ok(CallOutcome::Completed {
            output: self.completed_output(completed),
            multipart: true,
        })
    }

    fn part_request(&self, upload_id: &str, range: PartRange, body: Bytes) -> UploadPartRequest {
        UploadPartRequest {
            bucket: self.session.bucket().to_owned(),
            key: self.session.key().to_owned(),
            upload_id: upload_id.to_owned(),
            part_number: range.part_number,
            body,
            last_part: range.offset + range.size == self.plan.content_length,
            sse_customer_key: self.sse_customer_key.clone(),
        }
    }

    async fn open_source(&self) -> TransferResult<ObjectBody> {
        if let Some(path) = &self.file {
            let file = tokio::fs::File::open(path).await?;
            return Ok(Box::new(file));
        }
        self.stream
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("upload stream was already consumed").into())
    }

    async fn read_whole_source(&self) -> TransferResult<Bytes> {
        if let Some(path) = &self.file {
            return Ok(Bytes::from(tokio::fs::read(path).await?));
        }
        let reader = self.open_source().await?;
        let mut buf = Vec::with_capacity(to_usize(self.plan.content_length)?);
        reader
            .take(self.plan.content_length)
            .read_to_end(&mut buf)
            .await?;
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl MultipartCallable for UploadCallable {
    type Output = UploadResult;

    async fn call(&self, parts: &PartTasks) -> TransferResult<CallOutcome<UploadResult>> {
        self.chain().fire(ProgressEventCode::Started);
        if !self.plan.multipart {
            let output = self.upload_in_one_chunk().await?;
            return Ok(CallOutcome::Completed {
                output,
                multipart: false,
            });
        }
        let outcome = self.upload_in_parts(parts).await;
        if outcome.is_err() {
            self.session.abort().await;
        }
        outcome
    }

    fn session(&self) -> &MultipartSession {
        &self.session
    }

    fn existing_parts(&self) -> Vec<PartETag> {
        self.existing_parts.lock().clone()
    }

    fn completed_output(&self, output: CompleteMultipartUploadOutput) -> UploadResult {
        UploadResult {
            bucket: output.bucket,
            key: output.key,
            etag: output.etag,
            version_id: output.version_id,
        }
    }
}

async fn upload_part_from_file(
    storage: Arc<dyn ObjectStorage>,
    chain: Arc<ProgressListenerChain>,
    file: PathBuf,
    range: PartRange,
    mut request: UploadPartRequest,
) -> TransferResult<PartETag> {
    chain.fire(ProgressEventCode::PartStarted);
    let result = async {
        request.body = read_file_range(&file, range.offset, range.size).await?;
        Ok::<_, TransferError>(storage.upload_part(request).await?)
    }
    .await;
    match result {
        Ok(output) => {
            trace!(part_number = range.part_number, bytes = range.size, "part uploaded");
            chain.fire_bytes(range.size);
            chain.fire(ProgressEventCode::PartCompleted);
            Ok(output.into())
        }
        Err(err) => {
            chain.fire(ProgressEventCode::PartFailed);
            Err(err)
        }
    }
}

async fn read_file_range(path: &Path, offset: u64, len: u64) -> TransferResult<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0; to_usize(len)?];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

fn to_usize(len: u64) -> TransferResult<usize> {
    usize::try_from(len)
        .map_err(|_| TransferError::invalid_argument(format!("{len} bytes do not fit in memory")))
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Handle on an upload in flight.
#[derive(Clone)]
pub struct Upload {
    monitor: Arc<MultipartMonitor<UploadCallable>>,
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl Upload {
    pub(crate) fn new(
        base: Arc<TransferBase>,
        callable: UploadCallable,
        executor: Arc<TransferExecutor>,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            monitor: Arc::new(MultipartMonitor::new(base, callable, executor, poll_interval)),
        }
    }

    /// Submit the first iteration to the executor.
    pub(crate) fn start(&self) -> TransferResult<()> {
        self.monitor.start()
    }

    pub(crate) fn shared_base(&self) -> Arc<TransferBase> {
        Arc::clone(self.monitor.base())
    }

    /// Upload id of the multipart session, once one was initiated.
    #[must_use]
    pub fn multipart_upload_id(&self) -> Option<String> {
        self.monitor
            .callable()
            .session()
            .upload_id()
            .map(str::to_owned)
    }

    /// Wait for the upload to finish and return its result.
    pub async fn wait_for_upload_result(&self) -> TransferResult<UploadResult> {
        self.monitor.base().wait_for_completion().await?;
        self.monitor
            .output()
            .ok_or_else(|| anyhow::anyhow!("upload finished without a result").into())
    }

    /// Pause the upload, cancelling it when it cannot be resumed later.
    ///
    /// Fails with [`TransferError::PauseFailed`] unless a resume token was
    /// produced.
    pub async fn pause(&self) -> TransferResult<PersistableUpload> {
        let result = self.try_pause(true).await;
        match result.status() {
            PauseStatus::Success => result
                .into_info_to_resume()
                .ok_or(TransferError::PauseFailed(PauseStatus::Success)),
            status => Err(TransferError::PauseFailed(status)),
        }
    }

    /// Try to pause the upload.
    ///
    /// Uploads that captured a resume token stop their parts and keep the
    /// session for [`resume_upload`](crate::manager::TransferManager::resume_upload).
    /// Others follow [`determine_pause_status`]; with `force_cancel` they are
    /// canceled and their session aborted.
    pub async fn try_pause(&self, force_cancel: bool) -> PauseResult<PersistableUpload> {
        if self.is_done() {
            return PauseResult::without_token(PauseStatus::NoEffect);
        }
        if let Some(persistable) = self.monitor.callable().persistable() {
            self.monitor.cancel_futures();
            self.monitor.mark_canceled();
            debug!(upload_id = %persistable.multipart_upload_id, "upload paused");
            return PauseResult::paused(persistable);
        }

        let status = determine_pause_status(self.state(), force_cancel);
        if force_cancel {
            self.monitor.cancel_futures();
            self.monitor.callable().session().abort().await;
            self.monitor.mark_canceled();
        }
        PauseResult::without_token(status)
    }

    /// Cancel the upload and abort its multipart session.
    pub async fn abort(&self) {
        self.monitor.abort().await;
    }
}

impl Transfer for Upload {
    fn base(&self) -> &TransferBase {
        self.monitor.base()
    }
}
