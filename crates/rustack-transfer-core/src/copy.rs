//! Server-side object copies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustack_transfer_model::{
    CompleteMultipartUploadOutput, CopyObjectRequest, CopyPartRequest,
    InitiateMultipartUploadRequest, ObjectMetadata, ObjectStorage, PartETag,
};
use tracing::{debug, trace};

use crate::error::TransferResult;
use crate::executor::TransferExecutor;
use crate::monitor::PartTasks;
use crate::multipart::{CallOutcome, MultipartCallable, MultipartMonitor, MultipartSession};
use crate::progress::{ProgressEventCode, ProgressListenerChain};
use crate::transfer::{Transfer, TransferBase};
use crate::utils::{PartRange, part_ranges};

/// User-metadata keys describing client-side encryption, carried from the
/// source object to a multipart copy.
pub const ENCRYPTION_METADATA_KEYS: [&str; 9] = [
    "x-amz-cek-alg",
    "x-amz-iv",
    "x-amz-key",
    "x-amz-key-v2",
    "x-amz-wrap-alg",
    "x-amz-tag-len",
    "x-amz-matdesc",
    "x-amz-unencrypted-content-length",
    "x-amz-unencrypted-content-md5",
];

/// Outcome of a finished copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    /// Source bucket.
    pub source_bucket: String,
    /// Source key.
    pub source_key: String,
    /// Destination bucket.
    pub destination_bucket: String,
    /// Destination key.
    pub destination_key: String,
    /// Entity tag of the new object.
    pub etag: String,
    /// Version of the new object.
    pub version_id: Option<String>,
}

/// How a copy will be performed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CopyPlan {
    pub(crate) multipart: bool,
    pub(crate) part_size: u64,
}

/// Performs one copy: a single request or a multipart session of
/// copy-part requests.
pub(crate) struct CopyCallable {
    base: Arc<TransferBase>,
    executor: Arc<TransferExecutor>,
    session: MultipartSession,
    request: CopyObjectRequest,
    source_metadata: ObjectMetadata,
    plan: CopyPlan,
}

impl CopyCallable {
    pub(crate) fn new(
        storage: Arc<dyn ObjectStorage>,
        base: Arc<TransferBase>,
        executor: Arc<TransferExecutor>,
        request: CopyObjectRequest,
        source_metadata: ObjectMetadata,
        plan: CopyPlan,
    ) -> Self {
        let session = MultipartSession::new(
            storage,
            request.destination_bucket.clone(),
            request.destination_key.clone(),
        );
        Self {
            base,
            executor,
            session,
            request,
            source_metadata,
            plan,
        }
    }

    fn chain(&self) -> &Arc<ProgressListenerChain> {
        self.base.progress_listener_chain()
    }

    fn result(&self, etag: String, version_id: Option<String>) -> CopyResult {
        CopyResult {
            source_bucket: self.request.source_bucket.clone(),
            source_key: self.request.source_key.clone(),
            destination_bucket: self.request.destination_bucket.clone(),
            destination_key: self.request.destination_key.clone(),
            etag,
            version_id,
        }
    }

    async fn copy_in_one_request(&self) -> TransferResult<CopyResult> {
        let output = self
            .session
            .storage()
            .copy_object(self.request.clone())
            .await?;
        self.chain().fire_bytes(self.source_metadata.content_length);
        self.chain().fire(ProgressEventCode::Completed);
        debug!(
            source = %format!("{}/{}", self.request.source_bucket, self.request.source_key),
            destination = %format!("{}/{}", self.request.destination_bucket, self.request.destination_key),
            "copied in one request"
        );
        Ok(self.result(output.etag, output.version_id))
    }

    async fn copy_in_parts(&self, parts: &PartTasks) -> TransferResult<CallOutcome<CopyResult>> {
        let upload_id = self.initiate().await?;
        self.session.set_upload_id(upload_id.clone());

        for range in part_ranges(self.source_metadata.content_length, self.plan.part_size) {
            let request = self.part_request(&upload_id, range);
            let handle = self.executor.submit(copy_part(
                Arc::clone(self.session.storage()),
                Arc::clone(self.chain()),
                range,
                request,
            ))?;
            parts.push(range.part_number, handle)?;
        }
        trace!(upload_id = %upload_id, parts = parts.len(), "submitted copy parts");
        Ok(CallOutcome::Submitted)
    }

    async fn initiate(&self) -> TransferResult<String> {
        let output = self
            .session
            .storage()
            .initiate_multipart_upload(InitiateMultipartUploadRequest {
                bucket: self.request.destination_bucket.clone(),
                key: self.request.destination_key.clone(),
                metadata: self.destination_metadata(),
                canned_acl: if self.request.access_control_list.is_some() {
                    None
                } else {
                    self.request.canned_acl
                },
                access_control_list: self.request.access_control_list.clone(),
                storage_class: self.request.storage_class,
                sse_customer_key: self.request.destination_sse_customer_key.clone(),
            })
            .await?;
        Ok(output.upload_id)
    }

    /// Metadata of the new object: the caller's new metadata (if any) with
    /// the source's content type as a fallback and its encryption keys.
    fn destination_metadata(&self) -> ObjectMetadata {
        let mut metadata = self.request.new_object_metadata.clone().unwrap_or_default();
        if metadata.content_type.is_none() {
            metadata
                .content_type
                .clone_from(&self.source_metadata.content_type);
        }
        for key in ENCRYPTION_METADATA_KEYS {
            if let Some(value) = self.source_metadata.user_metadata_value(key) {
                metadata.insert_user_metadata(key, value);
            }
        }
        metadata
    }

    fn part_request(&self, upload_id: &str, range: PartRange) -> CopyPartRequest {
        CopyPartRequest {
            source_bucket: self.request.source_bucket.clone(),
            source_key: self.request.source_key.clone(),
            source_version_id: self.request.source_version_id.clone(),
            destination_bucket: self.request.destination_bucket.clone(),
            destination_key: self.request.destination_key.clone(),
            upload_id: upload_id.to_owned(),
            part_number: range.part_number,
            first_byte: range.offset,
            last_byte: range.last_byte(),
            source_sse_customer_key: self.request.source_sse_customer_key.clone(),
            destination_sse_customer_key: self.request.destination_sse_customer_key.clone(),
        }
    }
}

#[async_trait]
impl MultipartCallable for CopyCallable {
    type Output = CopyResult;

    async fn call(&self, parts: &PartTasks) -> TransferResult<CallOutcome<CopyResult>> {
        self.chain().fire(ProgressEventCode::Started);
        if !self.plan.multipart {
            let output = self.copy_in_one_request().await?;
            return Ok(CallOutcome::Completed {
                output,
                multipart: false,
            });
        }
        let outcome = self.copy_in_parts(parts).await;
        if outcome.is_err() {
            self.session.abort().await;
        }
        outcome
    }

    fn session(&self) -> &MultipartSession {
        &self.session
    }

    fn completed_output(&self, output: CompleteMultipartUploadOutput) -> CopyResult {
        self.result(output.etag, output.version_id)
    }
}

async fn copy_part(
    storage: Arc<dyn ObjectStorage>,
    chain: Arc<ProgressListenerChain>,
    range: PartRange,
    request: CopyPartRequest,
) -> TransferResult<PartETag> {
    chain.fire(ProgressEventCode::PartStarted);
    match storage.copy_part(request).await {
        Ok(output) => {
            trace!(part_number = range.part_number, bytes = range.size, "part copied");
            chain.fire_bytes(range.size);
            chain.fire(ProgressEventCode::PartCompleted);
            Ok(output.into())
        }
        Err(err) => {
            chain.fire(ProgressEventCode::PartFailed);
            Err(err.into())
        }
    }
}

// ---------------------------------------------------------------------------
// Copy
// ---------------------------------------------------------------------------

/// Handle on a copy in flight.
#[derive(Clone)]
pub struct Copy {
    monitor: Arc<MultipartMonitor<CopyCallable>>,
}

impl fmt::Debug for Copy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Copy").field("monitor", &self.monitor).finish()
    }
}

impl Copy {
    pub(crate) fn new(
        base: Arc<TransferBase>,
        callable: CopyCallable,
        executor: Arc<TransferExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            monitor: Arc::new(MultipartMonitor::new(base, callable, executor, poll_interval)),
        }
    }

    pub(crate) fn start(&self) -> TransferResult<()> {
        self.monitor.start()
    }

    /// Wait for the copy to finish and return its result.
    pub async fn wait_for_copy_result(&self) -> TransferResult<CopyResult> {
        self.monitor.base().wait_for_completion().await?;
        self.monitor
            .output()
            .ok_or_else(|| anyhow::anyhow!("copy finished without a result").into())
    }

    /// Cancel the copy and abort its multipart session.
    pub async fn abort(&self) {
        self.monitor.abort().await;
    }
}

impl Transfer for Copy {
    fn base(&self) -> &TransferBase {
        self.monitor.base()
    }
}
