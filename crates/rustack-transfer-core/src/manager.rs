//! The transfer manager facade.
//!
//! [`TransferManager`] is the entry point of the crate: it sizes each
//! transfer, wires its progress and state listeners, and submits its work to
//! the manager's [`TransferExecutor`].

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustack_transfer_model::{
    AbortMultipartUploadRequest, CopyObjectRequest, GetObjectRequest, HeadObjectRequest,
    ListMultipartUploadsRequest, ListObjectsRequest, ObjectMetadata, ObjectStorage, ObjectSummary,
};
use tracing::{debug, warn};

use crate::config::TransferManagerConfig;
use crate::copy::{Copy, CopyCallable, CopyPlan};
use crate::download::{Download, DownloadJob};
use crate::error::{TransferError, TransferResult};
use crate::executor::TransferExecutor;
use crate::multiple::{AggregateBuilder, MultipleFileDownload, MultipleFileUpload};
use crate::persistable::{PersistableDownload, PersistableUpload};
use crate::progress::{
    ProgressListener, ProgressListenerChain, TransferProgress, TransferProgressUpdatingListener,
};
use crate::transfer::TransferBase;
use crate::upload::{Upload, UploadCallable, UploadPlan, UploadRequest, UploadSource};
use crate::utils::{
    calculate_optimal_copy_part_size, calculate_optimal_upload_part_size, content_type_for,
    is_upload_parallelizable, should_use_multipart_copy, should_use_multipart_upload,
};

/// Key delimiter of virtual directories.
const DELIMITER: &str = "/";

/// Supplies metadata for each file of a directory upload.
///
/// Implemented for any `Fn(&Path, &mut ObjectMetadata) + Send + Sync`
/// closure.
pub trait ObjectMetadataProvider: Send + Sync {
    /// Fill in `metadata` for `file`.
    fn provide_object_metadata(&self, file: &Path, metadata: &mut ObjectMetadata);
}

impl<F> ObjectMetadataProvider for F
where
    F: Fn(&Path, &mut ObjectMetadata) + Send + Sync,
{
    fn provide_object_metadata(&self, file: &Path, metadata: &mut ObjectMetadata) {
        self(file, metadata);
    }
}

/// Orchestrates uploads, downloads and copies against an [`ObjectStorage`].
///
/// Dropping the manager shuts its executor down gracefully: transfers
/// already running finish, new ones are rejected.
pub struct TransferManager {
    storage: Arc<dyn ObjectStorage>,
    config: TransferManagerConfig,
    executor: Arc<TransferExecutor>,
}

impl fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferManager")
            .field("storage", &self.storage)
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        self.executor.shutdown();
    }
}

impl TransferManager {
    /// Create a manager with its own executor on the current tokio runtime.
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        config: TransferManagerConfig,
    ) -> TransferResult<Self> {
        let executor = Arc::new(TransferExecutor::new(config.max_concurrency)?);
        Ok(Self::with_executor(storage, config, executor))
    }

    /// Create a manager running its transfers on `executor`.
    #[must_use]
    pub fn with_executor(
        storage: Arc<dyn ObjectStorage>,
        config: TransferManagerConfig,
        executor: Arc<TransferExecutor>,
    ) -> Self {
        Self {
            storage,
            config,
            executor,
        }
    }

    /// The storage client.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &TransferManagerConfig {
        &self.config
    }

    /// The executor transfers run on.
    #[must_use]
    pub fn executor(&self) -> &Arc<TransferExecutor> {
        &self.executor
    }

    /// Stop accepting new transfers. Running transfers finish.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }

    /// Stop accepting new transfers and cancel every running one. Running
    /// multipart sessions are aborted.
    pub fn shutdown_now(&self) {
        self.executor.shutdown_now();
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// Start uploading one object.
    pub async fn upload(&self, request: UploadRequest) -> TransferResult<Upload> {
        let upload = self.prepare_upload(request, &self.config, None, None).await?;
        upload.start()?;
        Ok(upload)
    }

    /// Resume a paused multipart upload, skipping the parts already stored.
    pub async fn resume_upload(&self, persistable: PersistableUpload) -> TransferResult<Upload> {
        let config = TransferManagerConfig {
            minimum_upload_part_size: persistable.part_size,
            multipart_upload_threshold: persistable.multipart_upload_threshold,
            ..self.config.clone()
        };
        let request = UploadRequest::builder()
            .bucket(persistable.bucket)
            .key(persistable.key)
            .source(UploadSource::File(persistable.file))
            .build();
        debug!(upload_id = %persistable.multipart_upload_id, "resuming upload");
        let upload = self
            .prepare_upload(
                request,
                &config,
                Some(persistable.multipart_upload_id),
                None,
            )
            .await?;
        upload.start()?;
        Ok(upload)
    }

    /// Upload every regular file under `directory`.
    ///
    /// Keys are `key_prefix` followed by each file's path relative to
    /// `directory`.
    pub async fn upload_directory(
        &self,
        bucket: &str,
        key_prefix: &str,
        directory: &Path,
        include_subdirectories: bool,
        metadata_provider: Option<&dyn ObjectMetadataProvider>,
    ) -> TransferResult<MultipleFileUpload> {
        if !is_directory(directory).await {
            return Err(TransferError::invalid_argument(
                "Must provide a directory to upload",
            ));
        }
        let files = list_files(directory, include_subdirectories).await?;
        self.upload_file_list(bucket, key_prefix, directory, files, metadata_provider)
            .await
    }

    /// Upload `files`, all located under the common `directory`.
    pub async fn upload_file_list(
        &self,
        bucket: &str,
        key_prefix: &str,
        directory: &Path,
        files: Vec<PathBuf>,
        metadata_provider: Option<&dyn ObjectMetadataProvider>,
    ) -> TransferResult<MultipleFileUpload> {
        if !is_directory(directory).await {
            return Err(TransferError::invalid_argument(
                "Must provide a common base directory for uploaded files",
            ));
        }
        let key_prefix = if key_prefix.is_empty() || key_prefix.ends_with(DELIMITER) {
            key_prefix.to_owned()
        } else {
            format!("{key_prefix}{DELIMITER}")
        };

        let mut entries = Vec::new();
        let mut total = 0;
        for file in files {
            let Ok(meta) = tokio::fs::metadata(&file).await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let key = format!("{key_prefix}{}", relative_key(directory, &file)?);
            total += meta.len();
            entries.push((file, key));
        }

        let builder = AggregateBuilder::new(
            format!("Uploading {} files to {bucket}/{key_prefix}", entries.len()),
            Arc::new(TransferProgress::with_total(total)),
            Arc::new(ProgressListenerChain::new()),
        );
        let mut uploads = Vec::with_capacity(entries.len());
        for (file, key) in entries {
            let mut metadata = ObjectMetadata::default();
            if let Some(provider) = metadata_provider {
                provider.provide_object_metadata(&file, &mut metadata);
            }
            let request = UploadRequest::builder()
                .bucket(bucket)
                .key(key)
                .source(UploadSource::File(file))
                .metadata(metadata)
                .build();
            uploads.push(
                self.prepare_upload(request, &self.config, None, Some(&builder))
                    .await?,
            );
        }

        let aggregate = builder.finish(bucket, key_prefix, uploads);
        for upload in aggregate.sub_transfers() {
            if let Err(err) = upload.start() {
                warn!(error = %err, "unable to start sub-upload");
                upload.abort().await;
            }
        }
        Ok(aggregate)
    }

    async fn prepare_upload(
        &self,
        mut request: UploadRequest,
        config: &TransferManagerConfig,
        resume_upload_id: Option<String>,
        aggregate: Option<&AggregateBuilder>,
    ) -> TransferResult<Upload> {
        if request.bucket.is_empty() || request.key.is_empty() {
            return Err(TransferError::invalid_argument(
                "The bucket name and key must be specified when an upload is initiated.",
            ));
        }
        let (content_length, is_file) = match &request.source {
            UploadSource::File(path) => {
                if request.metadata.content_type.is_none() {
                    request.metadata.content_type = Some(content_type_for(path));
                }
                (tokio::fs::metadata(path).await?.len(), true)
            }
            UploadSource::Stream { content_length, .. } => (*content_length, false),
        };
        request.metadata.content_length = content_length;

        let encrypted = self.storage.is_client_side_encrypting();
        let plan = UploadPlan {
            content_length,
            multipart: should_use_multipart_upload(content_length, config),
            parallel: is_upload_parallelizable(is_file, encrypted),
            part_size: calculate_optimal_upload_part_size(content_length, config, encrypted),
            multipart_upload_threshold: config.multipart_upload_threshold,
        };
        debug!(
            bucket = %request.bucket,
            key = %request.key,
            content_length,
            multipart = plan.multipart,
            parallel = plan.parallel,
            part_size = plan.part_size,
            "preparing upload"
        );

        let progress = Arc::new(TransferProgress::with_total(content_length));
        let chain = listener_chain(
            &progress,
            request.progress_listener.clone(),
            aggregate.map(AggregateBuilder::sub_progress_listener),
        );
        let base = Arc::new(TransferBase::new(
            format!("Uploading to {}/{}", request.bucket, request.key),
            progress,
            chain,
        ));
        if let Some(aggregate) = aggregate {
            base.add_state_change_listener(aggregate.state_listener());
        }

        let callable = UploadCallable::new(
            Arc::clone(&self.storage),
            Arc::clone(&base),
            Arc::clone(&self.executor),
            request,
            plan,
            resume_upload_id,
        );
        Ok(Upload::new(
            base,
            callable,
            Arc::clone(&self.executor),
            config.poll_interval(),
        ))
    }

    // -----------------------------------------------------------------------
    // Downloads
    // -----------------------------------------------------------------------

    /// Start downloading one object (or the requested range of it) to `file`.
    pub async fn download(
        &self,
        request: GetObjectRequest,
        file: impl Into<PathBuf>,
    ) -> TransferResult<Download> {
        let (download, job) = self
            .prepare_download(request, file.into(), false, None, None)
            .await?;
        download.start(job, &self.executor)?;
        Ok(download)
    }

    /// Like [`download`](Self::download), with a listener registered before
    /// the first event fires.
    pub async fn download_with_listener(
        &self,
        request: GetObjectRequest,
        file: impl Into<PathBuf>,
        listener: Arc<dyn ProgressListener>,
    ) -> TransferResult<Download> {
        let (download, job) = self
            .prepare_download(request, file.into(), false, Some(listener), None)
            .await?;
        download.start(job, &self.executor)?;
        Ok(download)
    }

    /// Resume a paused download, appending to the partially written file.
    pub async fn resume_download(
        &self,
        persistable: PersistableDownload,
    ) -> TransferResult<Download> {
        let request = GetObjectRequest {
            bucket: persistable.bucket,
            key: persistable.key,
            version_id: persistable.version_id,
            range: persistable.range,
            sse_customer_key: None,
        };
        let (download, job) = self
            .prepare_download(request, persistable.file, true, None, None)
            .await?;
        download.start(job, &self.executor)?;
        Ok(download)
    }

    /// Download every object under `key_prefix` into `destination`, keeping
    /// the key hierarchy as directories.
    pub async fn download_directory(
        &self,
        bucket: &str,
        key_prefix: &str,
        destination: &Path,
    ) -> TransferResult<MultipleFileDownload> {
        let summaries = self.list_objects_recursively(bucket, key_prefix).await?;
        let total = summaries.iter().map(|s| s.size).sum();

        let builder = AggregateBuilder::new(
            format!("Downloading from {bucket}/{key_prefix}"),
            Arc::new(TransferProgress::with_total(total)),
            Arc::new(ProgressListenerChain::new()),
        );
        let mut downloads = Vec::with_capacity(summaries.len());
        let mut jobs = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let file = destination.join(&summary.key);
            let (download, job) = self
                .prepare_download(
                    GetObjectRequest::new(bucket, summary.key),
                    file,
                    false,
                    None,
                    Some(&builder),
                )
                .await?;
            downloads.push(download);
            jobs.push(job);
        }

        let aggregate = builder.finish(bucket, key_prefix, downloads);
        for (download, job) in aggregate.sub_transfers().iter().zip(jobs) {
            if let Err(err) = download.start(job, &self.executor) {
                warn!(error = %err, key = %download.key(), "unable to start sub-download");
                download.abort();
            }
        }
        Ok(aggregate)
    }

    /// Depth-first listing of every object under `key_prefix`, skipping keys
    /// that are also virtual directories.
    async fn list_objects_recursively(
        &self,
        bucket: &str,
        key_prefix: &str,
    ) -> TransferResult<Vec<ObjectSummary>> {
        let mut summaries = Vec::new();
        let mut pending = vec![key_prefix.to_owned()];
        while let Some(prefix) = pending.pop() {
            let mut marker = None;
            loop {
                let listing = self
                    .storage
                    .list_objects(ListObjectsRequest {
                        bucket: bucket.to_owned(),
                        prefix: Some(prefix.clone()),
                        delimiter: Some(DELIMITER.to_owned()),
                        marker: marker.take(),
                    })
                    .await?;
                for summary in &listing.object_summaries {
                    let directory_key = format!("{}{DELIMITER}", summary.key);
                    if summary.key == prefix || listing.common_prefixes.contains(&directory_key) {
                        debug!(key = %summary.key, "skipping object that is also a virtual directory");
                        continue;
                    }
                    summaries.push(summary.clone());
                }
                pending.extend(listing.common_prefixes.iter().cloned());
                if !listing.is_truncated {
                    break;
                }
                // Without a next marker, resume after the greatest key seen.
                let last_seen = listing
                    .object_summaries
                    .last()
                    .map(|s| s.key.clone())
                    .into_iter()
                    .chain(listing.common_prefixes.last().cloned())
                    .max();
                marker = listing.next_marker.or(last_seen);
                if marker.is_none() {
                    break;
                }
            }
        }
        Ok(summaries)
    }

    async fn prepare_download(
        &self,
        request: GetObjectRequest,
        file: PathBuf,
        resume: bool,
        listener: Option<Arc<dyn ProgressListener>>,
        aggregate: Option<&AggregateBuilder>,
    ) -> TransferResult<(Download, DownloadJob)> {
        let metadata = self
            .storage
            .get_object_metadata(request.to_head_request())
            .await?;

        let (first, last) = match request.range {
            Some((first, last)) => (i128::from(first), i128::from(last)),
            None => (0, i128::from(metadata.content_length) - 1),
        };
        let total = last - first + 1;
        let progress = Arc::new(TransferProgress::with_total(
            u64::try_from(total).unwrap_or_default(),
        ));

        let mut start = first;
        let mut remaining = total;
        let mut resumed = false;
        if resume && let Ok(existing) = tokio::fs::metadata(&file).await {
            let existing = existing.len();
            start += i128::from(existing);
            remaining = last - start + 1;
            progress.update_progress(existing.min(u64::try_from(total).unwrap_or_default()));
            resumed = true;
        }
        if remaining < 0 {
            return Err(TransferError::invalid_argument(
                "Unable to determine the range for download operation.",
            ));
        }

        let mut effective = request.clone();
        if resumed {
            let range = u64::try_from(start)
                .ok()
                .zip(u64::try_from(last).ok())
                .ok_or_else(|| TransferError::invalid_argument("download range out of bounds"))?;
            effective.range = Some(range);
        }
        let check_integrity = request.range.is_none()
            && request.sse_customer_key.is_none()
            && !resumed
            && !self.storage.is_client_side_encrypting();

        let chain = listener_chain(
            &progress,
            listener,
            aggregate.map(AggregateBuilder::sub_progress_listener),
        );
        let base = Arc::new(TransferBase::new(
            format!("Downloading from {}/{}", request.bucket, request.key),
            progress,
            chain,
        ));
        if let Some(aggregate) = aggregate {
            base.add_state_change_listener(aggregate.state_listener());
        }
        debug!(
            bucket = %request.bucket,
            key = %request.key,
            file = %file.display(),
            resumed,
            "preparing download"
        );

        let job = DownloadJob {
            storage: Arc::clone(&self.storage),
            request: effective,
            append: resumed,
            check_integrity,
            nothing_left: resumed && remaining == 0,
        };
        Ok((Download::new(base, request, file, metadata), job))
    }

    // -----------------------------------------------------------------------
    // Copies
    // -----------------------------------------------------------------------

    /// Start copying an object.
    pub async fn copy(&self, request: CopyObjectRequest) -> TransferResult<Copy> {
        self.start_copy(request, None).await
    }

    /// Like [`copy`](Self::copy), with a listener registered before the
    /// first event fires.
    pub async fn copy_with_listener(
        &self,
        request: CopyObjectRequest,
        listener: Arc<dyn ProgressListener>,
    ) -> TransferResult<Copy> {
        self.start_copy(request, Some(listener)).await
    }

    async fn start_copy(
        &self,
        request: CopyObjectRequest,
        listener: Option<Arc<dyn ProgressListener>>,
    ) -> TransferResult<Copy> {
        for (value, name) in [
            (&request.source_bucket, "source bucket name"),
            (&request.source_key, "source object key"),
            (&request.destination_bucket, "destination bucket name"),
            (&request.destination_key, "destination object key"),
        ] {
            if value.is_empty() {
                return Err(TransferError::invalid_argument(format!(
                    "The {name} must be specified when a copy request is initiated."
                )));
            }
        }

        let source_metadata = self
            .storage
            .get_object_metadata(HeadObjectRequest {
                bucket: request.source_bucket.clone(),
                key: request.source_key.clone(),
                version_id: request.source_version_id.clone(),
                sse_customer_key: request.source_sse_customer_key.clone(),
            })
            .await?;
        let content_length = source_metadata.content_length;
        let plan = CopyPlan {
            multipart: should_use_multipart_copy(content_length, &self.config),
            part_size: calculate_optimal_copy_part_size(content_length, &self.config),
        };

        let progress = Arc::new(TransferProgress::with_total(content_length));
        let chain = listener_chain(&progress, listener, None);
        let base = Arc::new(TransferBase::new(
            format!(
                "Copying object from {}/{} to {}/{}",
                request.source_bucket,
                request.source_key,
                request.destination_bucket,
                request.destination_key
            ),
            progress,
            chain,
        ));
        debug!(
            description = %base.description(),
            content_length,
            multipart = plan.multipart,
            "preparing copy"
        );

        let callable = CopyCallable::new(
            Arc::clone(&self.storage),
            Arc::clone(&base),
            Arc::clone(&self.executor),
            request,
            source_metadata,
            plan,
        );
        let copy = Copy::new(
            base,
            callable,
            Arc::clone(&self.executor),
            self.config.poll_interval(),
        );
        copy.start()?;
        Ok(copy)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Abort every multipart upload in `bucket` initiated before `before`.
    ///
    /// Returns the number of aborted uploads.
    pub async fn abort_multipart_uploads(
        &self,
        bucket: &str,
        before: DateTime<Utc>,
    ) -> TransferResult<usize> {
        let mut aborted = 0;
        let mut key_marker = None;
        let mut upload_id_marker = None;
        loop {
            let listing = self
                .storage
                .list_multipart_uploads(ListMultipartUploadsRequest {
                    bucket: bucket.to_owned(),
                    key_marker: key_marker.take(),
                    upload_id_marker: upload_id_marker.take(),
                })
                .await?;
            for upload in listing.uploads.iter().filter(|u| u.initiated < before) {
                self.storage
                    .abort_multipart_upload(AbortMultipartUploadRequest {
                        bucket: bucket.to_owned(),
                        key: upload.key.clone(),
                        upload_id: upload.upload_id.clone(),
                    })
                    .await?;
                aborted += 1;
            }
            if !listing.is_truncated {
                break;
            }
            key_marker = listing.next_key_marker;
            upload_id_marker = listing.next_upload_id_marker;
        }
        debug!(bucket, aborted, "aborted stale multipart uploads");
        Ok(aborted)
    }
}

/// A transfer's listener chain: its own progress first, then the caller's
/// listener, then the aggregate relay.
fn listener_chain(
    progress: &Arc<TransferProgress>,
    listener: Option<Arc<dyn ProgressListener>>,
    relay: Option<Arc<dyn ProgressListener>>,
) -> Arc<ProgressListenerChain> {
    let chain = ProgressListenerChain::with_listeners([Arc::new(
        TransferProgressUpdatingListener::new(Arc::clone(progress)),
    ) as Arc<dyn ProgressListener>]);
    for listener in listener.into_iter().chain(relay) {
        chain.add(listener);
    }
    Arc::new(chain)
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_dir())
}

/// Regular files under `directory`, sorted, optionally recursing.
async fn list_files(directory: &Path, recursive: bool) -> TransferResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![directory.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_file() {
                files.push(entry.path());
            } else if file_type.is_dir() && recursive {
                pending.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// `file` relative to `directory`, with `/` separators.
fn relative_key(directory: &Path, file: &Path) -> TransferResult<String> {
    let relative = file.strip_prefix(directory).map_err(|_| {
        TransferError::invalid_argument(format!(
            "{} is not located under {}",
            file.display(),
            directory.display()
        ))
    })?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join(DELIMITER))
}
