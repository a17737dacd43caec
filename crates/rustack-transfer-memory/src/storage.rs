//! In-memory object storage backend.
//!
//! [`InMemoryObjectStorage`] keeps objects and multipart sessions in
//! [`DashMap`]s and implements every [`ObjectStorage`] call against them,
//! including byte-range reads, paginated listings and the part-order checks
//! a real service performs when a multipart session completes.
//!
//! Besides serving as a local backend it exposes a few knobs for exercising
//! the transfer engine: per-call latency, injected part failures, simulated
//! client-side encryption, and counters of the calls it received.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustack_transfer_model::{
    AbortMultipartUploadRequest, CompleteMultipartUploadOutput, CompleteMultipartUploadRequest,
    CopyObjectOutput, CopyObjectRequest, CopyPartOutput, CopyPartRequest, GetObjectOutput,
    GetObjectRequest, HeadObjectRequest, InitiateMultipartUploadOutput,
    InitiateMultipartUploadRequest, ListMultipartUploadsRequest, ListObjectsRequest,
    ListPartsOutput, ListPartsRequest, MultipartUploadListing, MultipartUploadSummary,
    ObjectListing, ObjectMetadata, ObjectStorage, ObjectSummary, PartSummary, PutObjectOutput,
    PutObjectRequest, SseCustomerKey, StorageError, StorageResult, UploadPartOutput,
    UploadPartRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::checksums;

/// `(bucket, key)`.
type ObjectKey = (String, String);

/// Default number of entries returned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Highest part number a multipart session accepts.
const MAX_PART_NUMBER: u32 = 10_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Behavior knobs of the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStorageConfig {
    /// Maximum number of entries per listing page.
    #[builder(default = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Delay applied to every part upload or part copy, in milliseconds.
    #[builder(default)]
    pub part_latency_ms: u64,

    /// Delay applied to every GET before its content is returned, in
    /// milliseconds.
    #[builder(default)]
    pub get_latency_ms: u64,

    /// Report the client as encrypting content on the client side.
    #[builder(default)]
    pub client_side_encryption: bool,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            part_latency_ms: 0,
            get_latency_ms: 0,
            client_side_encryption: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Stored state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
    sse_key_md5: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredPart {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct UploadState {
    bucket: String,
    key: String,
    metadata: ObjectMetadata,
    sse_key_md5: Option<String>,
    initiated: DateTime<Utc>,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug, Default)]
struct CallCounters {
    put_object: AtomicUsize,
    upload_part: AtomicUsize,
    copy_part: AtomicUsize,
    complete: AtomicUsize,
    abort: AtomicUsize,
}

// ---------------------------------------------------------------------------
// InMemoryObjectStorage
// ---------------------------------------------------------------------------

/// Thread-safe in-memory [`ObjectStorage`].
///
/// Buckets are implicit: any bucket name is accepted and holds whatever was
/// written to it. Objects are unversioned.
///
/// # Examples
///
/// ```
/// use rustack_transfer_memory::InMemoryObjectStorage;
/// use rustack_transfer_model::{HeadObjectRequest, ObjectStorage};
///
/// # tokio_test::block_on(async {
/// let storage = InMemoryObjectStorage::new();
/// storage.insert_object("my-bucket", "hello.txt", "hello");
///
/// let metadata = storage
///     .get_object_metadata(HeadObjectRequest::new("my-bucket", "hello.txt"))
///     .await
///     .unwrap();
/// assert_eq!(metadata.content_length, 5);
/// # });
/// ```
#[derive(Debug)]
pub struct InMemoryObjectStorage {
    config: MemoryStorageConfig,
    objects: DashMap<ObjectKey, StoredObject>,
    uploads: DashMap<String, UploadState>,
    failing_parts: Mutex<HashSet<u32>>,
    completed_part_orders: Mutex<Vec<Vec<u32>>>,
    calls: CallCounters,
}

impl Default for InMemoryObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStorage {
    /// Create an empty backend with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryStorageConfig::default())
    }

    /// Create an empty backend.
    #[must_use]
    pub fn with_config(config: MemoryStorageConfig) -> Self {
        Self {
            config,
            objects: DashMap::new(),
            uploads: DashMap::new(),
            failing_parts: Mutex::new(HashSet::new()),
            completed_part_orders: Mutex::new(Vec::new()),
            calls: CallCounters::default(),
        }
    }

    /// The backend's configuration.
    #[must_use]
    pub fn config(&self) -> &MemoryStorageConfig {
        &self.config
    }

    /// Make every upload or copy of `part_number` fail with a 500.
    pub fn fail_part(&self, part_number: u32) {
        self.failing_parts.lock().insert(part_number);
    }

    /// Stop injecting part failures.
    pub fn clear_failures(&self) {
        self.failing_parts.lock().clear();
    }

    /// Store an object directly, returning its ETag.
    pub fn insert_object(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> String {
        let data = data.into();
        let etag = checksums::etag(&data);
        let metadata = stored_metadata(ObjectMetadata::default(), data.len(), &etag);
        self.objects.insert(
            (bucket.into(), key.into()),
            StoredObject {
                data,
                metadata,
                sse_key_md5: None,
            },
        );
        etag
    }

    /// Replace an object's content while keeping its metadata (and ETag),
    /// simulating corruption at rest. Returns whether the object exists.
    pub fn corrupt_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> bool {
        self.objects
            .get_mut(&(bucket.to_owned(), key.to_owned()))
            .map(|mut object| object.data = data.into())
            .is_some()
    }

    /// Content of a stored object.
    #[must_use]
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|object| object.data.clone())
    }

    /// Metadata of a stored object.
    #[must_use]
    pub fn object_metadata(&self, bucket: &str, key: &str) -> Option<ObjectMetadata> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|object| object.metadata.clone())
    }

    /// Number of stored objects across all buckets.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Ids of the multipart sessions still open, sorted.
    #[must_use]
    pub fn upload_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.uploads.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Whether the multipart session `upload_id` is still open.
    #[must_use]
    pub fn has_upload(&self, upload_id: &str) -> bool {
        self.uploads.contains_key(upload_id)
    }

    /// Part numbers stored so far for `upload_id`.
    #[must_use]
    pub fn stored_part_numbers(&self, upload_id: &str) -> Vec<u32> {
        self.uploads
            .get(upload_id)
            .map(|upload| upload.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Backdate (or postdate) a multipart session. Returns whether it exists.
    pub fn set_upload_initiated(&self, upload_id: &str, initiated: DateTime<Utc>) -> bool {
        self.uploads
            .get_mut(upload_id)
            .map(|mut upload| upload.initiated = initiated)
            .is_some()
    }

    /// Part numbers of every successful completion, in the order received.
    #[must_use]
    pub fn completed_part_orders(&self) -> Vec<Vec<u32>> {
        self.completed_part_orders.lock().clone()
    }

    /// Number of `put_object` calls received.
    #[must_use]
    pub fn put_object_calls(&self) -> usize {
        self.calls.put_object.load(Ordering::Relaxed)
    }

    /// Number of `upload_part` calls received.
    #[must_use]
    pub fn upload_part_calls(&self) -> usize {
        self.calls.upload_part.load(Ordering::Relaxed)
    }

    /// Number of `copy_part` calls received.
    #[must_use]
    pub fn copy_part_calls(&self) -> usize {
        self.calls.copy_part.load(Ordering::Relaxed)
    }

    /// Number of `complete_multipart_upload` calls received.
    #[must_use]
    pub fn complete_calls(&self) -> usize {
        self.calls.complete.load(Ordering::Relaxed)
    }

    /// Number of `abort_multipart_upload` calls received.
    #[must_use]
    pub fn abort_calls(&self) -> usize {
        self.calls.abort.load(Ordering::Relaxed)
    }

    fn find_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        sse_customer_key: Option<&SseCustomerKey>,
    ) -> StorageResult<StoredObject> {
        let object = self
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|object| object.clone())
            .ok_or_else(|| StorageError::no_such_key(key))?;
        if let Some(version_id) = version_id {
            if object.metadata.version_id.as_deref() != Some(version_id) {
                return Err(StorageError::service(
                    "NoSuchVersion",
                    format!("The specified version does not exist: {version_id}"),
                    404,
                ));
            }
        }
        check_customer_key(object.sse_key_md5.as_deref(), sse_customer_key)?;
        Ok(object)
    }

    async fn part_gate(&self, part_number: u32) -> StorageResult<()> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(StorageError::service(
                "InvalidArgument",
                format!("Part number must be an integer between 1 and {MAX_PART_NUMBER}"),
                400,
            ));
        }
        sleep_ms(self.config.part_latency_ms).await;
        if self.failing_parts.lock().contains(&part_number) {
            return Err(StorageError::service(
                "InternalError",
                format!("injected failure for part {part_number}"),
                500,
            ));
        }
        Ok(())
    }

    fn store_part(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let mut upload = self
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.bucket == bucket)
            .ok_or_else(|| StorageError::no_such_upload(upload_id))?;
        let etag = checksums::etag(&data);
        trace!(upload_id, part_number, size = data.len(), "stored part");
        upload.parts.insert(
            part_number,
            StoredPart {
                data,
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(etag)
    }

    fn page_size(&self) -> usize {
        self.config.page_size.max(1)
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn put_object(&self, request: PutObjectRequest) -> StorageResult<PutObjectOutput> {
        self.calls.put_object.fetch_add(1, Ordering::Relaxed);
        let etag = checksums::etag(&request.body);
        let metadata = stored_metadata(request.metadata, request.body.len(), &etag);
        debug!(bucket = %request.bucket, key = %request.key, size = request.body.len(), "put object");
        self.objects.insert(
            (request.bucket, request.key),
            StoredObject {
                data: request.body,
                metadata,
                sse_key_md5: request.sse_customer_key.map(|k| k.key_md5),
            },
        );
        Ok(PutObjectOutput {
            etag,
            version_id: None,
        })
    }

    async fn get_object_metadata(
        &self,
        request: HeadObjectRequest,
    ) -> StorageResult<ObjectMetadata> {
        let object = self.find_object(
            &request.bucket,
            &request.key,
            request.version_id.as_deref(),
            request.sse_customer_key.as_ref(),
        )?;
        Ok(object.metadata)
    }

    async fn get_object(&self, request: GetObjectRequest) -> StorageResult<GetObjectOutput> {
        sleep_ms(self.config.get_latency_ms).await;
        let object = self.find_object(
            &request.bucket,
            &request.key,
            request.version_id.as_deref(),
            request.sse_customer_key.as_ref(),
        )?;
        let content = match request.range {
            Some((first, last)) => slice_range(&object.data, first, last)?,
            None => object.data,
        };
        trace!(key = %request.key, range = ?request.range, size = content.len(), "get object");
        Ok(GetObjectOutput {
            metadata: object.metadata,
            body: Box::new(Cursor::new(content)),
        })
    }

    async fn initiate_multipart_upload(
        &self,
        request: InitiateMultipartUploadRequest,
    ) -> StorageResult<InitiateMultipartUploadOutput> {
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        debug!(bucket = %request.bucket, key = %request.key, upload_id = %upload_id, "initiated multipart upload");
        self.uploads.insert(
            upload_id.clone(),
            UploadState {
                bucket: request.bucket,
                key: request.key,
                metadata: request.metadata,
                sse_key_md5: request.sse_customer_key.map(|k| k.key_md5),
                initiated: Utc::now(),
                parts: BTreeMap::new(),
            },
        );
        Ok(InitiateMultipartUploadOutput { upload_id })
    }

    async fn upload_part(&self, request: UploadPartRequest) -> StorageResult<UploadPartOutput> {
        self.calls.upload_part.fetch_add(1, Ordering::Relaxed);
        self.part_gate(request.part_number).await?;
        let etag = self.store_part(
            &request.bucket,
            &request.upload_id,
            request.part_number,
            request.body,
        )?;
        Ok(UploadPartOutput {
            part_number: request.part_number,
            etag,
        })
    }

    async fn copy_part(&self, request: CopyPartRequest) -> StorageResult<CopyPartOutput> {
        self.calls.copy_part.fetch_add(1, Ordering::Relaxed);
        self.part_gate(request.part_number).await?;
        let source = self.find_object(
            &request.source_bucket,
            &request.source_key,
            request.source_version_id.as_deref(),
            request.source_sse_customer_key.as_ref(),
        )?;
        let data = slice_range(&source.data, request.first_byte, request.last_byte)?;
        let etag = self.store_part(
            &request.destination_bucket,
            &request.upload_id,
            request.part_number,
            data,
        )?;
        Ok(CopyPartOutput {
            part_number: request.part_number,
            etag,
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> StorageResult<CompleteMultipartUploadOutput> {
        self.calls.complete.fetch_add(1, Ordering::Relaxed);
        if request
            .parts
            .windows(2)
            .any(|pair| pair[0].part_number >= pair[1].part_number)
        {
            return Err(StorageError::invalid_part_order());
        }

        let (data, metadata, sse_key_md5) = {
            let upload = self
                .uploads
                .get(&request.upload_id)
                .filter(|u| u.bucket == request.bucket && u.key == request.key)
                .ok_or_else(|| StorageError::no_such_upload(&request.upload_id))?;
            let mut data = BytesMut::new();
            for part in &request.parts {
                let stored = upload
                    .parts
                    .get(&part.part_number)
                    .filter(|stored| stored.etag.trim_matches('"') == part.etag.trim_matches('"'))
                    .ok_or_else(|| StorageError::invalid_part(part.part_number))?;
                data.extend_from_slice(&stored.data);
            }
            (data.freeze(), upload.metadata.clone(), upload.sse_key_md5.clone())
        };
        self.uploads.remove(&request.upload_id);

        let etag = checksums::multipart_etag(request.parts.iter().map(|p| p.etag.as_str()));
        let metadata = stored_metadata(metadata, data.len(), &etag);
        self.completed_part_orders
            .lock()
            .push(request.parts.iter().map(|p| p.part_number).collect());
        debug!(
            bucket = %request.bucket,
            key = %request.key,
            parts = request.parts.len(),
            size = data.len(),
            "completed multipart upload"
        );
        self.objects.insert(
            (request.bucket.clone(), request.key.clone()),
            StoredObject {
                data,
                metadata,
                sse_key_md5,
            },
        );
        Ok(CompleteMultipartUploadOutput {
            bucket: request.bucket,
            key: request.key,
            etag,
            version_id: None,
        })
    }

    async fn abort_multipart_upload(
        &self,
        request: AbortMultipartUploadRequest,
    ) -> StorageResult<()> {
        self.calls.abort.fetch_add(1, Ordering::Relaxed);
        if self.uploads.remove(&request.upload_id).is_none() {
            return Err(StorageError::no_such_upload(&request.upload_id));
        }
        debug!(upload_id = %request.upload_id, "aborted multipart upload");
        Ok(())
    }

    async fn copy_object(&self, request: CopyObjectRequest) -> StorageResult<CopyObjectOutput> {
        let source = self.find_object(
            &request.source_bucket,
            &request.source_key,
            request.source_version_id.as_deref(),
            request.source_sse_customer_key.as_ref(),
        )?;
        let etag = checksums::etag(&source.data);
        let metadata = stored_metadata(
            request.new_object_metadata.unwrap_or(source.metadata),
            source.data.len(),
            &etag,
        );
        let last_modified = metadata.last_modified.unwrap_or_else(Utc::now);
        self.objects.insert(
            (request.destination_bucket, request.destination_key),
            StoredObject {
                data: source.data,
                metadata,
                sse_key_md5: request.destination_sse_customer_key.map(|k| k.key_md5),
            },
        );
        Ok(CopyObjectOutput {
            etag,
            version_id: None,
            last_modified,
        })
    }

    async fn list_parts(&self, request: ListPartsRequest) -> StorageResult<ListPartsOutput> {
        let upload = self
            .uploads
            .get(&request.upload_id)
            .ok_or_else(|| StorageError::no_such_upload(&request.upload_id))?;
        let after = request.part_number_marker.unwrap_or(0);
        let mut remaining = upload.parts.range(after.saturating_add(1)..);
        let parts: Vec<PartSummary> = remaining
            .by_ref()
            .take(self.page_size())
            .map(|(number, part)| PartSummary {
                part_number: *number,
                etag: part.etag.clone(),
                size: part.data.len() as u64,
                last_modified: part.last_modified,
            })
            .collect();
        let is_truncated = remaining.next().is_some();
        Ok(ListPartsOutput {
            next_part_number_marker: if is_truncated {
                parts.last().map(|p| p.part_number)
            } else {
                None
            },
            parts,
            is_truncated,
        })
    }

    async fn list_objects(&self, request: ListObjectsRequest) -> StorageResult<ObjectListing> {
        let prefix = request.prefix.clone().unwrap_or_default();
        let mut entries: Vec<ObjectSummary> = self
            .objects
            .iter()
            .filter(|e| e.key().0 == request.bucket && e.key().1.starts_with(&prefix))
            .map(|e| {
                let (bucket, key) = e.key();
                let object = e.value();
                ObjectSummary {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    size: object.data.len() as u64,
                    etag: object.metadata.etag.clone().unwrap_or_default(),
                    last_modified: object.metadata.last_modified.unwrap_or_else(Utc::now),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let page_size = self.page_size();
        let marker = request.marker.as_deref();
        let mut object_summaries = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut last_returned = None;
        let mut is_truncated = false;
        for entry in entries {
            if marker.is_some_and(|m| entry.key.as_str() <= m) {
                continue;
            }
            let common_prefix = request.delimiter.as_deref().and_then(|delimiter| {
                entry.key[prefix.len()..]
                    .find(delimiter)
                    .map(|pos| entry.key[..prefix.len() + pos + delimiter.len()].to_owned())
            });
            if let Some(common_prefix) = common_prefix {
                let seen = common_prefixes.last() == Some(&common_prefix)
                    || marker.is_some_and(|m| m.starts_with(common_prefix.as_str()));
                if seen {
                    continue;
                }
                if object_summaries.len() + common_prefixes.len() == page_size {
                    is_truncated = true;
                    break;
                }
                last_returned = Some(common_prefix.clone());
                common_prefixes.push(common_prefix);
                continue;
            }
            if object_summaries.len() + common_prefixes.len() == page_size {
                is_truncated = true;
                break;
            }
            last_returned = Some(entry.key.clone());
            object_summaries.push(entry);
        }

        Ok(ObjectListing {
            bucket: request.bucket,
            prefix: request.prefix,
            object_summaries,
            common_prefixes,
            is_truncated,
            next_marker: if is_truncated { last_returned } else { None },
        })
    }

    async fn list_multipart_uploads(
        &self,
        request: ListMultipartUploadsRequest,
    ) -> StorageResult<MultipartUploadListing> {
        let mut uploads: Vec<MultipartUploadSummary> = self
            .uploads
            .iter()
            .filter(|e| e.value().bucket == request.bucket)
            .map(|e| MultipartUploadSummary {
                key: e.value().key.clone(),
                upload_id: e.key().clone(),
                initiated: e.value().initiated,
            })
            .collect();
        uploads.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));

        let key_marker = request.key_marker.as_deref();
        let id_marker = request.upload_id_marker.as_deref();
        let mut remaining = uploads.into_iter().filter(|u| match (key_marker, id_marker) {
            (None, _) => true,
            (Some(key), None) => u.key.as_str() > key,
            (Some(key), Some(id)) => {
                u.key.as_str() > key || (u.key == key && u.upload_id.as_str() > id)
            }
        });
        let page: Vec<_> = remaining.by_ref().take(self.page_size()).collect();
        let is_truncated = remaining.next().is_some();
        let (next_key_marker, next_upload_id_marker) = match page.last() {
            Some(last) if is_truncated => (Some(last.key.clone()), Some(last.upload_id.clone())),
            _ => (None, None),
        };
        Ok(MultipartUploadListing {
            bucket: request.bucket,
            uploads: page,
            is_truncated,
            next_key_marker,
            next_upload_id_marker,
        })
    }

    fn is_client_side_encrypting(&self) -> bool {
        self.config.client_side_encryption
    }
}

fn stored_metadata(mut metadata: ObjectMetadata, len: usize, etag: &str) -> ObjectMetadata {
    metadata.content_length = len as u64;
    metadata.etag = Some(etag.to_owned());
    metadata.last_modified = Some(Utc::now());
    metadata
}

fn check_customer_key(stored: Option<&str>, provided: Option<&SseCustomerKey>) -> StorageResult<()> {
    match (stored, provided) {
        (None, _) => Ok(()),
        (Some(md5), Some(key)) if key.key_md5 == md5 => Ok(()),
        (Some(_), _) => Err(StorageError::service(
            "InvalidRequest",
            "The object was stored using a customer-provided encryption key; the same key must be provided",
            400,
        )),
    }
}

/// Inclusive byte range of `data`, clamped to its end.
fn slice_range(data: &Bytes, first: u64, last: u64) -> StorageResult<Bytes> {
    let len = data.len() as u64;
    if first >= len || last < first {
        return Err(StorageError::invalid_range());
    }
    let end = last.min(len - 1);
    let first = usize::try_from(first).map_err(|_| StorageError::invalid_range())?;
    let end = usize::try_from(end).map_err(|_| StorageError::invalid_range())?;
    Ok(data.slice(first..=end))
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
