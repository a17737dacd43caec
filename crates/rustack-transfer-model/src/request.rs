//! Request and response shapes for object storage operations.
//!
//! One request/output pair per storage call the transfer engine makes.
//! Requests the engine's callers build directly (`PutObjectRequest`,
//! `GetObjectRequest`, `CopyObjectRequest`, `ListObjectsRequest`) derive
//! [`TypedBuilder`]; the rest are filled in by the engine itself.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use typed_builder::TypedBuilder;

use crate::types::{AccessControlList, CannedAcl, ObjectMetadata, SseCustomerKey, StorageClass};

/// Streaming object content returned by a GET.
pub type ObjectBody = Box<dyn AsyncRead + Send + Unpin>;

// ---------------------------------------------------------------------------
// Single-shot object operations
// ---------------------------------------------------------------------------

/// Upload an object in a single request.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PutObjectRequest {
    /// Destination bucket.
    #[builder(setter(into))]
    pub bucket: String,
    /// Destination key.
    #[builder(setter(into))]
    pub key: String,
    /// Object content.
    #[builder(default)]
    pub body: Bytes,
    /// Object metadata.
    #[builder(default)]
    pub metadata: ObjectMetadata,
    /// Canned ACL applied to the object.
    #[builder(default, setter(strip_option))]
    pub canned_acl: Option<CannedAcl>,
    /// Explicit ACL applied to the object.
    #[builder(default, setter(strip_option))]
    pub access_control_list: Option<AccessControlList>,
    /// Storage class of the object.
    #[builder(default, setter(strip_option))]
    pub storage_class: Option<StorageClass>,
    /// Customer-provided encryption key.
    #[builder(default, setter(strip_option))]
    pub sse_customer_key: Option<SseCustomerKey>,
}

/// Result of a single-shot upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectOutput {
    /// Entity tag of the stored object.
    pub etag: String,
    /// Version identifier of the stored object.
    pub version_id: Option<String>,
}

/// Fetch an object's metadata without its content.
#[derive(Debug, Clone, Default)]
pub struct HeadObjectRequest {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Specific version to inspect.
    pub version_id: Option<String>,
    /// Customer-provided key the object was encrypted with.
    pub sse_customer_key: Option<SseCustomerKey>,
}

impl HeadObjectRequest {
    /// Create a HEAD request for the latest version of an object.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Self::default()
        }
    }
}

/// Fetch an object's content.
#[derive(Debug, Clone, TypedBuilder)]
pub struct GetObjectRequest {
    /// Bucket holding the object.
    #[builder(setter(into))]
    pub bucket: String,
    /// Object key.
    #[builder(setter(into))]
    pub key: String,
    /// Specific version to fetch.
    #[builder(default, setter(strip_option, into))]
    pub version_id: Option<String>,
    /// Inclusive byte range `(first, last)` to fetch.
    #[builder(default, setter(strip_option))]
    pub range: Option<(u64, u64)>,
    /// Customer-provided key the object was encrypted with.
    #[builder(default, setter(strip_option))]
    pub sse_customer_key: Option<SseCustomerKey>,
}

impl GetObjectRequest {
    /// Create a GET request for the whole latest version of an object.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
            range: None,
            sse_customer_key: None,
        }
    }

    /// Build the matching HEAD request.
    #[must_use]
    pub fn to_head_request(&self) -> HeadObjectRequest {
        HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            version_id: self.version_id.clone(),
            sse_customer_key: self.sse_customer_key.clone(),
        }
    }
}

/// Result of a GET: the object's metadata and a stream over its content.
pub struct GetObjectOutput {
    /// Metadata of the full object.
    pub metadata: ObjectMetadata,
    /// Content of the requested range.
    pub body: ObjectBody,
}

impl fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Copy an object between two locations.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CopyObjectRequest {
    /// Source bucket.
    #[builder(setter(into))]
    pub source_bucket: String,
    /// Source key.
    #[builder(setter(into))]
    pub source_key: String,
    /// Specific source version to copy.
    #[builder(default, setter(strip_option, into))]
    pub source_version_id: Option<String>,
    /// Destination bucket.
    #[builder(setter(into))]
    pub destination_bucket: String,
    /// Destination key.
    #[builder(setter(into))]
    pub destination_key: String,
    /// Metadata replacing the source metadata on the destination.
    #[builder(default, setter(strip_option))]
    pub new_object_metadata: Option<ObjectMetadata>,
    /// Canned ACL applied to the destination.
    #[builder(default, setter(strip_option))]
    pub canned_acl: Option<CannedAcl>,
    /// Explicit ACL applied to the destination.
    #[builder(default, setter(strip_option))]
    pub access_control_list: Option<AccessControlList>,
    /// Storage class of the destination.
    #[builder(default, setter(strip_option))]
    pub storage_class: Option<StorageClass>,
    /// Customer-provided key the source was encrypted with.
    #[builder(default, setter(strip_option))]
    pub source_sse_customer_key: Option<SseCustomerKey>,
    /// Customer-provided key to encrypt the destination with.
    #[builder(default, setter(strip_option))]
    pub destination_sse_customer_key: Option<SseCustomerKey>,
}

/// Result of a single-shot copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyObjectOutput {
    /// Entity tag of the destination object.
    pub etag: String,
    /// Version identifier of the destination object.
    pub version_id: Option<String>,
    /// When the destination object was written.
    pub last_modified: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Multipart operations
// ---------------------------------------------------------------------------

/// Start a multipart upload session.
#[derive(Debug, Clone, Default)]
pub struct InitiateMultipartUploadRequest {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Metadata of the object being assembled.
    pub metadata: ObjectMetadata,
    /// Canned ACL applied to the assembled object.
    pub canned_acl: Option<CannedAcl>,
    /// Explicit ACL applied to the assembled object.
    pub access_control_list: Option<AccessControlList>,
    /// Storage class of the assembled object.
    pub storage_class: Option<StorageClass>,
    /// Customer-provided encryption key.
    pub sse_customer_key: Option<SseCustomerKey>,
}

/// Result of starting a multipart upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateMultipartUploadOutput {
    /// Opaque session identifier.
    pub upload_id: String,
}

/// Upload one part of a multipart session.
#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Session identifier.
    pub upload_id: String,
    /// 1-based part number.
    pub part_number: u32,
    /// Part content.
    pub body: Bytes,
    /// Whether this is the final part of the object.
    pub last_part: bool,
    /// Customer-provided encryption key.
    pub sse_customer_key: Option<SseCustomerKey>,
}

/// Result of uploading one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartOutput {
    /// Part number the ETag belongs to.
    pub part_number: u32,
    /// Entity tag of the part.
    pub etag: String,
}

/// Copy a byte range of an existing object into a multipart session.
#[derive(Debug, Clone)]
pub struct CopyPartRequest {
    /// Source bucket.
    pub source_bucket: String,
    /// Source key.
    pub source_key: String,
    /// Specific source version.
    pub source_version_id: Option<String>,
    /// Destination bucket.
    pub destination_bucket: String,
    /// Destination key.
    pub destination_key: String,
    /// Session identifier.
    pub upload_id: String,
    /// 1-based part number.
    pub part_number: u32,
    /// First byte of the source range (inclusive).
    pub first_byte: u64,
    /// Last byte of the source range (inclusive).
    pub last_byte: u64,
    /// Customer-provided key the source was encrypted with.
    pub source_sse_customer_key: Option<SseCustomerKey>,
    /// Customer-provided key to encrypt the destination with.
    pub destination_sse_customer_key: Option<SseCustomerKey>,
}

/// Result of copying one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPartOutput {
    /// Part number the ETag belongs to.
    pub part_number: u32,
    /// Entity tag of the part.
    pub etag: String,
}

/// A completed part: its number and entity tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartETag {
    /// 1-based part number.
    pub part_number: u32,
    /// Entity tag returned when the part was stored.
    pub etag: String,
}

impl PartETag {
    /// Create a part ETag.
    #[must_use]
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

impl From<UploadPartOutput> for PartETag {
    fn from(output: UploadPartOutput) -> Self {
        Self::new(output.part_number, output.etag)
    }
}

impl From<CopyPartOutput> for PartETag {
    fn from(output: CopyPartOutput) -> Self {
        Self::new(output.part_number, output.etag)
    }
}

/// Assemble the uploaded parts into the final object.
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadRequest {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Session identifier.
    pub upload_id: String,
    /// Part ETags, ascending by part number.
    pub parts: Vec<PartETag>,
}

/// Result of assembling a multipart object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMultipartUploadOutput {
    /// Bucket of the assembled object.
    pub bucket: String,
    /// Key of the assembled object.
    pub key: String,
    /// Composite entity tag of the assembled object.
    pub etag: String,
    /// Version identifier of the assembled object.
    pub version_id: Option<String>,
}

/// Discard a multipart session and its parts.
#[derive(Debug, Clone)]
pub struct AbortMultipartUploadRequest {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Session identifier.
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// List the parts already stored for a multipart session.
#[derive(Debug, Clone)]
pub struct ListPartsRequest {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Session identifier.
    pub upload_id: String,
    /// Only list parts numbered after this one.
    pub part_number_marker: Option<u32>,
}

/// A part stored in a multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSummary {
    /// 1-based part number.
    pub part_number: u32,
    /// Entity tag of the part.
    pub etag: String,
    /// Size of the part in bytes.
    pub size: u64,
    /// When the part was stored.
    pub last_modified: DateTime<Utc>,
}

/// One page of stored parts.
#[derive(Debug, Clone, Default)]
pub struct ListPartsOutput {
    /// Parts in ascending part-number order.
    pub parts: Vec<PartSummary>,
    /// Whether more parts remain.
    pub is_truncated: bool,
    /// Marker to pass to fetch the next page.
    pub next_part_number_marker: Option<u32>,
}

/// List objects under a prefix.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ListObjectsRequest {
    /// Bucket to list.
    #[builder(setter(into))]
    pub bucket: String,
    /// Only list keys starting with this prefix.
    #[builder(default, setter(strip_option, into))]
    pub prefix: Option<String>,
    /// Roll keys containing this delimiter after the prefix into common prefixes.
    #[builder(default, setter(strip_option, into))]
    pub delimiter: Option<String>,
    /// Only list keys after this one.
    #[builder(default, setter(strip_option, into))]
    pub marker: Option<String>,
}

/// An object entry in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Entity tag.
    pub etag: String,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    /// Listed bucket.
    pub bucket: String,
    /// Prefix the listing was restricted to.
    pub prefix: Option<String>,
    /// Objects on this page, in key order.
    pub object_summaries: Vec<ObjectSummary>,
    /// Common prefixes (virtual directories) on this page, each ending with the delimiter.
    pub common_prefixes: Vec<String>,
    /// Whether more entries remain.
    pub is_truncated: bool,
    /// Marker to pass to fetch the next page.
    pub next_marker: Option<String>,
}

/// List the multipart sessions in progress for a bucket.
#[derive(Debug, Clone, Default)]
pub struct ListMultipartUploadsRequest {
    /// Bucket to list.
    pub bucket: String,
    /// Only list sessions for keys after this one.
    pub key_marker: Option<String>,
    /// Together with `key_marker`, only list sessions after this one.
    pub upload_id_marker: Option<String>,
}

/// A multipart session in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUploadSummary {
    /// Destination key.
    pub key: String,
    /// Session identifier.
    pub upload_id: String,
    /// When the session was started.
    pub initiated: DateTime<Utc>,
}

/// One page of in-progress multipart sessions.
#[derive(Debug, Clone, Default)]
pub struct MultipartUploadListing {
    /// Listed bucket.
    pub bucket: String,
    /// Sessions on this page, ordered by key then upload id.
    pub uploads: Vec<MultipartUploadSummary>,
    /// Whether more sessions remain.
    pub is_truncated: bool,
    /// Key marker for the next page.
    pub next_key_marker: Option<String>,
    /// Upload id marker for the next page.
    pub next_upload_id_marker: Option<String>,
}
