//! The object storage client trait.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::request::{
    AbortMultipartUploadRequest, CompleteMultipartUploadOutput, CompleteMultipartUploadRequest,
    CopyObjectOutput, CopyObjectRequest, CopyPartOutput, CopyPartRequest, GetObjectOutput,
    GetObjectRequest, HeadObjectRequest, InitiateMultipartUploadOutput,
    InitiateMultipartUploadRequest, ListMultipartUploadsRequest, ListObjectsRequest,
    ListPartsOutput, ListPartsRequest, MultipartUploadListing, ObjectListing, PutObjectOutput,
    PutObjectRequest, UploadPartOutput, UploadPartRequest,
};
use crate::types::ObjectMetadata;

/// An object storage client.
///
/// Each method is one single-shot request against the backend. Retries,
/// signing and transport belong to the implementation; the transfer engine
/// only orchestrates these calls.
#[async_trait]
pub trait ObjectStorage: Send + Sync + std::fmt::Debug + 'static {
    /// Upload an object in one request.
    async fn put_object(&self, request: PutObjectRequest) -> StorageResult<PutObjectOutput>;

    /// Fetch an object's metadata.
    async fn get_object_metadata(&self, request: HeadObjectRequest)
    -> StorageResult<ObjectMetadata>;

    /// Fetch an object's content (optionally a byte range of it).
    async fn get_object(&self, request: GetObjectRequest) -> StorageResult<GetObjectOutput>;

    /// Start a multipart upload session.
    async fn initiate_multipart_upload(
        &self,
        request: InitiateMultipartUploadRequest,
    ) -> StorageResult<InitiateMultipartUploadOutput>;

    /// Upload one part of a multipart session.
    async fn upload_part(&self, request: UploadPartRequest) -> StorageResult<UploadPartOutput>;

    /// Copy a byte range of an existing object into a multipart session.
    async fn copy_part(&self, request: CopyPartRequest) -> StorageResult<CopyPartOutput>;

    /// Assemble a multipart session's parts into the final object.
    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> StorageResult<CompleteMultipartUploadOutput>;

    /// Discard a multipart session and its stored parts.
    async fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest)
    -> StorageResult<()>;

    /// Copy an object in one request.
    async fn copy_object(&self, request: CopyObjectRequest) -> StorageResult<CopyObjectOutput>;

    /// List the parts already stored for a multipart session.
    async fn list_parts(&self, request: ListPartsRequest) -> StorageResult<ListPartsOutput>;

    /// List one page of objects.
    async fn list_objects(&self, request: ListObjectsRequest) -> StorageResult<ObjectListing>;

    /// List one page of in-progress multipart sessions.
    async fn list_multipart_uploads(
        &self,
        request: ListMultipartUploadsRequest,
    ) -> StorageResult<MultipartUploadListing>;

    /// Whether this client encrypts content on the client side.
    ///
    /// Encrypted parts are chained, so they must be uploaded in order and
    /// their sizes aligned to the cipher block size; encrypted content also
    /// cannot be checked against the stored MD5.
    fn is_client_side_encrypting(&self) -> bool {
        false
    }
}
