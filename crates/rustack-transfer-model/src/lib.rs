//! Object storage model for Rustack Transfer.
//!
//! This crate describes the storage collaborator the transfer engine drives:
//! the request/response shapes of the single-shot and multipart object
//! operations, the access-control and encryption value types they carry, and
//! the [`ObjectStorage`] trait that a concrete client implements.
//!
//! The transfer engine never talks to a wire protocol directly. Anything that
//! implements [`ObjectStorage`] (a real S3 client adapter or the in-memory
//! backend shipped in `rustack-transfer-memory`) can be plugged in.

pub mod error;
pub mod request;
pub mod storage;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use request::{
    AbortMultipartUploadRequest, CompleteMultipartUploadOutput, CompleteMultipartUploadRequest,
    CopyObjectOutput, CopyObjectRequest, CopyPartOutput, CopyPartRequest, GetObjectOutput,
    GetObjectRequest, HeadObjectRequest, InitiateMultipartUploadOutput,
    InitiateMultipartUploadRequest, ListMultipartUploadsRequest, ListObjectsRequest,
    ListPartsOutput, ListPartsRequest, MultipartUploadListing, MultipartUploadSummary,
    ObjectBody, ObjectListing, ObjectSummary, PartETag, PartSummary, PutObjectOutput,
    PutObjectRequest, UploadPartOutput, UploadPartRequest,
};
pub use storage::ObjectStorage;
pub use types::{
    AccessControlList, CannedAcl, Grant, Grantee, ObjectMetadata, Permission, SseCustomerKey,
    StorageClass,
};
