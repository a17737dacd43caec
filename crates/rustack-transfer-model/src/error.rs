//! Storage error types.
//!
//! [`StorageError`] is what an [`ObjectStorage`](crate::ObjectStorage)
//! implementation reports. The transfer engine treats client-side and
//! service-side failures the same way (the transfer fails and the error is
//! handed to every waiter), so the distinction is kept only for diagnostics.

/// Error returned by an object storage backend.
///
/// The type is `Clone` because a single failure is observed by every caller
/// waiting on the same transfer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The storage service rejected the request.
    #[error("{code} ({status}): {message}")]
    Service {
        /// Service error code (e.g. `NoSuchKey`).
        code: String,
        /// Human-readable message.
        message: String,
        /// HTTP status code associated with the error.
        status: u16,
    },

    /// The request never reached the service (network failure, malformed
    /// request, local I/O).
    #[error("client error: {0}")]
    Client(String),
}

impl StorageError {
    /// Build a service error from its parts.
    #[must_use]
    pub fn service(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// The specified key does not exist.
    #[must_use]
    pub fn no_such_key(key: &str) -> Self {
        Self::service(
            "NoSuchKey",
            format!("The specified key does not exist: {key}"),
            404,
        )
    }

    /// The specified bucket does not exist.
    #[must_use]
    pub fn no_such_bucket(bucket: &str) -> Self {
        Self::service(
            "NoSuchBucket",
            format!("The specified bucket does not exist: {bucket}"),
            404,
        )
    }

    /// The specified multipart upload does not exist.
    #[must_use]
    pub fn no_such_upload(upload_id: &str) -> Self {
        Self::service(
            "NoSuchUpload",
            format!("The specified upload does not exist: {upload_id}"),
            404,
        )
    }

    /// One or more of the specified parts could not be found.
    #[must_use]
    pub fn invalid_part(part_number: u32) -> Self {
        Self::service(
            "InvalidPart",
            format!("One or more of the specified parts could not be found: {part_number}"),
            400,
        )
    }

    /// The list of parts was not in ascending order.
    #[must_use]
    pub fn invalid_part_order() -> Self {
        Self::service(
            "InvalidPartOrder",
            "The list of parts was not in ascending order",
            400,
        )
    }

    /// The requested range is not satisfiable.
    #[must_use]
    pub fn invalid_range() -> Self {
        Self::service("InvalidRange", "The requested range is not satisfiable", 416)
    }

    /// Return the service error code, if this is a service error.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            Self::Client(_) => None,
        }
    }

    /// Whether the error reports a missing key, bucket or upload.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Service { status: 404, .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Client(err.to_string())
    }
}

/// Convenience result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
