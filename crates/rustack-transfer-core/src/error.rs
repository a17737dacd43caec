//! Error types for the transfer engine.

use std::sync::Arc;

use rustack_transfer_model::StorageError;

use crate::state::PauseStatus;

/// Transfer engine error type.
///
/// `Clone` because every caller waiting on the same transfer receives the
/// same failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    /// The transfer (or one of its parts) was canceled. This is an expected
    /// outcome, not a bug: the transfer ends in the `Canceled` state.
    #[error("transfer was canceled")]
    Canceled,

    /// The storage backend rejected a request or could not be reached.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading or writing a local file failed.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The downloaded content does not match the stored checksum.
    #[error("integrity check failed for {bucket}/{key}: expected {expected}, got {actual}")]
    IntegrityCheck {
        /// Bucket of the downloaded object.
        bucket: String,
        /// Key of the downloaded object.
        key: String,
        /// Checksum advertised by the storage backend.
        expected: String,
        /// Checksum of the received content.
        actual: String,
    },

    /// The transfer could not be paused.
    #[error("unable to pause transfer: {0}")]
    PauseFailed(PauseStatus),

    /// Internal error with context.
    #[error("{0}")]
    Internal(Arc<anyhow::Error>),
}

impl TransferError {
    /// Whether this error reports a cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Build an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<anyhow::Error> for TransferError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(Arc::new(err))
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("malformed persisted transfer: {err}"))
    }
}

/// Convenience result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;
