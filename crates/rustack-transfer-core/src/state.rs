//! Transfer states and pause outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TransferState
// ---------------------------------------------------------------------------

/// Lifecycle state of a transfer.
///
/// `Waiting` is initial. `Completed`, `Failed` and `Canceled` are terminal:
/// once reached, the state never changes again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    /// Queued, not yet started.
    #[default]
    Waiting,
    /// Actively transferring.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Canceled by the caller (or by a pause).
    Canceled,
    /// Finished with an error.
    Failed,
}

impl TransferState {
    /// Whether this state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    /// Return the display name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Canceled => "Canceled",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PauseStatus / PauseResult
// ---------------------------------------------------------------------------

/// Outcome of an attempt to pause a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PauseStatus {
    /// Paused; the returned token can resume the transfer.
    Success,
    /// Not paused because the transfer had not started yet.
    NotStarted,
    /// Not started yet; it was canceled instead.
    CanceledBeforeStart,
    /// Could not be paused; it was canceled instead.
    Canceled,
    /// Nothing happened (already finished, or cancellation was not requested).
    NoEffect,
}

impl PauseStatus {
    /// Whether the transfer was paused and can be resumed.
    #[must_use]
    pub fn is_paused(self) -> bool {
        self == Self::Success
    }

    /// Whether the transfer was canceled instead of paused.
    #[must_use]
    pub fn is_canceled(self) -> bool {
        matches!(self, Self::CanceledBeforeStart | Self::Canceled)
    }
}

impl fmt::Display for PauseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "paused",
            Self::NotStarted => "transfer not started",
            Self::CanceledBeforeStart => "canceled before start",
            Self::Canceled => "canceled",
            Self::NoEffect => "no effect",
        };
        f.write_str(s)
    }
}

/// Result of [`try_pause`](crate::upload::Upload::try_pause): a status plus,
/// on success, the token to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseResult<T> {
    status: PauseStatus,
    info_to_resume: Option<T>,
}

impl<T> PauseResult<T> {
    /// A pause that produced a resume token.
    #[must_use]
    pub fn paused(info_to_resume: T) -> Self {
        Self {
            status: PauseStatus::Success,
            info_to_resume: Some(info_to_resume),
        }
    }

    /// A pause attempt without a resume token.
    #[must_use]
    pub fn without_token(status: PauseStatus) -> Self {
        Self {
            status,
            info_to_resume: None,
        }
    }

    /// The pause outcome.
    #[must_use]
    pub fn status(&self) -> PauseStatus {
        self.status
    }

    /// The token to resume from, if the transfer was paused.
    #[must_use]
    pub fn info_to_resume(&self) -> Option<&T> {
        self.info_to_resume.as_ref()
    }

    /// Consume the result, returning the resume token.
    #[must_use]
    pub fn into_info_to_resume(self) -> Option<T> {
        self.info_to_resume
    }
}
