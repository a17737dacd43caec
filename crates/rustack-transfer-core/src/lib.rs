//! Transfer manager engine for Rustack.
//!
//! This crate orchestrates large object transfers on top of any
//! [`ObjectStorage`](rustack_transfer_model::ObjectStorage) client: uploads
//! split into parallel multipart sessions, downloads to local files with
//! integrity checks, server-side copies, and directory-wide transfers tracked
//! as one. Transfers report byte-level progress, move through a lifecycle
//! state machine, and can be paused into a serializable token and resumed.
//!
//! # Architecture
//!
//! ```text
//!   TransferManager (sizing, listener wiring, directory walks)
//!        |
//!        v
//!   Upload / Download / Copy / MultipleFileTransfer   (handles)
//!        |
//!        v
//!   TransferBase (state, progress, listeners) <-- monitor (Weak)
//!        |
//!        v
//!   MultipartMonitor / DownloadMonitor  --> TransferExecutor (bounded tasks)
//!        |
//!        v
//!   ObjectStorage
//! ```

pub mod config;
pub mod copy;
pub mod download;
pub mod error;
pub mod executor;
pub mod manager;
pub mod monitor;
mod multipart;
pub mod multiple;
pub mod persistable;
pub mod progress;
pub mod state;
pub mod transfer;
pub mod upload;
pub mod utils;

pub use config::TransferManagerConfig;
pub use copy::{Copy, CopyResult};
pub use download::Download;
pub use error::{TransferError, TransferResult};
pub use executor::TransferExecutor;
pub use manager::{ObjectMetadataProvider, TransferManager};
pub use multiple::{MultipleFileDownload, MultipleFileTransfer, MultipleFileUpload};
pub use persistable::{PersistableDownload, PersistableTransfer, PersistableUpload};
pub use progress::{ProgressEvent, ProgressEventCode, ProgressListener, TransferProgress};
pub use state::{PauseResult, PauseStatus, TransferState};
pub use transfer::{Transfer, TransferStateChangeListener};
pub use upload::{Upload, UploadRequest, UploadResult, UploadSource};
