//! Resume tokens for paused transfers.
//!
//! Tokens serialize to JSON tagged by `pauseType` so a paused transfer can
//! be stored and resumed by a later process.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TransferResult;

/// Everything needed to resume a paused multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistableUpload {
    /// Destination bucket.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Source file.
    pub file: PathBuf,
    /// Upload id of the multipart session to continue.
    pub multipart_upload_id: String,
    /// Part size the session was started with.
    pub part_size: u64,
    /// Multipart threshold the session was started with.
    pub multipart_upload_threshold: u64,
}

/// Everything needed to resume a paused download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistableDownload {
    /// Source bucket.
    pub bucket: String,
    /// Source key.
    pub key: String,
    /// Source version, if a specific one was requested.
    pub version_id: Option<String>,
    /// Inclusive byte range originally requested.
    pub range: Option<(u64, u64)>,
    /// Destination file.
    pub file: PathBuf,
}

/// A stored resume token of either kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pauseType", rename_all = "lowercase")]
pub enum PersistableTransfer {
    /// A paused upload.
    Upload(PersistableUpload),
    /// A paused download.
    Download(PersistableDownload),
}

impl PersistableTransfer {
    /// Serialize to JSON.
    pub fn to_json(&self) -> TransferResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a token produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> TransferResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<PersistableUpload> for PersistableTransfer {
    fn from(upload: PersistableUpload) -> Self {
        Self::Upload(upload)
    }
}

impl From<PersistableDownload> for PersistableTransfer {
    fn from(download: PersistableDownload) -> Self {
        Self::Download(download)
    }
}
