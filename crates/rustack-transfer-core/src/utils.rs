//! Part sizing, multipart eligibility and pause-status rules.

use std::path::Path;

use crate::config::{MAXIMUM_UPLOAD_PARTS, TransferManagerConfig};
use crate::state::{PauseStatus, TransferState};

/// Cipher block size encrypted part sizes are aligned to.
const CIPHER_BLOCK_SIZE: u64 = 32;

/// `max(ceil(content_length / max_parts), min_part_size)`.
///
/// # Examples
///
/// ```
/// use rustack_transfer_core::utils::calculate_optimal_part_size;
///
/// assert_eq!(calculate_optimal_part_size(5_000_000_000, 10_000, 5_242_880), 5_242_880);
/// assert_eq!(calculate_optimal_part_size(100_000_000_000, 10_000, 5_242_880), 10_000_000);
/// ```
#[must_use]
pub fn calculate_optimal_part_size(content_length: u64, max_parts: u64, min_part_size: u64) -> u64 {
    content_length
        .div_ceil(max_parts.max(1))
        .max(min_part_size)
}

/// Part size for an upload of `content_length` bytes.
///
/// Encrypted uploads are rounded up to the cipher block size.
#[must_use]
pub fn calculate_optimal_upload_part_size(
    content_length: u64,
    config: &TransferManagerConfig,
    encrypted: bool,
) -> u64 {
    let size = calculate_optimal_part_size(
        content_length,
        MAXIMUM_UPLOAD_PARTS,
        config.minimum_upload_part_size,
    );
    if encrypted {
        size.next_multiple_of(CIPHER_BLOCK_SIZE)
    } else {
        size
    }
}

/// Part size for a copy of `content_length` bytes.
#[must_use]
pub fn calculate_optimal_copy_part_size(content_length: u64, config: &TransferManagerConfig) -> u64 {
    calculate_optimal_part_size(
        content_length,
        MAXIMUM_UPLOAD_PARTS,
        config.multipart_copy_part_size,
    )
}

/// Whether an upload of `content_length` bytes uses a multipart session.
#[must_use]
pub fn should_use_multipart_upload(content_length: u64, config: &TransferManagerConfig) -> bool {
    content_length > config.multipart_upload_threshold
}

/// Whether a copy of a `content_length` byte source uses a multipart session.
#[must_use]
pub fn should_use_multipart_copy(content_length: u64, config: &TransferManagerConfig) -> bool {
    content_length > config.multipart_copy_threshold
}

/// Whether upload parts can be sent in parallel.
///
/// Encrypted parts are chained and stream sources can only be read once in
/// order.
#[must_use]
pub fn is_upload_parallelizable(source_is_file: bool, encrypted: bool) -> bool {
    source_is_file && !encrypted
}

/// Pause outcome for a transfer in `state` when no resume token exists.
#[must_use]
pub fn determine_pause_status(state: TransferState, force_cancel: bool) -> PauseStatus {
    match (state, force_cancel) {
        (TransferState::Waiting, true) => PauseStatus::CanceledBeforeStart,
        (TransferState::InProgress, true) => PauseStatus::Canceled,
        (TransferState::Waiting, false) => PauseStatus::NotStarted,
        _ => PauseStatus::NoEffect,
    }
}

/// Content type guessed from a file name's extension.
#[must_use]
pub fn content_type_for(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match extension.as_str() {
        "txt" | "log" => mime::TEXT_PLAIN,
        "html" | "htm" => mime::TEXT_HTML,
        "css" => mime::TEXT_CSS,
        "csv" => mime::TEXT_CSV,
        "xml" => mime::TEXT_XML,
        "js" => mime::APPLICATION_JAVASCRIPT,
        "json" => mime::APPLICATION_JSON,
        "pdf" => mime::APPLICATION_PDF,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "svg" => mime::IMAGE_SVG,
        "woff" => mime::FONT_WOFF,
        "woff2" => mime::FONT_WOFF2,
        _ => mime::APPLICATION_OCTET_STREAM,
    };
    mime.essence_str().to_owned()
}

/// One byte range of a multipart transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartRange {
    /// 1-based part number.
    pub(crate) part_number: u32,
    /// Offset of the first byte.
    pub(crate) offset: u64,
    /// Number of bytes.
    pub(crate) size: u64,
}

impl PartRange {
    /// Offset of the last byte (inclusive).
    pub(crate) fn last_byte(&self) -> u64 {
        self.offset + self.size - 1
    }
}

/// Split `content_length` bytes into consecutive parts of `part_size`.
pub(crate) fn part_ranges(content_length: u64, part_size: u64) -> Vec<PartRange> {
    let part_size = part_size.max(1);
    let mut ranges = Vec::new();
    let mut offset = 0;
    let mut part_number = 1;
    while offset < content_length {
        let size = part_size.min(content_length - offset);
        ranges.push(PartRange {
            part_number,
            offset,
            size,
        });
        offset += size;
        part_number += 1;
    }
    ranges
}
