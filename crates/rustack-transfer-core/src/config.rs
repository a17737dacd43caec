//! Transfer manager configuration.
//!
//! Provides [`TransferManagerConfig`], the sizing thresholds and scheduling
//! knobs of the transfer engine. Values can be loaded from environment
//! variables with [`TransferManagerConfig::from_env`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Maximum number of parts a multipart upload or copy may be split into.
pub const MAXIMUM_UPLOAD_PARTS: u64 = 10_000;

const MIB: u64 = 1024 * 1024;

/// Default minimum part size for multipart uploads (5 MiB).
pub const DEFAULT_MINIMUM_UPLOAD_PART_SIZE: u64 = 5 * MIB;

/// Default size threshold above which uploads use multipart (16 MiB).
pub const DEFAULT_MULTIPART_UPLOAD_THRESHOLD: u64 = 16 * MIB;

/// Default size threshold above which copies use multipart (5 GiB).
pub const DEFAULT_MULTIPART_COPY_THRESHOLD: u64 = 5 * 1024 * MIB;

/// Default minimum part size for multipart copies (100 MiB).
pub const DEFAULT_MULTIPART_COPY_PART_SIZE: u64 = 100 * MIB;

/// Default delay between two polls of an in-flight multipart transfer.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default number of storage requests allowed to run concurrently.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Transfer manager configuration.
///
/// # Examples
///
/// ```
/// use rustack_transfer_core::config::TransferManagerConfig;
///
/// let config = TransferManagerConfig::default();
/// assert_eq!(config.minimum_upload_part_size, 5 * 1024 * 1024);
/// assert_eq!(config.multipart_upload_threshold, 16 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct TransferManagerConfig {
    /// Smallest part size used when splitting an upload.
    #[builder(default = DEFAULT_MINIMUM_UPLOAD_PART_SIZE)]
    pub minimum_upload_part_size: u64,

    /// Uploads strictly larger than this use a multipart session.
    #[builder(default = DEFAULT_MULTIPART_UPLOAD_THRESHOLD)]
    pub multipart_upload_threshold: u64,

    /// Copies of sources strictly larger than this use a multipart session.
    #[builder(default = DEFAULT_MULTIPART_COPY_THRESHOLD)]
    pub multipart_copy_threshold: u64,

    /// Smallest part size used when splitting a copy.
    #[builder(default = DEFAULT_MULTIPART_COPY_PART_SIZE)]
    pub multipart_copy_part_size: u64,

    /// Delay between two polls of an in-flight multipart transfer, in milliseconds.
    #[builder(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Number of storage requests allowed to run concurrently.
    #[builder(default = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,
}

impl Default for TransferManagerConfig {
    fn default() -> Self {
        Self {
            minimum_upload_part_size: DEFAULT_MINIMUM_UPLOAD_PART_SIZE,
            multipart_upload_threshold: DEFAULT_MULTIPART_UPLOAD_THRESHOLD,
            multipart_copy_threshold: DEFAULT_MULTIPART_COPY_THRESHOLD,
            multipart_copy_part_size: DEFAULT_MULTIPART_COPY_PART_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl TransferManagerConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TRANSFER_MIN_UPLOAD_PART_SIZE` | `5242880` |
    /// | `TRANSFER_MULTIPART_UPLOAD_THRESHOLD` | `16777216` |
    /// | `TRANSFER_MULTIPART_COPY_THRESHOLD` | `5368709120` |
    /// | `TRANSFER_MULTIPART_COPY_PART_SIZE` | `104857600` |
    /// | `TRANSFER_POLL_INTERVAL_MS` | `5000` |
    /// | `TRANSFER_MAX_CONCURRENCY` | `10` |
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_env("TRANSFER_MIN_UPLOAD_PART_SIZE") {
            config.minimum_upload_part_size = n;
        }
        if let Some(n) = parse_env("TRANSFER_MULTIPART_UPLOAD_THRESHOLD") {
            config.multipart_upload_threshold = n;
        }
        if let Some(n) = parse_env("TRANSFER_MULTIPART_COPY_THRESHOLD") {
            config.multipart_copy_threshold = n;
        }
        if let Some(n) = parse_env("TRANSFER_MULTIPART_COPY_PART_SIZE") {
            config.multipart_copy_part_size = n;
        }
        if let Some(n) = parse_env("TRANSFER_POLL_INTERVAL_MS") {
            config.poll_interval_ms = n;
        }
        if let Some(n) = parse_env("TRANSFER_MAX_CONCURRENCY") {
            config.max_concurrency = n;
        }

        config
    }

    /// Delay between two polls of an in-flight multipart transfer.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Read and parse a numeric environment variable.
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}
