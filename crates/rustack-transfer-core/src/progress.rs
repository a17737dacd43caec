//! Progress accounting and progress-event broadcast.
//!
//! A transfer reports two kinds of [`ProgressEvent`]s: byte deltas
//! ([`ProgressEventCode::BytesTransferred`]) and lifecycle signals (started,
//! completed, part completed, ...). Events flow through a
//! [`ProgressListenerChain`], which fans them out to every registered
//! [`ProgressListener`]. A [`TransferProgressUpdatingListener`] at the head of
//! each transfer's chain folds byte deltas into its [`TransferProgress`].
//!
//! # Delivery rules
//!
//! - Listeners may be added or removed while events are being delivered; each
//!   delivery works on a snapshot of the listener list.
//! - Byte events carrying zero bytes are dropped by the chain.
//! - Events for one transfer are delivered in the order they are fired. No
//!   ordering holds across the sub-transfers of an aggregate.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

/// Sentinel for "total size unknown".
const UNKNOWN_TOTAL: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// TransferProgress
// ---------------------------------------------------------------------------

/// Thread-safe byte counters for one transfer.
#[derive(Debug)]
pub struct TransferProgress {
    bytes_transferred: AtomicU64,
    total_bytes_to_transfer: AtomicU64,
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferProgress {
    /// Create progress counters with an unknown total.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes_transferred: AtomicU64::new(0),
            total_bytes_to_transfer: AtomicU64::new(UNKNOWN_TOTAL),
        }
    }

    /// Create progress counters with a known total.
    #[must_use]
    pub fn with_total(total: u64) -> Self {
        let progress = Self::new();
        progress.set_total_bytes_to_transfer(total);
        progress
    }

    /// Bytes transferred so far.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Acquire)
    }

    /// Total bytes expected, if known.
    #[must_use]
    pub fn total_bytes_to_transfer(&self) -> Option<u64> {
        match self.total_bytes_to_transfer.load(Ordering::Acquire) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    /// Set the total bytes expected.
    pub fn set_total_bytes_to_transfer(&self, total: u64) {
        self.total_bytes_to_transfer.store(total, Ordering::Release);
    }

    /// Add `bytes` to the transferred count.
    pub fn update_progress(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Percentage transferred, or `None` while the total is unknown.
    ///
    /// An empty transfer counts as fully transferred.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_transferred(&self) -> Option<f64> {
        let total = self.total_bytes_to_transfer()?;
        if total == 0 {
            return Some(100.0);
        }
        Some(self.bytes_transferred() as f64 / total as f64 * 100.0)
    }
}

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressEventCode {
    /// Bytes were transferred; the event carries the delta.
    BytesTransferred,
    /// An aggregate transfer is being prepared.
    Preparing,
    /// The transfer started.
    Started,
    /// The transfer completed.
    Completed,
    /// The transfer failed.
    Failed,
    /// The transfer was canceled.
    Canceled,
    /// A part started transferring.
    PartStarted,
    /// A part finished transferring.
    PartCompleted,
    /// A part failed.
    PartFailed,
}

/// A progress notification: either a byte delta or a lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    code: ProgressEventCode,
    bytes: u64,
}

impl ProgressEvent {
    /// A byte-delta event.
    #[must_use]
    pub fn bytes(bytes: u64) -> Self {
        Self {
            code: ProgressEventCode::BytesTransferred,
            bytes,
        }
    }

    /// A lifecycle event carrying no bytes.
    #[must_use]
    pub fn code(code: ProgressEventCode) -> Self {
        Self { code, bytes: 0 }
    }

    /// The event kind.
    #[must_use]
    pub fn event_code(&self) -> ProgressEventCode {
        self.code
    }

    /// Bytes carried by this event (zero for lifecycle events).
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes
    }

    /// Whether this is a byte-delta event.
    #[must_use]
    pub fn is_byte_event(&self) -> bool {
        self.code == ProgressEventCode::BytesTransferred
    }
}

// ---------------------------------------------------------------------------
// ProgressListener
// ---------------------------------------------------------------------------

/// Observer of progress events.
///
/// Implemented for any `Fn(&ProgressEvent) + Send + Sync` closure. Listeners
/// run synchronously on whichever task fired the event and should return
/// quickly.
pub trait ProgressListener: Send + Sync {
    /// Called for every delivered event.
    fn progress_changed(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn progress_changed(&self, event: &ProgressEvent) {
        self(event);
    }
}

// ---------------------------------------------------------------------------
// ProgressListenerChain
// ---------------------------------------------------------------------------

/// Broadcasts progress events to a dynamic set of listeners.
///
/// The chain is itself a [`ProgressListener`], so chains can be nested.
#[derive(Default)]
pub struct ProgressListenerChain {
    listeners: RwLock<Vec<Arc<dyn ProgressListener>>>,
}

impl fmt::Debug for ProgressListenerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressListenerChain")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl ProgressListenerChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain with the given initial listeners.
    #[must_use]
    pub fn with_listeners(listeners: impl IntoIterator<Item = Arc<dyn ProgressListener>>) -> Self {
        Self {
            listeners: RwLock::new(listeners.into_iter().collect()),
        }
    }

    /// Register a listener.
    pub fn add(&self, listener: Arc<dyn ProgressListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregister a listener previously added (matched by identity).
    pub fn remove(&self, listener: &Arc<dyn ProgressListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Fire a lifecycle event.
    pub fn fire(&self, code: ProgressEventCode) {
        self.progress_changed(&ProgressEvent::code(code));
    }

    /// Fire a byte-delta event.
    pub fn fire_bytes(&self, bytes: u64) {
        self.progress_changed(&ProgressEvent::bytes(bytes));
    }
}

impl ProgressListener for ProgressListenerChain {
    fn progress_changed(&self, event: &ProgressEvent) {
        if event.is_byte_event() && event.bytes_transferred() == 0 {
            return;
        }
        let snapshot = self.listeners.read().clone();
        trace!(code = ?event.event_code(), bytes = event.bytes_transferred(), listeners = snapshot.len(), "delivering progress event");
        for listener in snapshot {
            listener.progress_changed(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Progress-updating listeners
// ---------------------------------------------------------------------------

/// Folds byte events into a [`TransferProgress`].
#[derive(Debug)]
pub struct TransferProgressUpdatingListener {
    progress: Arc<TransferProgress>,
}

impl TransferProgressUpdatingListener {
    /// Create a listener updating `progress`.
    #[must_use]
    pub fn new(progress: Arc<TransferProgress>) -> Self {
        Self { progress }
    }
}

impl ProgressListener for TransferProgressUpdatingListener {
    fn progress_changed(&self, event: &ProgressEvent) {
        if event.is_byte_event() {
            self.progress.update_progress(event.bytes_transferred());
        }
    }
}

/// Folds a sub-transfer's byte events into the aggregate's progress and
/// relays them to the aggregate's chain.
///
/// Lifecycle events of the sub-transfer are not relayed; the aggregate fires
/// its own from its state transitions.
#[derive(Debug)]
pub struct MultipleFileTransferProgressUpdatingListener {
    progress: Arc<TransferProgress>,
    aggregate_chain: Arc<ProgressListenerChain>,
}

impl MultipleFileTransferProgressUpdatingListener {
    /// Create a listener feeding the aggregate's `progress` and `aggregate_chain`.
    #[must_use]
    pub fn new(progress: Arc<TransferProgress>, aggregate_chain: Arc<ProgressListenerChain>) -> Self {
        Self {
            progress,
            aggregate_chain,
        }
    }
}

impl ProgressListener for MultipleFileTransferProgressUpdatingListener {
    fn progress_changed(&self, event: &ProgressEvent) {
        if event.is_byte_event() {
            self.progress.update_progress(event.bytes_transferred());
            self.aggregate_chain.progress_changed(event);
        }
    }
}
