//! Aggregates of many single-object transfers (directory uploads and
//! downloads).
//!
//! An aggregate owns no work of its own: its state is derived from its
//! sub-transfers' states, its progress is fed by their byte events, and
//! waiting on it waits on all of them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::trace;

use crate::download::Download;
use crate::error::TransferResult;
use crate::monitor::{TransferFuture, TransferMonitor};
use crate::progress::{
    MultipleFileTransferProgressUpdatingListener, ProgressEventCode, ProgressListener,
    ProgressListenerChain, TransferProgress,
};
use crate::state::TransferState;
use crate::transfer::{StateHook, Transfer, TransferBase, TransferStateChangeListener};
use crate::upload::Upload;

/// Final state of an aggregate whose sub-transfers are all done.
///
/// `Failed` wins over `Canceled`, which wins over `Completed`.
#[must_use]
pub fn collate_final_state(states: impl IntoIterator<Item = TransferState>) -> TransferState {
    let mut seen_canceled = false;
    for state in states {
        match state {
            TransferState::Failed => return TransferState::Failed,
            TransferState::Canceled => seen_canceled = true,
            _ => {}
        }
    }
    if seen_canceled {
        TransferState::Canceled
    } else {
        TransferState::Completed
    }
}

/// A transfer that can be part of an aggregate.
pub trait SubTransfer: Transfer + Clone {
    /// A shared handle on the transfer's base.
    fn shared_base(&self) -> Arc<TransferBase>;
}

impl SubTransfer for Upload {
    fn shared_base(&self) -> Arc<TransferBase> {
        Upload::shared_base(self)
    }
}

impl SubTransfer for Download {
    fn shared_base(&self) -> Arc<TransferBase> {
        Download::shared_base(self)
    }
}

type SubBases = Arc<OnceLock<Vec<Arc<TransferBase>>>>;

// ---------------------------------------------------------------------------
// Sub-transfer state listener
// ---------------------------------------------------------------------------

/// Recomputes the aggregate's state whenever a sub-transfer changes state.
struct SubTransferStateListener {
    aggregate: Weak<TransferBase>,
    subs: SubBases,
    collate: Mutex<()>,
}

impl TransferStateChangeListener for SubTransferStateListener {
    fn transfer_state_changed(&self, _transfer: &TransferBase, state: TransferState) {
        let Some(aggregate) = self.aggregate.upgrade() else {
            return;
        };
        let _guard = self.collate.lock();
        if aggregate.state() == state || aggregate.is_done() {
            return;
        }
        if state == TransferState::InProgress {
            aggregate.set_state(TransferState::InProgress);
            return;
        }
        let Some(subs) = self.subs.get() else {
            return;
        };
        if subs.iter().all(|sub| sub.is_done()) {
            let final_state = collate_final_state(subs.iter().map(|sub| sub.state()));
            trace!(aggregate = %aggregate.description(), state = %final_state, "all sub-transfers done");
            aggregate.set_state(final_state);
        } else {
            aggregate.set_state(TransferState::InProgress);
        }
    }
}

/// Translate aggregate states into progress events; `Started` fires once.
fn progress_state_hook(chain: Arc<ProgressListenerChain>) -> StateHook {
    let started = AtomicBool::new(false);
    Box::new(move |state| {
        let code = match state {
            TransferState::Waiting => Some(ProgressEventCode::Preparing),
            TransferState::InProgress => {
                (!started.swap(true, Ordering::AcqRel)).then_some(ProgressEventCode::Started)
            }
            TransferState::Completed => Some(ProgressEventCode::Completed),
            TransferState::Canceled => Some(ProgressEventCode::Canceled),
            TransferState::Failed => Some(ProgressEventCode::Failed),
        };
        if let Some(code) = code {
            chain.fire(code);
        }
    })
}

// ---------------------------------------------------------------------------
// Composite monitor
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AggregateMonitor {
    subs: Vec<Arc<TransferBase>>,
}

impl TransferMonitor for AggregateMonitor {
    fn future(&self) -> TransferFuture {
        let subs = self.subs.clone();
        async move {
            let results = join_all(subs.iter().map(|sub| sub.wait_for_completion())).await;
            results.into_iter().collect::<TransferResult<Vec<()>>>()?;
            Ok(())
        }
        .boxed()
        .shared()
    }

    fn is_done(&self) -> bool {
        self.subs.iter().all(|sub| sub.is_done())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Wires an aggregate before its sub-transfers exist.
///
/// Sub-transfers are built with [`sub_progress_listener`] and
/// [`state_listener`] attached, handed to [`finish`], and only started
/// afterwards, so no state change can reach a half-built aggregate.
///
/// [`sub_progress_listener`]: Self::sub_progress_listener
/// [`state_listener`]: Self::state_listener
/// [`finish`]: Self::finish
pub(crate) struct AggregateBuilder {
    base: Arc<TransferBase>,
    listener: Arc<SubTransferStateListener>,
    subs: SubBases,
}

impl AggregateBuilder {
    pub(crate) fn new(
        description: impl Into<String>,
        progress: Arc<TransferProgress>,
        chain: Arc<ProgressListenerChain>,
    ) -> Self {
        let base = Arc::new(
            TransferBase::new(description, progress, Arc::clone(&chain))
                .with_state_hook(progress_state_hook(chain)),
        );
        let subs = SubBases::default();
        let listener = Arc::new(SubTransferStateListener {
            aggregate: Arc::downgrade(&base),
            subs: Arc::clone(&subs),
            collate: Mutex::new(()),
        });
        Self {
            base,
            listener,
            subs,
        }
    }

    /// Listener relaying a sub-transfer's bytes to the aggregate.
    pub(crate) fn sub_progress_listener(&self) -> Arc<dyn ProgressListener> {
        Arc::new(MultipleFileTransferProgressUpdatingListener::new(
            Arc::clone(self.base.progress()),
            Arc::clone(self.base.progress_listener_chain()),
        ))
    }

    /// Listener recomputing the aggregate's state.
    pub(crate) fn state_listener(&self) -> Arc<dyn TransferStateChangeListener> {
        Arc::clone(&self.listener) as Arc<dyn TransferStateChangeListener>
    }

    /// Assemble the aggregate around its (unstarted) sub-transfers.
    pub(crate) fn finish<T: SubTransfer>(
        self,
        bucket: impl Into<String>,
        key_prefix: impl Into<String>,
        subs: Vec<T>,
    ) -> MultipleFileTransfer<T> {
        let bases: Vec<_> = subs.iter().map(SubTransfer::shared_base).collect();
        if self.subs.set(bases.clone()).is_err() {
            trace!(description = %self.base.description(), "sub-transfers already attached");
        }
        let monitor = Arc::new(AggregateMonitor { subs: bases });
        let as_monitor: Arc<dyn TransferMonitor> = Arc::clone(&monitor) as Arc<dyn TransferMonitor>;
        self.base.set_monitor(&as_monitor);

        self.base.set_state(TransferState::Waiting);
        if subs.is_empty() {
            self.base.set_state(TransferState::Completed);
        }

        MultipleFileTransfer {
            base: self.base,
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
            subs,
            _monitor: monitor,
        }
    }
}

// ---------------------------------------------------------------------------
// MultipleFileTransfer
// ---------------------------------------------------------------------------

/// A set of single-object transfers tracked as one.
pub struct MultipleFileTransfer<T> {
    base: Arc<TransferBase>,
    bucket: String,
    key_prefix: String,
    subs: Vec<T>,
    _monitor: Arc<AggregateMonitor>,
}

/// Upload of many files.
pub type MultipleFileUpload = MultipleFileTransfer<Upload>;

/// Download of many objects.
pub type MultipleFileDownload = MultipleFileTransfer<Download>;

impl<T: fmt::Debug> fmt::Debug for MultipleFileTransfer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipleFileTransfer")
            .field("base", &self.base)
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .field("sub_transfers", &self.subs.len())
            .finish()
    }
}

impl<T> MultipleFileTransfer<T> {
    /// Bucket all sub-transfers target.
    #[must_use]
    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Common key prefix of the sub-transfers.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// The individual transfers.
    #[must_use]
    pub fn sub_transfers(&self) -> &[T] {
        &self.subs
    }
}

impl<T: Send + Sync> Transfer for MultipleFileTransfer<T> {
    fn base(&self) -> &TransferBase {
        &self.base
    }
}

impl MultipleFileTransfer<Upload> {
    /// Abort every sub-upload.
    pub async fn abort(&self) {
        for upload in &self.subs {
            upload.abort().await;
        }
    }
}

impl MultipleFileTransfer<Download> {
    /// Abort every sub-download.
    ///
    /// All sub-downloads are canceled first without notification; the
    /// `Canceled` notifications are delivered only once every one of them
    /// is in its final state.
    pub fn abort(&self) {
        let transitioned: Vec<&Download> = self
            .subs
            .iter()
            .filter(|download| download.abort_without_notifying())
            .collect();
        for download in transitioned {
            download.notify_canceled();
        }
    }
}
