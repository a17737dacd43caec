//! The shared transfer base: state machine, listeners and waiting.
//!
//! Every concrete transfer ([`Upload`](crate::upload::Upload),
//! [`Download`](crate::download::Download), [`Copy`](crate::copy::Copy) and
//! the multi-file aggregates) embeds an `Arc<TransferBase>` and exposes it
//! through the [`Transfer`] capability trait.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{TransferError, TransferResult};
use crate::monitor::TransferMonitor;
use crate::progress::{ProgressEventCode, ProgressListener, ProgressListenerChain, TransferProgress};
use crate::state::TransferState;

/// Extra behaviour run after every applied state transition.
pub type StateHook = Box<dyn Fn(TransferState) + Send + Sync>;

// ---------------------------------------------------------------------------
// State-change listeners
// ---------------------------------------------------------------------------

/// Observer of a transfer's state transitions.
///
/// Implemented for any `Fn(&TransferBase, TransferState) + Send + Sync`
/// closure.
pub trait TransferStateChangeListener: Send + Sync {
    /// Called after `transfer` moved to `state`.
    fn transfer_state_changed(&self, transfer: &TransferBase, state: TransferState);
}

impl<F> TransferStateChangeListener for F
where
    F: Fn(&TransferBase, TransferState) + Send + Sync,
{
    fn transfer_state_changed(&self, transfer: &TransferBase, state: TransferState) {
        self(transfer, state);
    }
}

// ---------------------------------------------------------------------------
// TransferBase
// ---------------------------------------------------------------------------

/// State, progress and listeners of one logical transfer.
pub struct TransferBase {
    description: String,
    state: Mutex<TransferState>,
    progress: Arc<TransferProgress>,
    listener_chain: Arc<ProgressListenerChain>,
    state_listeners: RwLock<Vec<Arc<dyn TransferStateChangeListener>>>,
    monitor: OnceLock<Weak<dyn TransferMonitor>>,
    state_hook: Option<StateHook>,
}

impl fmt::Debug for TransferBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBase")
            .field("description", &self.description)
            .field("state", &*self.state.lock())
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl TransferBase {
    /// Create a transfer in the `Waiting` state.
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        progress: Arc<TransferProgress>,
        listener_chain: Arc<ProgressListenerChain>,
    ) -> Self {
        Self {
            description: description.into(),
            state: Mutex::new(TransferState::Waiting),
            progress,
            listener_chain,
            state_listeners: RwLock::new(Vec::new()),
            monitor: OnceLock::new(),
            state_hook: None,
        }
    }

    /// Install a hook run after every applied transition, before the
    /// state-change listeners.
    #[must_use]
    pub fn with_state_hook(mut self, hook: StateHook) -> Self {
        self.state_hook = Some(hook);
        self
    }

    /// Human readable description, e.g. `Uploading to bucket/key`.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        *self.state.lock()
    }

    /// Whether the transfer reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Byte counters of this transfer.
    #[must_use]
    pub fn progress(&self) -> &Arc<TransferProgress> {
        &self.progress
    }

    /// The chain progress events of this transfer are fired on.
    #[must_use]
    pub fn progress_listener_chain(&self) -> &Arc<ProgressListenerChain> {
        &self.listener_chain
    }

    /// Fire a lifecycle progress event.
    pub fn fire(&self, code: ProgressEventCode) {
        self.listener_chain.fire(code);
    }

    /// Move to `new_state` and notify.
    ///
    /// Returns `false`, leaving the state unchanged, when the transfer is
    /// already terminal.
    pub fn set_state(&self, new_state: TransferState) -> bool {
        if !self.set_state_quietly(new_state) {
            return false;
        }
        self.notify_state_change(new_state);
        true
    }

    /// Move to `new_state` without running the hook or any listener.
    ///
    /// Pair with [`notify_state_change`](Self::notify_state_change).
    pub fn set_state_quietly(&self, new_state: TransferState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            trace!(
                description = %self.description,
                state = %*state,
                rejected = %new_state,
                "ignoring transition out of terminal state"
            );
            return false;
        }
        trace!(description = %self.description, from = %*state, to = %new_state, "state transition");
        *state = new_state;
        true
    }

    /// Run the state hook, then every state-change listener, for `state`.
    pub fn notify_state_change(&self, state: TransferState) {
        if let Some(hook) = &self.state_hook {
            hook(state);
        }
        let listeners = self.state_listeners.read().clone();
        for listener in listeners {
            listener.transfer_state_changed(self, state);
        }
    }

    /// Register a progress listener.
    pub fn add_progress_listener(&self, listener: Arc<dyn ProgressListener>) {
        self.listener_chain.add(listener);
    }

    /// Unregister a progress listener.
    pub fn remove_progress_listener(&self, listener: &Arc<dyn ProgressListener>) {
        self.listener_chain.remove(listener);
    }

    /// Register a state-change listener.
    pub fn add_state_change_listener(&self, listener: Arc<dyn TransferStateChangeListener>) {
        self.state_listeners.write().push(listener);
    }

    /// Unregister a state-change listener (matched by identity).
    pub fn remove_state_change_listener(&self, listener: &Arc<dyn TransferStateChangeListener>) {
        self.state_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Attach the monitor driving this transfer. Only the first call has an
    /// effect.
    ///
    /// The base keeps a weak reference; the transfer handle and the running
    /// tasks own the monitor.
    pub fn set_monitor(&self, monitor: &Arc<dyn TransferMonitor>) {
        if self.monitor.set(Arc::downgrade(monitor)).is_err() {
            debug!(description = %self.description, "monitor already attached");
        }
    }

    /// The monitor driving this transfer, while it is alive.
    #[must_use]
    pub fn monitor(&self) -> Option<Arc<dyn TransferMonitor>> {
        self.monitor.get().and_then(Weak::upgrade)
    }

    /// Wait until the transfer finishes.
    ///
    /// The monitor may replace its outstanding unit of work while we wait,
    /// so the current future is fetched again after each one resolves.
    pub async fn wait_for_completion(&self) -> TransferResult<()> {
        let Some(monitor) = self.monitor() else {
            return match self.state() {
                TransferState::Completed => Ok(()),
                TransferState::Canceled => Err(TransferError::Canceled),
                state => Err(anyhow::anyhow!(
                    "transfer '{}' has no live monitor (state {state})",
                    self.description
                )
                .into()),
            };
        };
        loop {
            monitor.future().await?;
            if monitor.is_done() {
                return Ok(());
            }
        }
    }

    /// Block the calling thread until the transfer finishes.
    ///
    /// Must not be called from a runtime worker thread.
    pub fn blocking_wait_for_completion(&self) -> TransferResult<()> {
        futures::executor::block_on(self.wait_for_completion())
    }

    /// Wait until the transfer finishes and return its error, if any.
    pub async fn wait_for_exception(&self) -> Option<TransferError> {
        self.wait_for_completion().await.err()
    }
}

// ---------------------------------------------------------------------------
// Transfer capability trait
// ---------------------------------------------------------------------------

/// Operations shared by every kind of transfer.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// The embedded transfer base.
    fn base(&self) -> &TransferBase;

    /// Human readable description.
    fn description(&self) -> &str {
        self.base().description()
    }

    /// Current state.
    fn state(&self) -> TransferState {
        self.base().state()
    }

    /// Whether the transfer reached a terminal state.
    fn is_done(&self) -> bool {
        self.base().is_done()
    }

    /// Byte counters.
    fn progress(&self) -> &Arc<TransferProgress> {
        self.base().progress()
    }

    /// Register a progress listener.
    fn add_progress_listener(&self, listener: Arc<dyn ProgressListener>) {
        self.base().add_progress_listener(listener);
    }

    /// Unregister a progress listener.
    fn remove_progress_listener(&self, listener: &Arc<dyn ProgressListener>) {
        self.base().remove_progress_listener(listener);
    }

    /// Register a state-change listener.
    fn add_state_change_listener(&self, listener: Arc<dyn TransferStateChangeListener>) {
        self.base().add_state_change_listener(listener);
    }

    /// Unregister a state-change listener.
    fn remove_state_change_listener(&self, listener: &Arc<dyn TransferStateChangeListener>) {
        self.base().remove_state_change_listener(listener);
    }

    /// Wait until the transfer finishes.
    async fn wait_for_completion(&self) -> TransferResult<()> {
        self.base().wait_for_completion().await
    }

    /// Wait until the transfer finishes and return its error, if any.
    async fn wait_for_exception(&self) -> Option<TransferError> {
        self.base().wait_for_exception().await
    }
}
