//! The lock-guarded task slot shared by a controller, its worker, and the
//! provider callbacks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use jobrun_core::TaskState;
use tokio_util::sync::CancellationToken;

/// Everything a controller guards with its single mutex.
#[derive(Debug)]
pub(crate) struct Slot {
    /// State of the current or last run.
    pub(crate) state: TaskState,

    /// A start request holds the single-flight slot while it stages inputs.
    pub(crate) staging: bool,

    /// Cleared once shutdown begins.
    pub(crate) accepting: bool,

    /// Cancellation token of the current run.
    pub(crate) cancel_token: CancellationToken,
}

#[derive(Debug, Clone)]
pub(crate) struct SharedSlot(Arc<Mutex<Slot>>);

impl SharedSlot {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(Slot {
            state: TaskState::idle(),
            staging: false,
            accepting: true,
            cancel_token: CancellationToken::new(),
        })))
    }

    /// Lock the slot.
    ///
    /// Every mutation leaves the state consistent, so a poisoned lock is
    /// recovered rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Slot> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deep copy of the task state.
    pub(crate) fn snapshot(&self) -> TaskState {
        self.lock().state.clone()
    }
}
