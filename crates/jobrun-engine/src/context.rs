//! Callbacks handed to a provider for one run.

use std::path::{Path, PathBuf};

use chrono::Utc;
use jobrun_core::{short_id, TaskId, TaskState};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::slot::SharedSlot;

/// A provider's view of its run: progress and status reporting, the
/// cancellation flag, and the results directory.
///
/// Cheap to clone; a clone can be moved into `spawn_blocking` for CPU-bound
/// work. Reports arriving after the run has been finalized are ignored.
#[derive(Debug, Clone)]
pub struct RunContext {
    task_id: TaskId,
    slot: SharedSlot,
    token: CancellationToken,
    results_dir: PathBuf,
}

impl RunContext {
    pub(crate) fn new(
        task_id: TaskId,
        slot: SharedSlot,
        token: CancellationToken,
        results_dir: PathBuf,
    ) -> Self {
        Self {
            task_id,
            slot,
            token,
            results_dir,
        }
    }

    /// A context attached to no controller, for exercising a provider on its
    /// own. Cancel the returned token to simulate a user cancellation.
    pub fn standalone(results_dir: impl Into<PathBuf>) -> (Self, CancellationToken) {
        let task_id = TaskId::generate();
        let slot = SharedSlot::new();
        slot.lock().state = TaskState::begin(task_id.clone(), Vec::new());
        let token = CancellationToken::new();
        let ctx = Self::new(task_id, slot, token.clone(), results_dir.into());
        (ctx, token)
    }

    /// Identifier of the run.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Report progress in percent.
    ///
    /// Values are clamped to 0-99 and decreases are ignored; the run
    /// reaches 100 only when it completes successfully.
    pub fn progress(&self, percent: i64) {
        let mut slot = self.slot.lock();
        if slot.state.is_current_run(&self.task_id) && slot.state.report_progress(percent) {
            trace!(task_id = %self.task_id, progress = slot.state.progress, "Progress");
        }
    }

    /// Replace the human-readable status message.
    pub fn status(&self, message: impl Into<String>) {
        let mut slot = self.slot.lock();
        if slot.state.is_current_run(&self.task_id) {
            slot.state.report_status(message);
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Directory results should be written to. Exists when the run starts.
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// A unique path in the results directory:
    /// `<stem>_<YYYYmmdd_HHMMSS>_<short id>.<ext>`.
    pub fn result_path(&self, stem: &str, ext: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let name = format!("{stem}_{stamp}_{}", short_id());
        let name = if ext.is_empty() {
            name
        } else {
            format!("{name}.{}", ext.trim_start_matches('.'))
        };
        self.results_dir.join(name)
    }

    /// Current progress of the run (test support).
    #[cfg(test)]
    pub(crate) fn current_progress(&self) -> u8 {
        self.slot.lock().state.progress
    }
}
