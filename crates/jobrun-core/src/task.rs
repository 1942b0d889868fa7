//! Task state and its transitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ProcessedInput, TaskId, TaskPhase};

/// Highest progress a running provider may report; 100 is reserved for success.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

/// Status text of a freshly reset task.
pub const STATUS_IDLE: &str = "idle";
/// Status text after a successful run.
pub const STATUS_COMPLETED: &str = "completed";
/// Status text after a cancelled run.
pub const STATUS_CANCELLED: &str = "cancelled by user";

/// One output produced by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLocation {
    /// Where the output was written.
    pub path: PathBuf,

    /// Name to present to the user (download name).
    pub name: String,
}

impl ResultLocation {
    /// Create a location named after the file it points to.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    /// Builder method to override the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// The mutable record describing one run's lifecycle.
///
/// Invariants kept by the transition methods:
/// - non-empty `result_locations` implies no error and not cancelled;
/// - `cancelled` implies empty `result_locations`;
/// - `progress` never decreases while running and is frozen afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// Identifier of the current or last run.
    pub task_id: Option<TaskId>,

    /// Whether a worker currently owns the run.
    pub is_running: bool,

    /// Percentage complete, 0-100.
    pub progress: u8,

    /// Human-readable phase description.
    pub status: String,

    /// Failure message, set only on failure.
    pub error: Option<String>,

    /// Outputs, set only on success.
    pub result_locations: Vec<ResultLocation>,

    /// Whether cancellation was requested for the run.
    pub cancelled: bool,

    /// When the run was accepted.
    pub started_at: Option<DateTime<Utc>>,

    /// When the worker finalized the run.
    pub ended_at: Option<DateTime<Utc>>,

    /// Audit trail of submitted inputs.
    pub processed_inputs: Vec<ProcessedInput>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::idle()
    }
}

impl TaskState {
    /// An all-default, never-run state.
    pub fn idle() -> Self {
        Self {
            task_id: None,
            is_running: false,
            progress: 0,
            status: STATUS_IDLE.to_string(),
            error: None,
            result_locations: Vec::new(),
            cancelled: false,
            started_at: None,
            ended_at: None,
            processed_inputs: Vec::new(),
        }
    }

    /// A fresh state for an accepted run.
    pub fn begin(task_id: TaskId, processed_inputs: Vec<ProcessedInput>) -> Self {
        Self {
            task_id: Some(task_id),
            is_running: true,
            status: "started".to_string(),
            started_at: Some(Utc::now()),
            processed_inputs,
            ..Self::idle()
        }
    }

    /// Whether `task_id` is the run currently executing.
    pub fn is_current_run(&self, task_id: &TaskId) -> bool {
        self.is_running && self.task_id.as_ref() == Some(task_id)
    }

    /// Record provider progress, clamped to `0..=MAX_RUNNING_PROGRESS`.
    ///
    /// Lower values than the current progress are ignored. Returns whether
    /// the progress changed.
    pub fn report_progress(&mut self, value: i64) -> bool {
        if !self.is_running {
            return false;
        }
        let clamped = value.clamp(0, i64::from(MAX_RUNNING_PROGRESS)) as u8;
        if clamped > self.progress {
            self.progress = clamped;
            true
        } else {
            false
        }
    }

    /// Overwrite the status text while running.
    pub fn report_status(&mut self, status: impl Into<String>) {
        if self.is_running {
            self.status = status.into();
        }
    }

    /// Flag the run for cooperative cancellation.
    ///
    /// Returns false if nothing is running or cancellation was already requested.
    pub fn request_cancel(&mut self) -> bool {
        if !self.is_running || self.cancelled {
            return false;
        }
        self.cancelled = true;
        self.status = "cancellation requested".to_string();
        true
    }

    /// Finalize a successful run.
    pub fn complete(&mut self, results: Vec<ResultLocation>) {
        self.result_locations = results;
        self.error = None;
        self.progress = 100;
        self.status = STATUS_COMPLETED.to_string();
        self.finish();
    }

    /// Finalize a run that stopped because of cancellation. Any result is discarded.
    pub fn finish_cancelled(&mut self) {
        self.result_locations.clear();
        self.error = None;
        self.cancelled = true;
        self.status = STATUS_CANCELLED.to_string();
        self.finish();
    }

    /// Finalize a failed run. A failure is never reported as a cancellation.
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.result_locations.clear();
        self.cancelled = false;
        self.status = format!("error: {error}");
        self.error = Some(error);
        self.finish();
    }

    fn finish(&mut self) {
        self.is_running = false;
        self.ended_at = Some(Utc::now());
    }

    /// Whether the run produced outputs.
    pub fn has_result(&self) -> bool {
        !self.result_locations.is_empty()
    }

    /// Lifecycle phase derived from the recorded fields.
    pub fn phase(&self) -> TaskPhase {
        if self.is_running {
            TaskPhase::Running
        } else if self.error.is_some() {
            TaskPhase::Failed
        } else if self.cancelled {
            TaskPhase::Cancelled
        } else if self.has_result() {
            TaskPhase::Completed
        } else {
            TaskPhase::Idle
        }
    }

    /// Wall-clock time between start and end (or now, while running).
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let ended = self.ended_at.unwrap_or_else(Utc::now);
        Some(ended - started)
    }
}
