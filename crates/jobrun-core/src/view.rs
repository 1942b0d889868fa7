//! Serialized status shape returned to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ProcessedInput, TaskState};

/// Status of a domain task as exposed over the request boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub is_running: bool,
    pub progress: u8,
    pub status: String,
    pub error: Option<String>,
    pub has_result: bool,
    pub task_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since start, or total run time once finished.
    pub duration: Option<f64>,
    pub cancelled: bool,
    pub processed_inputs: Vec<ProcessedInput>,
}

impl From<&TaskState> for StatusView {
    fn from(state: &TaskState) -> Self {
        Self {
            is_running: state.is_running,
            progress: state.progress,
            status: state.status.clone(),
            error: state.error.clone(),
            has_result: state.has_result(),
            task_id: state.task_id.as_ref().map(|id| id.to_string()),
            started_at: state.started_at,
            duration: state
                .duration()
                .map(|d| d.num_milliseconds() as f64 / 1000.0),
            cancelled: state.cancelled,
            processed_inputs: state.processed_inputs.clone(),
        }
    }
}

impl From<TaskState> for StatusView {
    fn from(state: TaskState) -> Self {
        Self::from(&state)
    }
}
