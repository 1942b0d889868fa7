//! Lifecycle phase of a domain task.

use serde::{Deserialize, Serialize};

/// Phase of the task owned by a domain controller.
///
/// `Idle -> Staging -> Running -> {Completed | Failed | Cancelled}`; `Idle`
/// is re-entered only by the next start or an explicit reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    /// Nothing has run since construction or the last reset.
    #[default]
    Idle,
    /// A start request is validating and copying its inputs.
    Staging,
    /// The worker is executing the provider.
    Running,
    /// The provider returned results.
    Completed,
    /// Provider resolution or execution failed.
    Failed,
    /// The run was cancelled by the user.
    Cancelled,
}

impl TaskPhase {
    /// Returns true if the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true while the single-flight slot is held.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Staging | Self::Running)
    }

    /// Lowercase name for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Staging => "staging",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}
