//! JobRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - An async runtime
//! - The filesystem
//! - Any particular business domain
//!
//! All types here describe one background task run: its state, its inputs,
//! and the shape reported back to callers.

pub mod error;
pub mod ids;
pub mod input;
pub mod status;
pub mod task;
pub mod view;

// Re-export commonly used types
pub use error::ValidationError;
pub use ids::{short_id, TaskId};
pub use input::{
    sanitize_file_name, ClassifiedInputs, InputDescriptor, ProcessedInput, RoleRule, UNKNOWN_ROLE,
};
pub use status::TaskPhase;
pub use task::{ResultLocation, TaskState};
pub use view::StatusView;
