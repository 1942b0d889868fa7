//! Core domain errors.

use thiserror::Error;

/// Reasons a set of inputs is rejected before a task starts.
///
/// Returned synchronously from a start request; the task never begins and
/// no state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing was submitted.
    #[error("no files were submitted")]
    NoInputs,

    /// Fewer inputs than the domain requires.
    #[error("need at least {min} files, got {got}")]
    TooFewInputs { min: usize, got: usize },

    /// A required role has no matching input.
    #[error("missing required file for role '{role}' (name must start with {})", quote_all(.prefixes))]
    MissingRole { role: String, prefixes: Vec<String> },

    /// A single-valued role matched more than one input.
    #[error("role '{role}' accepts a single file, got {count}")]
    DuplicateRole { role: String, count: usize },
}

fn quote_all(prefixes: &[String]) -> String {
    prefixes
        .iter()
        .map(|p| format!("'{p}'"))
        .collect::<Vec<_>>()
        .join(" or ")
}
