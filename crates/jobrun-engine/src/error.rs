//! Engine errors.

use std::time::Duration;

use jobrun_core::ValidationError;
use thiserror::Error;

/// Why a start request was not accepted.
#[derive(Debug, Error)]
pub enum StartError {
    /// Another run holds the single-flight slot.
    #[error("a task is already running")]
    AlreadyRunning,

    /// The controller is shutting down.
    #[error("controller is shutting down")]
    ShuttingDown,

    /// The inputs failed role validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The caller stopped waiting before staging finished; the staged inputs
    /// were released and no run was started.
    #[error("start request was abandoned during staging")]
    Abandoned,

    /// Copying an input into the staging directory failed.
    #[error("failed to stage '{name}': {source}")]
    Staging {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The transformation failed with a message.
    #[error("{0}")]
    Failed(String),

    /// Reading inputs or writing results failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// How a run ended when it did not succeed or get cancelled.
#[derive(Debug, Error)]
pub(crate) enum RunFailure {
    #[error("provider unavailable")]
    ProviderUnavailable,

    #[error("{0}")]
    Execution(String),

    #[error("provider panicked: {0}")]
    Panicked(String),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("provider returned no result")]
    NoResult,
}

impl RunFailure {
    /// Capture a provider error together with its source chain.
    pub(crate) fn from_provider(err: &ProviderError) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.ends_with(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        Self::Execution(message)
    }
}

/// Errors loading the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
