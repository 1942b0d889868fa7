//! JobRun Engine
//!
//! Background job execution for back-office domains. Each domain gets a
//! [`TaskController`] that accepts a set of input files, stages them, and
//! runs the domain's [`Provider`] on a background task while callers poll
//! its status. Runs are single-flight per domain, cancellation is
//! cooperative, and staged inputs are removed when a run ends however it
//! ends.

pub mod config;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod provider;
pub mod stager;

mod slot;
mod worker;

// Re-export commonly used types
pub use config::{DomainConfig, EngineConfig};
pub use context::RunContext;
pub use controller::{CancelOutcome, StartReceipt, TaskController};
pub use engine::Engine;
pub use error::{ConfigError, ProviderError, StartError};
pub use provider::{Provider, ProviderRegistry};
pub use stager::{Classification, InputSource, RawInput, Stager};

pub use jobrun_core;
