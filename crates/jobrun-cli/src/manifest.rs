//! Built-in demo provider: writes a manifest of the staged inputs.

use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use jobrun_core::{ClassifiedInputs, ResultLocation, UNKNOWN_ROLE};
use jobrun_engine::{Provider, ProviderError, RunContext};
use tracing::debug;

/// Lists every staged input with its role, size and line count.
pub struct ManifestProvider {
    /// Pause after each input, so progress and cancellation are observable.
    step_delay: Duration,
}

impl ManifestProvider {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[async_trait]
impl Provider for ManifestProvider {
    async fn run(
        &self,
        inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        let total = inputs.len().max(1);
        let mut report = String::new();
        writeln!(report, "task\t{}", ctx.task_id()).ok();

        for (i, input) in inputs.iter().enumerate() {
            if ctx.is_cancelled() {
                return Ok(Vec::new());
            }
            ctx.status(format!("reading {}", input.original_name));

            let bytes = tokio::fs::read(&input.staged_path).await?;
            let lines = bytes.iter().filter(|b| **b == b'\n').count();
            writeln!(
                report,
                "{}\t{}\t{} bytes\t{} lines",
                input.role,
                input.original_name,
                bytes.len(),
                lines
            )
            .ok();
            debug!(name = %input.original_name, bytes = bytes.len(), "Read input");

            ctx.progress(((i + 1) * 100 / total) as i64);

            if !self.step_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.step_delay) => {}
                    _ = ctx.cancelled() => return Ok(Vec::new()),
                }
            }
        }

        for name in inputs.unknown() {
            writeln!(report, "{UNKNOWN_ROLE}\t{name}\tskipped").ok();
        }

        ctx.status("writing manifest");
        let path = ctx.result_path("manifest", "txt");
        tokio::fs::write(&path, report).await?;
        Ok(vec![ResultLocation::new(path)])
    }
}
