//! Background execution of one accepted run.

use std::any::Any;
use std::sync::Arc;

use jobrun_core::{ClassifiedInputs, ResultLocation, TaskId};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DomainConfig;
use crate::context::RunContext;
use crate::error::RunFailure;
use crate::provider::ProviderRegistry;
use crate::slot::SharedSlot;
use crate::stager;

/// Everything a worker owns for the duration of one run.
pub(crate) struct RunAssignment {
    pub(crate) domain: Arc<DomainConfig>,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) slot: SharedSlot,
    pub(crate) task_id: TaskId,
    pub(crate) inputs: ClassifiedInputs,
    pub(crate) token: CancellationToken,
}

/// Run the domain provider, finalize the task state, then remove the staged
/// inputs. Finalization and cleanup happen on every exit path.
pub(crate) async fn execute(run: RunAssignment) {
    let outcome = run_provider(&run).await;
    finalize(&run, outcome);
    stager::release(run.inputs.staged_paths()).await;
}

async fn run_provider(run: &RunAssignment) -> Result<Vec<ResultLocation>, RunFailure> {
    let Some(provider) = run.providers.resolve(&run.domain.name) else {
        error!(domain = %run.domain.name, task_id = %run.task_id, "No provider registered for domain");
        return Err(RunFailure::ProviderUnavailable);
    };

    let results_dir = run.domain.results_dir();
    tokio::fs::create_dir_all(&results_dir).await.map_err(|e| {
        RunFailure::Execution(format!(
            "failed to create results directory '{}': {e}",
            results_dir.display()
        ))
    })?;

    info!(
        domain = %run.domain.name,
        task_id = %run.task_id,
        inputs = run.inputs.len(),
        "Running provider"
    );

    let ctx = RunContext::new(
        run.task_id.clone(),
        run.slot.clone(),
        run.token.clone(),
        results_dir,
    );
    let inputs = run.inputs.clone();
    // A separate task so a panicking provider still lets the run finalize.
    let mut handle = tokio::spawn(async move { provider.run(&inputs, &ctx).await });

    let joined = match run.domain.max_runtime() {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                run.token.cancel();
                handle.abort();
                return Err(RunFailure::TimedOut(limit));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(e)) => Err(RunFailure::from_provider(&e)),
        Err(e) if e.is_panic() => Err(RunFailure::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(RunFailure::Execution(e.to_string())),
    }
}

fn finalize(run: &RunAssignment, outcome: Result<Vec<ResultLocation>, RunFailure>) {
    let domain = run.domain.name.as_str();
    let task_id = &run.task_id;
    let mut slot = run.slot.lock();

    if !slot.state.is_current_run(task_id) {
        warn!(domain, task_id = %task_id, "Run no longer owns the task state, skipping finalization");
        return;
    }

    let cancelled = slot.state.cancelled;
    match outcome {
        // The provider never ran, so there was nothing to cancel.
        Err(failure @ RunFailure::ProviderUnavailable) => {
            error!(domain, task_id = %task_id, error = %failure, "Run failed");
            slot.state.fail(failure.to_string());
        }
        Ok(results) if cancelled => {
            if !results.is_empty() {
                info!(domain, task_id = %task_id, "Discarding result of cancelled run");
            }
            slot.state.finish_cancelled();
            info!(domain, task_id = %task_id, "Run cancelled");
        }
        Err(failure) if cancelled => {
            warn!(domain, task_id = %task_id, error = %failure, "Run failed after cancellation was requested");
            slot.state.finish_cancelled();
        }
        Ok(results) if results.is_empty() => {
            error!(domain, task_id = %task_id, "Provider returned no result");
            slot.state.fail(RunFailure::NoResult.to_string());
        }
        Ok(results) => {
            info!(domain, task_id = %task_id, results = results.len(), "Run completed");
            slot.state.complete(results);
        }
        Err(failure) => {
            error!(domain, task_id = %task_id, error = %failure, "Run failed");
            slot.state.fail(failure.to_string());
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
