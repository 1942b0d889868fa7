//! Per-domain task controller.

use std::fmt;
use std::sync::Arc;

use jobrun_core::{ResultLocation, StatusView, TaskId, TaskPhase, TaskState};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::DomainConfig;
use crate::error::StartError;
use crate::provider::ProviderRegistry;
use crate::slot::{SharedSlot, Slot};
use crate::stager::{self, Classification, RawInput, Stager};
use crate::worker::{self, RunAssignment};

/// Acknowledgement of an accepted start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    pub task_id: TaskId,
}

impl fmt::Display for StartReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "started, id={}", self.task_id)
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The running task was flagged for cancellation.
    Requested(TaskId),
    /// The running task had already been flagged.
    AlreadyRequested(TaskId),
    /// Nothing was running; no-op.
    NotRunning,
}

impl fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested(id) => write!(f, "cancellation requested for task {id}"),
            Self::AlreadyRequested(id) => {
                write!(f, "cancellation already requested for task {id}")
            }
            Self::NotRunning => write!(f, "no task is running, nothing to cancel"),
        }
    }
}

/// Runs at most one background task at a time for a single domain.
///
/// All methods may be called concurrently. Task state is guarded by one
/// mutex that is never held across an await point, so `status()` never
/// waits on the worker.
pub struct TaskController {
    domain: Arc<DomainConfig>,
    stager: Stager,
    providers: Arc<ProviderRegistry>,
    slot: SharedSlot,
    tracker: TaskTracker,
}

impl TaskController {
    /// Create an idle controller for `domain`.
    pub fn new(domain: DomainConfig, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            stager: Stager::for_domain(&domain),
            domain: Arc::new(domain),
            providers,
            slot: SharedSlot::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Domain served by this controller.
    pub fn domain(&self) -> &DomainConfig {
        &self.domain
    }

    /// The stager used to validate inputs, for dry runs.
    pub fn stager(&self) -> &Stager {
        &self.stager
    }

    /// Validate and stage `inputs`, then run the domain provider in the
    /// background.
    ///
    /// Rejected requests leave the task state untouched. Staging runs on the
    /// controller's tracker: if this future is dropped mid-staging, the staged
    /// inputs are released and no run is started.
    pub async fn start(&self, inputs: Vec<RawInput>) -> Result<StartReceipt, StartError> {
        let claim = match StagingClaim::acquire(&self.slot) {
            Ok(claim) => claim,
            Err(e) => {
                warn!(domain = %self.domain.name, error = %e, "Rejected start");
                return Err(e);
            }
        };

        let classification = self.stager.validate(&inputs).map_err(|e| {
            info!(domain = %self.domain.name, error = %e, "Rejected start: invalid inputs");
            StartError::from(e)
        })?;

        let abandoned = CancellationToken::new();
        let _abandon_on_drop = abandoned.clone().drop_guard();

        let admission = self.tracker.spawn(admit(Admission {
            claim,
            domain: self.domain.clone(),
            stager: self.stager.clone(),
            providers: self.providers.clone(),
            slot: self.slot.clone(),
            tracker: self.tracker.clone(),
            task_id: TaskId::generate(),
            inputs,
            classification,
            abandoned,
        }));

        match admission.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(StartError::ShuttingDown),
        }
    }

    /// Request cooperative cancellation of the running task.
    ///
    /// Returns immediately; the provider stops at its next checkpoint.
    pub fn cancel(&self) -> CancelOutcome {
        let mut slot = self.slot.lock();
        let task_id = match (&slot.state.task_id, slot.state.is_running) {
            (Some(id), true) => id.clone(),
            _ => {
                warn!(domain = %self.domain.name, "Cancel requested but no task is running");
                return CancelOutcome::NotRunning;
            }
        };

        if slot.state.request_cancel() {
            slot.cancel_token.cancel();
            info!(domain = %self.domain.name, task_id = %task_id, "Cancellation requested");
            CancelOutcome::Requested(task_id)
        } else {
            CancelOutcome::AlreadyRequested(task_id)
        }
    }

    /// Copy of the current task state.
    pub fn status(&self) -> TaskState {
        self.slot.snapshot()
    }

    /// Current task state in its serialized shape.
    pub fn status_view(&self) -> StatusView {
        StatusView::from(self.status())
    }

    /// Outputs of the last successful run; empty otherwise.
    pub fn result(&self) -> Vec<ResultLocation> {
        self.slot.lock().state.result_locations.clone()
    }

    /// Lifecycle phase, including staging of a pending start.
    pub fn phase(&self) -> TaskPhase {
        let slot = self.slot.lock();
        if slot.staging && !slot.state.is_running {
            TaskPhase::Staging
        } else {
            slot.state.phase()
        }
    }

    /// Return to the idle state. Refused while a task is running.
    pub fn reset(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.state.is_running {
            warn!(domain = %self.domain.name, "Reset refused: task is running");
            return false;
        }
        slot.state = TaskState::idle();
        info!(domain = %self.domain.name, "Task state reset");
        true
    }

    /// Wait until every pending start and every worker spawned so far has
    /// finished, including staged-file cleanup.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        // Shutdown closes the tracker under the same lock.
        let slot = self.slot.lock();
        if slot.accepting {
            self.tracker.reopen();
        }
    }

    /// Stop accepting starts, cancel the running task, and wait for its
    /// worker to finish.
    pub async fn shutdown(&self) {
        self.begin_shutdown();
        self.wait_for_workers().await;
    }

    pub(crate) fn begin_shutdown(&self) {
        let mut slot = self.slot.lock();
        slot.accepting = false;
        self.tracker.close();
        if slot.state.request_cancel() {
            slot.cancel_token.cancel();
            info!(domain = %self.domain.name, "Cancelling running task for shutdown");
        }
    }

    pub(crate) async fn wait_for_workers(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        info!(domain = %self.domain.name, "Controller shut down");
    }
}

impl fmt::Debug for TaskController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskController")
            .field("domain", &self.domain.name)
            .field("phase", &self.phase())
            .finish()
    }
}

/// A validated start request, staged and installed by a task on the
/// controller's tracker.
struct Admission {
    claim: StagingClaim,
    domain: Arc<DomainConfig>,
    stager: Stager,
    providers: Arc<ProviderRegistry>,
    slot: SharedSlot,
    tracker: TaskTracker,
    task_id: TaskId,
    inputs: Vec<RawInput>,
    classification: Classification,
    /// Cancelled when the caller of `start` stops waiting.
    abandoned: CancellationToken,
}

async fn admit(admission: Admission) -> Result<StartReceipt, StartError> {
    let Admission {
        claim,
        domain,
        stager,
        providers,
        slot,
        tracker,
        task_id,
        inputs,
        classification,
        abandoned,
    } = admission;

    let staged = stager.stage(&task_id, &inputs, &classification).await?;

    if abandoned.is_cancelled() {
        info!(domain = %domain.name, task_id = %task_id, "Start abandoned during staging, releasing inputs");
        stager::release(staged.staged_paths()).await;
        return Err(StartError::Abandoned);
    }

    let token = CancellationToken::new();
    let installed = {
        let mut guard = slot.lock();
        if guard.accepting {
            guard.state = TaskState::begin(task_id.clone(), classification.processed_inputs());
            guard.cancel_token = token.clone();
            claim.commit(&mut guard);
            true
        } else {
            false
        }
    };
    if !installed {
        stager::release(staged.staged_paths()).await;
        return Err(StartError::ShuttingDown);
    }

    info!(
        domain = %domain.name,
        task_id = %task_id,
        inputs = staged.len(),
        unknown = staged.unknown().len(),
        "Task started"
    );

    tracker.spawn(worker::execute(RunAssignment {
        domain,
        providers,
        slot,
        task_id: task_id.clone(),
        inputs: staged,
        token,
    }));

    Ok(StartReceipt { task_id })
}

/// Holds the single-flight slot while a start request stages its inputs.
///
/// Released on drop unless committed.
#[derive(Debug)]
struct StagingClaim {
    slot: SharedSlot,
    committed: bool,
}

impl StagingClaim {
    fn acquire(shared: &SharedSlot) -> Result<Self, StartError> {
        let mut slot = shared.lock();
        if !slot.accepting {
            return Err(StartError::ShuttingDown);
        }
        if slot.state.is_running || slot.staging {
            return Err(StartError::AlreadyRunning);
        }
        slot.staging = true;
        Ok(Self {
            slot: shared.clone(),
            committed: false,
        })
    }

    /// Hand the slot over to the run whose state was just installed.
    fn commit(mut self, slot: &mut Slot) {
        slot.staging = false;
        self.committed = true;
    }
}

impl Drop for StagingClaim {
    fn drop(&mut self) {
        if !self.committed {
            self.slot.lock().staging = false;
        }
    }
}
