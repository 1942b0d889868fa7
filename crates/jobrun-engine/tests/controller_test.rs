//! Integration tests for the task controller.
//!
//! These tests verify:
//! 1. Single-flight starts per domain
//! 2. Cooperative cancellation discards results
//! 3. Reset is refused while running
//! 4. Input validation errors name the offending role
//! 5. Staged inputs are removed after every kind of run
//! 6. Progress is monotonic and reaches 100 only on success
//! 7. Shutdown cancels the active run and refuses new starts

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jobrun_engine::jobrun_core::{
    ClassifiedInputs, ResultLocation, TaskState, ValidationError, UNKNOWN_ROLE,
};
use jobrun_engine::{
    CancelOutcome, DomainConfig, Engine, EngineConfig, Provider, ProviderError,
    ProviderRegistry, RawInput, RunContext, StartError, TaskController,
};
use tokio::sync::Notify;

// ============================================================================
// Test providers
// ============================================================================

/// Sleeps in ticks, checking for cancellation, then writes one result file.
struct SleepyProvider {
    total: Duration,
    tick: Duration,
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl SleepyProvider {
    fn new(total: Duration, tick: Duration) -> Self {
        Self {
            total,
            tick,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Provider for SleepyProvider {
    async fn run(
        &self,
        inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        for path in inputs.staged_paths() {
            assert!(path.exists(), "staged input missing during run");
            self.seen.lock().unwrap().push(path.to_path_buf());
        }

        let ticks = (self.total.as_millis() / self.tick.as_millis()).max(1) as i64;
        for i in 0..ticks {
            if ctx.is_cancelled() {
                return Ok(Vec::new());
            }
            ctx.status(format!("step {} of {}", i + 1, ticks));
            tokio::time::sleep(self.tick).await;
            ctx.progress((i + 1) * 100 / ticks);
        }

        let out = ctx.result_path("registry", "txt");
        tokio::fs::write(&out, b"done").await?;
        Ok(vec![ResultLocation::new(out)])
    }
}

/// Reports progress, then waits until released.
struct GatedProvider {
    gate: Arc<Notify>,
}

#[async_trait]
impl Provider for GatedProvider {
    async fn run(
        &self,
        _inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        ctx.progress(30);
        ctx.status("parsing");
        self.gate.notified().await;
        Ok(vec![ResultLocation::new(ctx.result_path("gated", "txt"))])
    }
}

/// Ignores cancellation and returns a result anyway.
struct StubbornProvider;

#[async_trait]
impl Provider for StubbornProvider {
    async fn run(
        &self,
        _inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(vec![ResultLocation::new(ctx.result_path("late", "txt"))])
    }
}

struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    async fn run(
        &self,
        _inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        ctx.progress(40);
        Err(ProviderError::failed("bad header in deals"))
    }
}

struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    async fn run(
        &self,
        _inputs: &ClassifiedInputs,
        _ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        panic!("column index out of range");
    }
}

/// Never finishes on its own and ignores cancellation.
struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    async fn run(
        &self,
        _inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![ResultLocation::new(ctx.result_path("never", "txt"))])
    }
}

/// Reports progress out of order.
struct JumpyProvider;

#[async_trait]
impl Provider for JumpyProvider {
    async fn run(
        &self,
        _inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        for value in [10, 50, 30, 70, 20, 100, 90] {
            ctx.progress(value);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(vec![ResultLocation::new(ctx.result_path("jumpy", "txt"))])
    }
}

struct NamedProvider(&'static str);

#[async_trait]
impl Provider for NamedProvider {
    async fn run(
        &self,
        _inputs: &ClassifiedInputs,
        ctx: &RunContext,
    ) -> Result<Vec<ResultLocation>, ProviderError> {
        Ok(vec![ResultLocation::new(ctx.result_path(self.0, "txt"))])
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn registry_domain(root: &Path) -> DomainConfig {
    DomainConfig::registry()
        .with_staging_dir(root.join("staging"))
        .with_results_dir(root.join("results"))
}

fn controller_with(root: &Path, provider: Arc<dyn Provider>) -> TaskController {
    let providers = Arc::new(ProviderRegistry::new());
    providers.register("registry", provider);
    TaskController::new(registry_domain(root), providers)
}

fn registry_files(root: &Path) -> Vec<RawInput> {
    let uploads = root.join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    ["Сделки_март.xlsx", "Проверка.xlsx", "empl.xlsx"]
        .iter()
        .map(|name| {
            let path = uploads.join(name);
            std::fs::write(&path, name.as_bytes()).unwrap();
            RawInput::from_path(path)
        })
        .collect()
}

async fn wait_idle(controller: &TaskController) -> TaskState {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let state = controller.status();
        if !state.is_running {
            return state;
        }
        assert!(Instant::now() < deadline, "task did not finish in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn staging_entries(root: &Path) -> usize {
    match std::fs::read_dir(root.join("staging")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_registry_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SleepyProvider::new(
        Duration::from_millis(200),
        Duration::from_millis(50),
    ));
    let seen = provider.seen.clone();
    let controller = controller_with(dir.path(), provider);
    let files = registry_files(dir.path());

    let err = controller.start(files[..2].to_vec()).await.unwrap_err();
    assert!(matches!(
        err,
        StartError::Validation(ValidationError::TooFewInputs { min: 3, got: 2 })
    ));
    assert_eq!(err.to_string(), "need at least 3 files, got 2");
    assert_eq!(controller.status(), TaskState::idle());

    let receipt = controller.start(files.clone()).await.unwrap();
    assert!(receipt.to_string().starts_with("started, id="));
    assert!(controller.status().is_running);

    let state = wait_idle(&controller).await;
    assert!(state.has_result());
    assert_eq!(state.progress, 100);
    assert_eq!(state.status, "completed");
    assert!(state.error.is_none());
    assert!(!state.cancelled);
    assert_eq!(state.task_id, Some(receipt.task_id));
    assert!(state.ended_at.is_some());
    assert_eq!(state.processed_inputs.len(), 3);

    let results = controller.result();
    assert_eq!(results.len(), 1);
    assert!(results[0].path.exists());

    controller.drain().await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|p| !p.exists()));
    assert_eq!(staging_entries(dir.path()), 0);
    assert!(files.iter().all(|f| match &f.source {
        jobrun_engine::InputSource::Path(p) => p.exists(),
        jobrun_engine::InputSource::Bytes(_) => true,
    }));
}

#[tokio::test]
async fn test_cancel_discards_result() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SleepyProvider::new(
        Duration::from_secs(2),
        Duration::from_millis(100),
    ));
    let controller = controller_with(dir.path(), provider);

    let started = Instant::now();
    let receipt = controller.start(registry_files(dir.path())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        controller.cancel(),
        CancelOutcome::Requested(receipt.task_id.clone())
    );
    assert_eq!(
        controller.cancel(),
        CancelOutcome::AlreadyRequested(receipt.task_id)
    );

    let state = wait_idle(&controller).await;
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(state.cancelled);
    assert!(!state.has_result());
    assert!(state.error.is_none());
    assert_eq!(state.status, "cancelled by user");
    assert!(state.progress < 100);

    controller.drain().await;
    assert_eq!(staging_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_uncooperative_provider_result_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(StubbornProvider));

    controller.start(registry_files(dir.path())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(controller.cancel(), CancelOutcome::Requested(_)));

    let state = wait_idle(&controller).await;
    assert!(state.cancelled);
    assert!(state.result_locations.is_empty());
    assert!(controller.result().is_empty());
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let controller = controller_with(dir.path(), Arc::new(GatedProvider { gate: gate.clone() }));

    controller.start(registry_files(dir.path())).await.unwrap();
    let before = controller.status();

    let err = controller.start(registry_files(dir.path())).await.unwrap_err();
    assert!(matches!(err, StartError::AlreadyRunning));
    assert_eq!(controller.status().task_id, before.task_id);
    assert_eq!(controller.status().started_at, before.started_at);

    gate.notify_one();
    let state = wait_idle(&controller).await;
    assert!(state.has_result());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let controller = Arc::new(controller_with(
        dir.path(),
        Arc::new(GatedProvider { gate: gate.clone() }),
    ));
    let files = registry_files(dir.path());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let controller = controller.clone();
        let files = files.clone();
        handles.push(tokio::spawn(async move { controller.start(files).await }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert!(matches!(e, StartError::AlreadyRunning)),
        }
    }
    assert_eq!(accepted, 1);

    gate.notify_one();
    wait_idle(&controller).await;
    controller.drain().await;
    assert_eq!(staging_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_reset_refused_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Notify::new());
    let controller = controller_with(dir.path(), Arc::new(GatedProvider { gate: gate.clone() }));

    controller.start(registry_files(dir.path())).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.status().status != "parsing" {
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(!controller.reset());
    let state = controller.status();
    assert!(state.is_running);
    assert_eq!(state.progress, 30);
    assert_eq!(state.status, "parsing");

    gate.notify_one();
    wait_idle(&controller).await;
    assert!(controller.reset());
    assert_eq!(controller.status(), TaskState::idle());
    assert!(controller.result().is_empty());

    // Resetting an idle controller always succeeds.
    assert!(controller.reset());
    assert_eq!(controller.status(), TaskState::idle());
}

#[tokio::test]
async fn test_validation_names_roles() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(NamedProvider("unused")));
    let mut files = registry_files(dir.path());

    files[2] = RawInput::from_bytes("staff.xlsx", b"x".to_vec());
    let err = controller.start(files.clone()).await.unwrap_err();
    assert!(err.to_string().contains("employee"));

    files[2] = RawInput::from_bytes("empl.xlsx", b"x".to_vec());
    files.push(RawInput::from_bytes("check_2.xlsx", b"x".to_vec()));
    let err = controller.start(files).await.unwrap_err();
    assert!(matches!(
        &err,
        StartError::Validation(ValidationError::DuplicateRole { role, count: 2 }) if role == "check"
    ));
    assert!(err.to_string().contains("check"));

    assert_eq!(controller.status(), TaskState::idle());
    assert_eq!(staging_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_provider_error_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(FailingProvider));

    controller.start(registry_files(dir.path())).await.unwrap();
    let state = wait_idle(&controller).await;

    assert_eq!(state.error.as_deref(), Some("bad header in deals"));
    assert_eq!(state.status, "error: bad header in deals");
    assert!(!state.has_result());
    assert!(!state.cancelled);
    assert_eq!(state.progress, 40);

    controller.drain().await;
    assert_eq!(staging_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_missing_provider_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let controller = TaskController::new(
        registry_domain(dir.path()),
        Arc::new(ProviderRegistry::new()),
    );

    controller.start(registry_files(dir.path())).await.unwrap();
    let state = wait_idle(&controller).await;

    assert_eq!(state.error.as_deref(), Some("provider unavailable"));
    assert_eq!(state.progress, 0);

    controller.drain().await;
    assert_eq!(staging_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_provider_panic_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(PanickingProvider));

    controller.start(registry_files(dir.path())).await.unwrap();
    let state = wait_idle(&controller).await;

    let error = state.error.unwrap();
    assert!(error.starts_with("provider panicked"));
    assert!(error.contains("column index out of range"));

    controller.drain().await;
    assert_eq!(staging_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_watchdog_fails_slow_run() {
    let dir = tempfile::tempdir().unwrap();
    let providers = Arc::new(ProviderRegistry::new());
    providers.register("registry", Arc::new(HangingProvider));
    let domain = registry_domain(dir.path()).with_max_runtime(Duration::from_secs(1));
    let controller = TaskController::new(domain, providers);

    controller.start(registry_files(dir.path())).await.unwrap();
    let state = wait_idle(&controller).await;

    assert_eq!(state.error.as_deref(), Some("timed out after 1s"));
    assert!(!state.cancelled);
    assert!(!state.has_result());
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(JumpyProvider));

    controller.start(registry_files(dir.path())).await.unwrap();

    let mut observed = Vec::new();
    loop {
        let state = controller.status();
        if !state.is_running {
            assert_eq!(state.progress, 100);
            break;
        }
        assert!(state.progress < 100);
        observed.push(state.progress);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_cancel_when_idle_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(NamedProvider("x")));

    assert_eq!(controller.cancel(), CancelOutcome::NotRunning);
    assert!(!controller.status().cancelled);
}

#[tokio::test]
async fn test_provider_replacement_applies_to_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let providers = Arc::new(ProviderRegistry::new());
    providers.register("registry", Arc::new(NamedProvider("first")));
    let controller = TaskController::new(registry_domain(dir.path()), providers.clone());

    controller.start(registry_files(dir.path())).await.unwrap();
    wait_idle(&controller).await;
    assert!(controller.result()[0].name.starts_with("first_"));

    providers.register("registry", Arc::new(NamedProvider("second")));
    controller.start(registry_files(dir.path())).await.unwrap();
    wait_idle(&controller).await;
    assert!(controller.result()[0].name.starts_with("second_"));
}

#[tokio::test]
async fn test_unknown_inputs_are_audited() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(NamedProvider("audit")));
    let mut files = registry_files(dir.path());
    files.push(RawInput::from_bytes("readme.txt", b"notes".to_vec()));

    controller.start(files).await.unwrap();
    let state = wait_idle(&controller).await;

    let roles: Vec<&str> = state
        .processed_inputs
        .iter()
        .map(|p| p.role.as_str())
        .collect();
    assert_eq!(roles, ["deals", "check", "employee", UNKNOWN_ROLE]);

    let view = controller.status_view();
    assert!(view.has_result);
    assert_eq!(view.processed_inputs.len(), 4);
}

// ============================================================================
// Abandoned starts and shutdown
// ============================================================================

#[tokio::test]
async fn test_dropped_start_releases_staged_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let providers = Arc::new(ProviderRegistry::new());
    providers.register("demo", Arc::new(NamedProvider("demo")));
    let domain = DomainConfig::demo()
        .with_staging_dir(dir.path().join("staging"))
        .with_results_dir(dir.path().join("results"));
    let controller = TaskController::new(domain, providers);

    let inputs = vec![
        RawInput::from_bytes("a.csv", b"a,b,c".to_vec()),
        RawInput::from_bytes("b.csv", vec![b'x'; 64 << 20]),
    ];
    // Staging 64 MiB normally outlasts the timeout, dropping `start` mid-copy.
    // If it wins the race the run goes ahead and cleans up after itself.
    if let Ok(started) =
        tokio::time::timeout(Duration::from_millis(5), controller.start(inputs)).await
    {
        started.unwrap();
    }

    controller.drain().await;
    assert_eq!(staging_entries(dir.path()), 0);
    assert!(!controller.status().is_running);

    // The slot is free again.
    controller
        .start(vec![RawInput::from_bytes("c.csv", b"c".to_vec())])
        .await
        .unwrap();
    let state = wait_idle(&controller).await;
    assert!(state.has_result());
}

#[tokio::test]
async fn test_shutdown_cancels_active_run() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(SleepyProvider::new(
        Duration::from_secs(5),
        Duration::from_millis(50),
    ));
    let seen = provider.seen.clone();
    let controller = controller_with(dir.path(), provider);

    controller.start(registry_files(dir.path())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    controller.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let state = controller.status();
    assert!(!state.is_running);
    assert!(state.cancelled);
    assert!(!state.has_result());
    assert_eq!(state.status, "cancelled by user");

    assert_eq!(seen.lock().unwrap().len(), 3);
    assert!(seen.lock().unwrap().iter().all(|p| !p.exists()));
    assert_eq!(staging_entries(dir.path()), 0);

    let err = controller.start(registry_files(dir.path())).await.unwrap_err();
    assert!(matches!(err, StartError::ShuttingDown));
    assert_eq!(staging_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_engine_shutdown_cancels_active_run() {
    let dir = tempfile::tempdir().unwrap();
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(
        "registry",
        Arc::new(SleepyProvider::new(
            Duration::from_secs(5),
            Duration::from_millis(50),
        )),
    );
    let config = EngineConfig {
        domains: vec![registry_domain(dir.path())],
    };
    let engine = Engine::new(config, providers).unwrap();
    let registry = engine.controller("registry").unwrap();

    registry.start(registry_files(dir.path())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.shutdown().await;

    let state = registry.status();
    assert!(!state.is_running);
    assert!(state.cancelled);
    assert!(!state.has_result());
    assert_eq!(staging_entries(dir.path()), 0);

    let err = registry.start(registry_files(dir.path())).await.unwrap_err();
    assert!(matches!(err, StartError::ShuttingDown));
}

#[tokio::test]
async fn test_drain_after_shutdown_keeps_tracker_closed() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_with(dir.path(), Arc::new(NamedProvider("x")));

    controller.shutdown().await;
    // Returns at once because the tracker stays closed and empty.
    tokio::time::timeout(Duration::from_secs(1), controller.drain())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), controller.shutdown())
        .await
        .unwrap();
}
