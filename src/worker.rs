//! Worker pool - the concurrency core
//!
//! A fixed set of permanent workers plus elastic extras spawned when the
//! queue backs up. Each worker owns exactly one submission at a time and
//! drives it router → orchestrator → judge → persistence. A panic inside the
//! pipeline fails the claimed submission instead of losing it.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::events::{EventSink, SubmissionStore, UpdateEvent};
use crate::judge::{self, CaseObserver, CaseRunner, JudgeOutcome};
use crate::languages::{self, LanguageConfig};
use crate::orchestrator::{Orchestrator, RunContext};
use crate::queue::SubmissionQueue;
use crate::sandbox::{RawResult, ResourceLimits, Sandbox};
use crate::service::{Registry, TestCaseProvider};
use crate::strategy::{self, ExecutionStrategy, StrategyKind, SystemLoad};
use crate::submission::{Submission, SubmissionId, SubmissionStatus, TestCase, TestCaseResult};
use crate::verdict::{Verdict, VerdictKind};

/// Live worker counters feeding the strategy router's load snapshot
#[derive(Debug, Default)]
pub struct LoadTracker {
    pub total_workers: AtomicUsize,
    pub active_workers: AtomicUsize,
}

impl LoadTracker {
    fn snapshot(&self, queue_depth: usize, max_workers: usize) -> SystemLoad {
        let active = self.active_workers.load(Ordering::Relaxed);
        SystemLoad {
            server_load: active as f64 / max_workers.max(1) as f64,
            queue_depth,
            active_workers: active,
        }
    }
}

/// Everything a worker needs, shared across the pool
pub struct WorkerDeps {
    pub config: ServiceConfig,
    pub queue: Arc<SubmissionQueue>,
    pub registry: Arc<Registry>,
    pub tests: Arc<dyn TestCaseProvider>,
    pub orchestrator: Arc<Orchestrator>,
    pub events: Arc<dyn EventSink>,
    pub store: Arc<dyn SubmissionStore>,
    pub load: Arc<LoadTracker>,
}

pub struct WorkerPool {
    deps: Arc<WorkerDeps>,
    next_worker_id: AtomicUsize,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(deps: Arc<WorkerDeps>) -> Self {
        Self {
            deps,
            next_worker_id: AtomicUsize::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the permanent workers and the elastic scaler
    pub fn start(&self) {
        for _ in 0..self.deps.config.min_workers {
            self.spawn_worker(false);
        }
        self.spawn_scaler();
        info!(
            "Worker pool started with {} permanent workers (max {})",
            self.deps.config.min_workers, self.deps.config.max_workers
        );
    }

    /// Stop accepting work and let workers drain what they hold
    pub async fn shutdown(&self) {
        self.deps.queue.close().await;
        self.shutdown.cancel();
        self.deps.orchestrator.shutdown().await;
        info!("Worker pool shut down");
    }

    pub fn total_workers(&self) -> usize {
        self.deps.load.total_workers.load(Ordering::Relaxed)
    }

    pub fn active_workers(&self) -> usize {
        self.deps.load.active_workers.load(Ordering::Relaxed)
    }

    fn spawn_worker(&self, elastic: bool) -> JoinHandle<()> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        spawn_worker_task(self.deps.clone(), self.shutdown.clone(), worker_id, elastic)
    }

    /// Scale up while the queue is deeper than the threshold; elastic workers
    /// retire themselves after sitting idle
    fn spawn_scaler(&self) {
        let deps = self.deps.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut next_worker_id = 10_000usize;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(deps.config.scale_check_interval) => {}
                }
                let depth = deps.queue.depth().await;
                let total = deps.load.total_workers.load(Ordering::Relaxed);
                if depth > deps.config.scale_up_queue_threshold
                    && total < deps.config.max_workers
                {
                    info!(
                        "Queue depth {} exceeds threshold, scaling up to {} workers",
                        depth,
                        total + 1
                    );
                    spawn_worker_task(deps.clone(), shutdown.clone(), next_worker_id, true);
                    next_worker_id += 1;
                }
            }
        });
    }
}

fn spawn_worker_task(
    deps: Arc<WorkerDeps>,
    shutdown: CancellationToken,
    worker_id: usize,
    elastic: bool,
) -> JoinHandle<()> {
    deps.load.total_workers.fetch_add(1, Ordering::Relaxed);
    tokio::spawn(async move {
        worker_loop(worker_id, deps, shutdown, elastic).await;
    })
}

async fn worker_loop(
    worker_id: usize,
    deps: Arc<WorkerDeps>,
    shutdown: CancellationToken,
    elastic: bool,
) {
    debug!("Worker {} started (elastic: {})", worker_id, elastic);
    loop {
        let submission = if elastic {
            tokio::select! {
                _ = shutdown.cancelled() => None,
                s = deps.queue.pop() => s,
                _ = tokio::time::sleep(deps.config.worker_idle_timeout) => {
                    debug!("Worker {} idle past timeout, retiring", worker_id);
                    None
                }
            }
        } else {
            tokio::select! {
                _ = shutdown.cancelled() => None,
                s = deps.queue.pop() => s,
            }
        };
        let Some(submission) = submission else { break };

        let submission_id = submission.id;
        deps.load.active_workers.fetch_add(1, Ordering::Relaxed);

        // A panicking pipeline must fail its submission, not the worker
        let task_deps = deps.clone();
        let task = tokio::spawn(async move {
            process_submission(task_deps, submission).await;
        });
        if let Err(join_error) = task.await {
            error!(
                "Worker {} pipeline crashed on {}: {}",
                worker_id, submission_id, join_error
            );
            fail_after_crash(&deps, submission_id).await;
        }

        deps.load.active_workers.fetch_sub(1, Ordering::Relaxed);
    }
    deps.load.total_workers.fetch_sub(1, Ordering::Relaxed);
    debug!("Worker {} stopped", worker_id);
}

/// Mark a crashed pipeline's submission Failed with a SystemError verdict
async fn fail_after_crash(deps: &WorkerDeps, id: SubmissionId) {
    let Some(mut submission) = deps.registry.get(id).await else {
        return;
    };
    if submission.status.is_terminal() {
        return;
    }
    let total = submission.test_results.len();
    let verdict = Verdict::aborted(
        VerdictKind::SystemError,
        total,
        Some("internal judge fault".into()),
    );
    finalize(deps, &mut submission, verdict).await;
}

/// Drive one submission through the full pipeline
async fn process_submission(deps: Arc<WorkerDeps>, mut submission: Submission) {
    let id = submission.id;
    let user_id = submission.user_id.clone();
    let token = deps
        .registry
        .token(id)
        .await
        .unwrap_or_else(CancellationToken::new);

    // Cancelled while still queued
    if token.is_cancelled() {
        finalize_cancelled(&deps, &mut submission).await;
        return;
    }

    if set_status(&deps, &mut submission, SubmissionStatus::Running)
        .await
        .is_err()
    {
        return;
    }

    // Router: classify and pick the execution path
    let analysis = strategy::analyze(&submission.code, &submission.language);
    let load = deps
        .load
        .snapshot(deps.queue.depth().await, deps.config.max_workers);
    let strategy = strategy::select_strategy(&analysis, &load);
    debug!(
        "Submission {}: strategy {} ({})",
        id, strategy.kind, strategy.rationale
    );
    submission.attach_strategy(strategy.clone());
    deps.registry.update(&submission).await;

    let test_cases = match deps.tests.test_cases(&submission.problem_id).await {
        Ok(cases) => cases,
        Err(e) => {
            let verdict = Verdict::aborted(
                VerdictKind::SystemError,
                0,
                Some(format!("failed to load test cases: {:#}", e)),
            );
            finalize(&deps, &mut submission, verdict).await;
            return;
        }
    };

    // Validated at intake; defends against a config reload dropping the language
    let Some(language) = languages::get_language_config(&submission.language) else {
        let verdict = Verdict::aborted(
            VerdictKind::SystemError,
            test_cases.len(),
            Some(format!("language no longer configured: {}", submission.language)),
        );
        finalize(&deps, &mut submission, verdict).await;
        return;
    };

    // Stage the source into a scratch work dir
    let work_dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            let verdict = Verdict::aborted(
                VerdictKind::SystemError,
                test_cases.len(),
                Some(format!("failed to create work dir: {}", e)),
            );
            finalize(&deps, &mut submission, verdict).await;
            return;
        }
    };
    if let Err(e) =
        tokio::fs::write(work_dir.path().join(&language.source_file), &submission.code).await
    {
        let verdict = Verdict::aborted(
            VerdictKind::SystemError,
            test_cases.len(),
            Some(format!("failed to stage source: {}", e)),
        );
        finalize(&deps, &mut submission, verdict).await;
        return;
    }

    let ctx = RunContext {
        submission_id: id,
        user_id: user_id.clone(),
    };

    // Acquire a sandbox; cancellable while we wait
    let mut sandbox = tokio::select! {
        _ = token.cancelled() => {
            finalize_cancelled(&deps, &mut submission).await;
            return;
        }
        acquired = deps.orchestrator.acquire(&submission.language, strategy.kind) => {
            match acquired {
                Ok(sandbox) => sandbox,
                Err(e) => {
                    warn!("Sandbox acquisition failed for {}: {:#}", id, e);
                    let verdict = Verdict::aborted(
                        VerdictKind::SystemError,
                        test_cases.len(),
                        Some(format!("{:#}", e)),
                    );
                    finalize(&deps, &mut submission, verdict).await;
                    return;
                }
            }
        }
    };

    // Compile step for compiled languages; cancellable, diagnostics verbatim
    if language.requires_compilation() {
        if let Some(compile_cmd) = language.compile_command.clone() {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    deps.orchestrator.release(sandbox, false).await;
                    finalize_cancelled(&deps, &mut submission).await;
                    return;
                }
                compiled = deps.orchestrator.compile(&mut sandbox, &ctx, work_dir.path(), &compile_cmd) => compiled,
            };
            match outcome {
                Ok(result) if result.success => {}
                Ok(result) => {
                    let verdict = Verdict::aborted(
                        VerdictKind::CompilationError,
                        test_cases.len(),
                        result.diagnostics,
                    );
                    deps.orchestrator
                        .release(sandbox, reusable(&strategy, false))
                        .await;
                    finalize(&deps, &mut submission, verdict).await;
                    return;
                }
                Err(e) => {
                    let verdict = Verdict::aborted(
                        VerdictKind::SystemError,
                        test_cases.len(),
                        Some(format!("{:#}", e)),
                    );
                    deps.orchestrator.release(sandbox, false).await;
                    finalize(&deps, &mut submission, verdict).await;
                    return;
                }
            }
        }
    }

    // Enter Judging unless cancellation won the race; serialized with the
    // cancel path through the registry lock
    match deps.registry.enter_judging(&mut submission).await {
        Ok(true) => {}
        Ok(false) => {
            deps.orchestrator.release(sandbox, false).await;
            finalize_cancelled(&deps, &mut submission).await;
            return;
        }
        Err(e) => {
            warn!("Failed to enter judging for {}: {:#}", id, e);
            deps.orchestrator.release(sandbox, false).await;
            return;
        }
    }
    deps.events.push(UpdateEvent::status(
        id,
        &user_id,
        SubmissionStatus::Judging,
    ));

    let options = deps.config.judge_options();
    let outcome = {
        let mut runner = SandboxCaseRunner {
            orchestrator: deps.orchestrator.as_ref(),
            sandbox: &mut sandbox,
            ctx: &ctx,
            work_dir: work_dir.path(),
            language: &language,
        };
        let mut observer = ProgressMirror {
            registry: deps.registry.as_ref(),
            events: deps.events.as_ref(),
            submission: &mut submission,
        };
        judge::evaluate(&mut runner, &test_cases, &options, &token, &mut observer).await
    };

    match outcome {
        Ok(JudgeOutcome::Finished { verdict, results }) => {
            submission.test_results = results;
            let violated = verdict.status == VerdictKind::SecurityViolation;
            deps.orchestrator
                .release(sandbox, reusable(&strategy, violated))
                .await;
            finalize(&deps, &mut submission, verdict).await;
        }
        Ok(JudgeOutcome::Cancelled { results }) => {
            submission.test_results = results;
            deps.orchestrator.release(sandbox, false).await;
            finalize_cancelled(&deps, &mut submission).await;
        }
        Err(e) => {
            warn!("Judging failed for {}: {:#}", id, e);
            let verdict = Verdict::aborted(
                VerdictKind::SystemError,
                test_cases.len(),
                Some(format!("{:#}", e)),
            );
            deps.orchestrator.release(sandbox, false).await;
            finalize(&deps, &mut submission, verdict).await;
        }
    }
}

/// Warm-pool eligibility: hybrid strategy, and never after a violation
fn reusable(strategy: &ExecutionStrategy, violated: bool) -> bool {
    strategy.kind == StrategyKind::Hybrid && !violated
}

/// Mirrors each judged case into the registry and the event stream, so a
/// status poll during `Judging` sees the results accumulated so far
struct ProgressMirror<'a> {
    registry: &'a Registry,
    events: &'a dyn EventSink,
    submission: &'a mut Submission,
}

#[async_trait]
impl CaseObserver for ProgressMirror<'_> {
    async fn case_judged(&mut self, index: usize, result: &TestCaseResult) {
        self.submission.test_results.push(result.clone());
        self.registry.update(self.submission).await;

        let mut event = UpdateEvent::status(
            self.submission.id,
            &self.submission.user_id,
            SubmissionStatus::Judging,
        );
        event.current_test_index = Some(index);
        event.test_result = Some(result.clone());
        self.events.push(event);
    }
}

/// Runs one test case through the held sandbox under per-case limits
struct SandboxCaseRunner<'a> {
    orchestrator: &'a Orchestrator,
    sandbox: &'a mut Sandbox,
    ctx: &'a RunContext,
    work_dir: &'a Path,
    language: &'a LanguageConfig,
}

#[async_trait]
impl CaseRunner for SandboxCaseRunner<'_> {
    async fn run_case(&mut self, _index: usize, test_case: &TestCase) -> anyhow::Result<RawResult> {
        let limits = ResourceLimits {
            time_limit_ms: self.language.calculate_time_limit(test_case.time_limit_ms),
            memory_limit_bytes: self
                .language
                .calculate_memory_limit(test_case.memory_limit_bytes),
            ..self.sandbox.profile.limits
        };
        self.orchestrator
            .run(
                self.sandbox,
                self.ctx,
                self.work_dir,
                &self.language.run_command,
                limits,
                Some(test_case.input.clone()),
            )
            .await
    }
}

async fn set_status(
    deps: &WorkerDeps,
    submission: &mut Submission,
    status: SubmissionStatus,
) -> anyhow::Result<()> {
    submission.transition_to(status)?;
    deps.registry.update(submission).await;
    deps.events.push(UpdateEvent::status(
        submission.id,
        &submission.user_id,
        status,
    ));
    Ok(())
}

/// Terminal path: attach the verdict, persist, emit the completion event
async fn finalize(deps: &WorkerDeps, submission: &mut Submission, verdict: Verdict) {
    if let Err(e) = submission.finish(verdict) {
        error!("Failed to finalize {}: {:#}", submission.id, e);
        return;
    }
    deps.registry.update(submission).await;

    let mut event = UpdateEvent::status(submission.id, &submission.user_id, submission.status);
    event.verdict = submission.verdict.clone();
    event.test_results = Some(submission.test_results.clone());
    deps.events.push(event);

    // Custom tests never touch submission history; their registry entry goes
    // with them, the completion event is the last word
    if submission.is_custom_test {
        deps.registry.forget(submission.id).await;
    } else if let Err(e) = deps.store.persist_terminal(submission).await {
        error!("Failed to persist {}: {:#}", submission.id, e);
    }
    info!(
        "Submission {} finished: {} ({})",
        submission.id,
        submission.status,
        submission
            .verdict
            .as_ref()
            .map(|v| v.status.to_string())
            .unwrap_or_default()
    );
}

async fn finalize_cancelled(deps: &WorkerDeps, submission: &mut Submission) {
    if let Err(e) = submission.transition_to(SubmissionStatus::Cancelled) {
        error!("Failed to cancel {}: {:#}", submission.id, e);
        return;
    }
    deps.registry.update(submission).await;
    deps.events.push(UpdateEvent::status(
        submission.id,
        &submission.user_id,
        SubmissionStatus::Cancelled,
    ));
    if submission.is_custom_test {
        deps.registry.forget(submission.id).await;
    } else if let Err(e) = deps.store.persist_terminal(submission).await {
        error!("Failed to persist cancelled {}: {:#}", submission.id, e);
    }
    info!("Submission {} cancelled", submission.id);
}
