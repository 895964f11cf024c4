//! Execution orchestrator - sandbox lifecycle owner
//!
//! Owns provisioning, warm-pool reuse, resource enforcement and teardown.
//! Every run is raced against a hard wall-clock deadline; any detected policy
//! breach destroys the sandbox immediately and emits an audit record. The
//! orchestrator interprets nothing about correctness - that is the judge's
//! job.

pub mod pool;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{AuditSink, MetricsSink, ResourceMetrics, SecurityViolation};
use crate::languages;
use crate::sandbox::{
    ExecRequest, Executor, IsolationProfile, RawResult, ResourceLimits, RunStatus, Sandbox,
    SandboxStatus, ViolationType,
};
use crate::strategy::StrategyKind;
use crate::submission::SubmissionId;

pub use pool::WarmPool;

/// Orchestrator tuning knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Provisioning attempts before surfacing a system error
    pub provision_max_attempts: u32,
    /// Base delay for exponential provisioning backoff
    pub provision_backoff_base_ms: u64,
    /// Idle sandboxes are destroyed after this long in the warm pool
    pub sandbox_idle_ttl: Duration,
    pub reaper_interval: Duration,
    /// Compile step budget, separate from per-test limits
    pub compile_time_limit_ms: u32,
    pub compile_memory_limit_bytes: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provision_max_attempts: 4,
            provision_backoff_base_ms: 100,
            sandbox_idle_ttl: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(30),
            compile_time_limit_ms: 30_000,
            compile_memory_limit_bytes: 2048 * 1024 * 1024,
        }
    }
}

/// Identity of the submission a run belongs to, for metrics and audit
#[derive(Debug, Clone)]
pub struct RunContext {
    pub submission_id: SubmissionId,
    pub user_id: String,
}

/// Result of a compile step
#[derive(Debug)]
pub struct CompileOutcome {
    pub success: bool,
    /// Raw compiler diagnostics, unmodified
    pub diagnostics: Option<String>,
}

pub struct Orchestrator {
    executor: Arc<dyn Executor>,
    pool: WarmPool,
    metrics: Arc<dyn MetricsSink>,
    audit: Arc<dyn AuditSink>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn Executor>,
        metrics: Arc<dyn MetricsSink>,
        audit: Arc<dyn AuditSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let pool = WarmPool::new(config.sandbox_idle_ttl);
        Self {
            executor,
            pool,
            metrics,
            audit,
            config,
        }
    }

    /// Background task destroying warm sandboxes past their idle TTL
    pub fn spawn_idle_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(orchestrator.config.reaper_interval).await;
                let expired = orchestrator.pool.evict_expired().await;
                for sandbox in expired {
                    debug!("Reaping idle sandbox {} ({})", sandbox.id, sandbox.language);
                    orchestrator.destroy(sandbox).await;
                }
            }
        })
    }

    /// Draw an idle sandbox for the language from the warm pool, or provision
    /// a new one. Provisioning failures are retried with exponential backoff;
    /// exhausting the attempts surfaces an error the worker turns into a
    /// `SystemError` verdict.
    pub async fn acquire(&self, language: &str, _strategy: StrategyKind) -> Result<Sandbox> {
        if let Some(sandbox) = self.pool.checkout(language).await {
            return Ok(sandbox);
        }

        let lang_config = languages::get_language_config(language)
            .with_context(|| format!("Unsupported language: {}", language))?;
        let profile = IsolationProfile::for_language(&lang_config);

        let mut attempt = 0;
        loop {
            match self.executor.provision(language, &profile).await {
                Ok(handle) => {
                    return Ok(Sandbox::new(language.to_string(), profile, handle));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.provision_max_attempts {
                        return Err(e).with_context(|| {
                            format!(
                                "Sandbox provisioning exhausted {} attempts for {}",
                                attempt, language
                            )
                        });
                    }
                    let backoff = self.config.provision_backoff_base_ms << (attempt - 1);
                    warn!(
                        "Provisioning attempt {} for {} failed: {}. Retrying in {}ms",
                        attempt, language, e, backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    /// Run a command inside the sandbox under the given limits.
    ///
    /// Races three outcomes: normal completion, wall-clock timeout and
    /// resource breach. A breach destroys the sandbox and emits the audit
    /// record; the caller still gets a `RawResult` describing what happened.
    pub async fn run(
        &self,
        sandbox: &mut Sandbox,
        ctx: &RunContext,
        work_dir: &Path,
        command: &[String],
        limits: ResourceLimits,
        stdin: Option<String>,
    ) -> Result<RawResult> {
        let req = ExecRequest {
            work_dir: work_dir.to_path_buf(),
            command: command.to_vec(),
            limits,
            stdin,
            copy_out: false,
        };
        self.run_inner(sandbox, ctx, req).await
    }

    /// Compile inside the sandbox with the dedicated compile budget,
    /// copying artifacts back into the work dir on success.
    pub async fn compile(
        &self,
        sandbox: &mut Sandbox,
        ctx: &RunContext,
        work_dir: &Path,
        compile_cmd: &[String],
    ) -> Result<CompileOutcome> {
        let limits = ResourceLimits {
            time_limit_ms: self.config.compile_time_limit_ms,
            memory_limit_bytes: self.config.compile_memory_limit_bytes,
            // Compilers fork liberally
            pids_limit: 128,
            ..sandbox.profile.limits
        };
        let req = ExecRequest {
            work_dir: work_dir.to_path_buf(),
            command: compile_cmd.to_vec(),
            limits,
            stdin: None,
            copy_out: true,
        };
        let result = self.run_inner(sandbox, ctx, req).await?;

        if result.status.is_success() {
            return Ok(CompileOutcome {
                success: true,
                diagnostics: None,
            });
        }

        // Surface the raw diagnostic text, falling back to a status message
        let diagnostics = if !result.stderr.is_empty() {
            result.stderr
        } else if !result.stdout.is_empty() {
            result.stdout
        } else {
            match result.status {
                RunStatus::TimeLimitExceeded => "Compilation timed out".to_string(),
                RunStatus::Signaled(_) => "Compiler crashed".to_string(),
                _ => format!("Compilation failed with exit code {}", result.exit_code),
            }
        };

        Ok(CompileOutcome {
            success: false,
            diagnostics: Some(diagnostics),
        })
    }

    async fn run_inner(
        &self,
        sandbox: &mut Sandbox,
        ctx: &RunContext,
        req: ExecRequest,
    ) -> Result<RawResult> {
        // The backend enforces CPU time itself; the outer race is the
        // wall-clock backstop in case the backend wedges.
        let wall_budget = Duration::from_millis(req.limits.time_limit_ms as u64 * 2 + 1500);
        let started = Instant::now();

        let handle = sandbox.handle.clone();
        let profile = sandbox.profile.clone();
        let outcome =
            tokio::time::timeout(wall_budget, self.executor.execute(&handle, &profile, req)).await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Sandbox execution failed for {}: {:#}", ctx.submission_id, e);
                RawResult::system_error(format!("{:#}", e))
            }
            Err(_) => {
                // Backend never came back: force teardown and report TLE
                warn!(
                    "Wall-clock backstop hit for {} after {:?}; destroying sandbox {}",
                    ctx.submission_id, wall_budget, sandbox.id
                );
                self.terminate(sandbox).await;
                let mut r = RawResult::system_error("wall clock budget exhausted");
                r.status = RunStatus::TimeLimitExceeded;
                r.wall_time_ms = started.elapsed().as_millis() as u32;
                return Ok(r);
            }
        };

        sandbox.record_execution();

        self.metrics.record(ResourceMetrics {
            submission_id: ctx.submission_id,
            cpu_time_ms: result.time_ms,
            wall_time_ms: result.wall_time_ms,
            peak_memory_bytes: result.memory_bytes,
            syscall_count: result.syscall_count,
        });

        if let Some(violation_type) = result.status.violation() {
            // Breach: audit and tear the box down right now, never reuse it
            self.audit.record(SecurityViolation::new(
                ctx.submission_id,
                &ctx.user_id,
                violation_type,
                attempted_action(violation_type),
            ));
            self.terminate(sandbox).await;
        }

        Ok(result)
    }

    /// Return the sandbox to the warm pool, or destroy it when the strategy
    /// forbids reuse or a breach already terminated it.
    pub async fn release(&self, sandbox: Sandbox, reusable: bool) {
        if sandbox.status == SandboxStatus::Terminated {
            // Backend teardown already happened at breach time
            return;
        }
        if reusable {
            self.pool.park(sandbox).await;
        } else {
            self.destroy(sandbox).await;
        }
    }

    /// Destroy everything idling in the warm pool
    pub async fn shutdown(&self) {
        for sandbox in self.pool.drain().await {
            self.destroy(sandbox).await;
        }
        info!("Warm pool drained");
    }

    pub async fn idle_sandboxes(&self) -> usize {
        self.pool.idle_count().await
    }

    /// Unconditional backend teardown for a sandbox we still own mutably
    async fn terminate(&self, sandbox: &mut Sandbox) {
        if sandbox.status == SandboxStatus::Terminated {
            return;
        }
        sandbox.mark_terminated();
        if let Err(e) = self.executor.destroy(&sandbox.handle).await {
            warn!("Failed to destroy sandbox {}: {:#}", sandbox.id, e);
        }
    }

    async fn destroy(&self, mut sandbox: Sandbox) {
        self.terminate(&mut sandbox).await;
    }
}

fn attempted_action(violation_type: ViolationType) -> &'static str {
    match violation_type {
        ViolationType::BlockedSyscall => "syscall outside the language allowlist",
        ViolationType::ProcessLimit => "process creation beyond the pid ceiling",
        ViolationType::ScratchQuota => "write beyond the scratch quota",
        ViolationType::NetworkAccess => "outbound network access",
    }
}
