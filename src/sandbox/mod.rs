//! Sandbox module - disposable isolated execution environments
//!
//! This module defines:
//! - The `Executor` trait: provision / execute / destroy for one box backend
//! - `Sandbox`: the lifecycle handle the orchestrator tracks (status, age,
//!   execution count)
//! - `RawResult`: the uninterpreted outcome of one run
//!
//! The sandbox module does NOT:
//! - Interpret verdicts (that's the judge's job)
//! - Know about languages or compilation
//! - Compare outputs

pub mod isolate_box;
pub mod meta;
pub mod profile;

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use isolate_box::IsolateExecutor;
pub use meta::{parse_meta, IsolateMeta, IsolateStatus};
pub use profile::{FilesystemPolicy, IsolationProfile, ResourceLimits};

/// Kind of isolation policy breach detected during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    /// A syscall outside the allowlist was attempted
    BlockedSyscall,
    /// The PID ceiling was hit
    ProcessLimit,
    /// The writable scratch quota was exceeded
    ScratchQuota,
    /// Outbound connectivity was attempted
    NetworkAccess,
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationType::BlockedSyscall => "blocked_syscall",
            ViolationType::ProcessLimit => "process_limit",
            ViolationType::ScratchQuota => "scratch_quota",
            ViolationType::NetworkAccess => "network_access",
        };
        write!(f, "{}", s)
    }
}

/// Raw execution status, no verdict interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Program exited normally with the given exit code
    Exited(i32),
    TimeLimitExceeded,
    MemoryLimitExceeded,
    /// Isolation policy breach; the box must be destroyed
    Violation(ViolationType),
    /// Killed by a signal that is not a policy breach
    Signaled(i32),
    /// The sandbox infrastructure itself failed
    SystemError,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }

    pub fn violation(&self) -> Option<ViolationType> {
        match self {
            RunStatus::Violation(v) => Some(*v),
            _ => None,
        }
    }
}

/// Uninterpreted outcome of one run inside a sandbox
#[derive(Debug, Clone)]
pub struct RawResult {
    pub status: RunStatus,
    pub exit_code: i32,
    /// CPU time used
    pub time_ms: u32,
    /// Wall-clock time used
    pub wall_time_ms: u32,
    /// Peak memory (best-effort: cgroup peak or max RSS)
    pub memory_bytes: u64,
    /// Syscall count when the backend reports it, 0 otherwise
    pub syscall_count: u64,
    pub stdout: String,
    pub stderr: String,
}

impl RawResult {
    /// Result for a run that never produced a meta record
    pub fn system_error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::SystemError,
            exit_code: -1,
            time_ms: 0,
            wall_time_ms: 0,
            memory_bytes: 0,
            syscall_count: 0,
            stdout: String::new(),
            stderr: message.into(),
        }
    }
}

/// Backend-specific handle for one provisioned box
#[derive(Debug, Clone)]
pub struct BoxHandle {
    pub box_id: u32,
    /// Backend root directory for the box, if filesystem-backed
    pub root: PathBuf,
}

/// One execution request against a provisioned box
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Directory whose contents are copied into the box before running
    pub work_dir: PathBuf,
    pub command: Vec<String>,
    pub limits: ResourceLimits,
    pub stdin: Option<String>,
    /// Copy new/modified files back out after the run (compile artifacts)
    pub copy_out: bool,
}

/// Execution backend seam: one disposable box per provision call.
///
/// `provision` must configure the full isolation policy from the profile
/// (namespaces, no network, read-only root with quota'd scratch, PID ceiling,
/// syscall allowlist). `destroy` must tear a box down unconditionally,
/// regardless of its internal state.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn provision(
        &self,
        language: &str,
        profile: &IsolationProfile,
    ) -> anyhow::Result<BoxHandle>;

    async fn execute(
        &self,
        handle: &BoxHandle,
        profile: &IsolationProfile,
        req: ExecRequest,
    ) -> anyhow::Result<RawResult>;

    async fn destroy(&self, handle: &BoxHandle) -> anyhow::Result<()>;
}

/// Sandbox lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Idle,
    Busy,
    Terminated,
}

/// One disposable execution environment, tracked by the orchestrator.
///
/// Exclusively owned by at most one worker while `Busy`; owned by the warm
/// pool while `Idle`.
#[derive(Debug)]
pub struct Sandbox {
    pub id: Uuid,
    pub language: String,
    pub status: SandboxStatus,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub execution_count: u32,
    pub profile: IsolationProfile,
    pub handle: BoxHandle,
}

impl Sandbox {
    pub fn new(language: String, profile: IsolationProfile, handle: BoxHandle) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            language,
            status: SandboxStatus::Busy,
            created_at: now,
            last_used_at: now,
            execution_count: 0,
            profile,
            handle,
        }
    }

    pub fn mark_busy(&mut self) {
        debug_assert_ne!(self.status, SandboxStatus::Terminated);
        self.status = SandboxStatus::Busy;
        self.last_used_at = Instant::now();
    }

    pub fn mark_idle(&mut self) {
        debug_assert_ne!(self.status, SandboxStatus::Terminated);
        self.status = SandboxStatus::Idle;
        self.last_used_at = Instant::now();
    }

    pub fn mark_terminated(&mut self) {
        self.status = SandboxStatus::Terminated;
    }

    pub fn record_execution(&mut self) {
        self.execution_count += 1;
        self.last_used_at = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(
            "python".into(),
            IsolationProfile::default(),
            BoxHandle {
                box_id: 0,
                root: PathBuf::from("/tmp/box0"),
            },
        )
    }

    #[test]
    fn test_new_sandbox_starts_busy() {
        let s = sandbox();
        assert_eq!(s.status, SandboxStatus::Busy);
        assert_eq!(s.execution_count, 0);
    }

    #[test]
    fn test_execution_count_accumulates() {
        let mut s = sandbox();
        s.record_execution();
        s.record_execution();
        assert_eq!(s.execution_count, 2);
    }

    #[test]
    fn test_run_status_success() {
        assert!(RunStatus::Exited(0).is_success());
        assert!(!RunStatus::Exited(1).is_success());
        assert!(!RunStatus::TimeLimitExceeded.is_success());
    }

    #[test]
    fn test_violation_accessor() {
        assert_eq!(
            RunStatus::Violation(ViolationType::BlockedSyscall).violation(),
            Some(ViolationType::BlockedSyscall)
        );
        assert_eq!(RunStatus::Exited(0).violation(), None);
    }
}
