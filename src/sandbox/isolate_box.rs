//! Isolate-backed execution backend
//!
//! Wraps the isolate(1) sandbox: Linux namespaces for process and network
//! isolation, a read-only root with a writable quota'd box directory, cgroup
//! memory/CPU accounting and a seccomp allowlist rendered per language.
//! Box IDs cycle within 0-999; isolate itself supports 0-9999.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use super::meta::{parse_meta, IsolateStatus};
use super::profile::IsolationProfile;
use super::{BoxHandle, Executor, ExecRequest, RawResult, RunStatus, ViolationType};

const BOX_ID_RANGE: u32 = 1000;

/// Execution backend that shells out to isolate(1)
pub struct IsolateExecutor {
    next_box_id: AtomicU32,
}

impl IsolateExecutor {
    pub fn new() -> Self {
        Self {
            next_box_id: AtomicU32::new(0),
        }
    }

    /// Verify that isolate with cgroup support is usable; fail fast otherwise
    pub async fn ensure_available() -> Result<()> {
        let test_result = Command::new("isolate")
            .args(["--box-id", "999", "--cg", "--init"])
            .output()
            .await;

        let _ = Command::new("isolate")
            .args(["--box-id", "999", "--cleanup"])
            .output()
            .await;

        match test_result {
            Ok(r) if r.status.success() => Ok(()),
            Ok(r) => anyhow::bail!(
                "isolate cgroup support unavailable: {}",
                String::from_utf8_lossy(&r.stderr)
            ),
            Err(e) => anyhow::bail!("isolate binary not found: {}", e),
        }
    }

    fn policy_path(box_id: u32) -> String {
        format!("/tmp/arbiter_policy_{}.txt", box_id)
    }

    fn meta_path(box_id: u32) -> String {
        format!("/tmp/arbiter_meta_{}.txt", box_id)
    }
}

impl Default for IsolateExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for IsolateExecutor {
    async fn provision(
        &self,
        language: &str,
        profile: &IsolationProfile,
    ) -> Result<BoxHandle> {
        let box_id = self.next_box_id.fetch_add(1, Ordering::Relaxed) % BOX_ID_RANGE;

        // Clean up any leftover box with this id
        let _ = Command::new("isolate")
            .args(["--box-id", &box_id.to_string(), "--cleanup"])
            .output()
            .await;

        let output = Command::new("isolate")
            .args(["--box-id", &box_id.to_string(), "--cg", "--init"])
            .output()
            .await
            .context("Failed to run isolate --init")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to initialize isolate box {}: {}", box_id, stderr);
        }

        let box_path = String::from_utf8_lossy(&output.stdout).trim().to_string();

        // Render the per-language syscall allowlist for the runner
        if !profile.allowed_syscalls.is_empty() {
            let policy = profile.allowed_syscalls.join("\n");
            fs::write(Self::policy_path(box_id), policy)
                .await
                .context("Failed to write syscall policy file")?;
        }

        info!(
            "Provisioned isolate box {} for {} at {}",
            box_id, language, box_path
        );

        Ok(BoxHandle {
            box_id,
            root: box_path.into(),
        })
    }

    async fn execute(
        &self,
        handle: &BoxHandle,
        profile: &IsolationProfile,
        req: ExecRequest,
    ) -> Result<RawResult> {
        let box_id = handle.box_id;
        let work_dir = format!("{}/box", handle.root.display());
        let meta_file = Self::meta_path(box_id);

        // Wipe anything a previous run left behind, then copy program files
        // in. Reused boxes must never expose another submission's files.
        clear_dir(Path::new(&work_dir)).await?;
        copy_dir_contents(&req.work_dir, Path::new(&work_dir)).await?;

        let time_limit_secs = (req.limits.time_limit_ms as f64) / 1000.0;
        let wall_time_secs = time_limit_secs * 2.0 + 1.0;
        let memory_limit_kb = req.limits.memory_limit_bytes / 1024;
        let fsize_kb = profile.fs.scratch_quota_bytes / 1024;

        let mut args = vec![
            "--box-id".to_string(),
            box_id.to_string(),
            // Cgroup mode also carries the CPU share configured for the box
            "--cg".to_string(),
            format!("--cg-mem={}", memory_limit_kb),
            format!("--time={}", time_limit_secs),
            format!("--wall-time={}", wall_time_secs),
            format!("--meta={}", meta_file),
            "--stdout=stdout.txt".to_string(),
            "--stderr=stderr.txt".to_string(),
            format!("--processes={}", req.limits.pids_limit),
            format!("--open-files={}", profile.fs.open_files),
            format!("--fsize={}", fsize_kb),
            // Mount directories needed for the runtimes; root stays read-only,
            // only /box is writable. Network is denied: no --share-net.
            "--dir=/usr".to_string(),
            "--dir=/lib".to_string(),
            "--dir=/lib64".to_string(),
            "--dir=/etc:noexec".to_string(),
            "--env=PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
            "--env=HOME=/box".to_string(),
        ];

        if !profile.allowed_syscalls.is_empty() {
            args.push(format!("--seccomp={}", Self::policy_path(box_id)));
        }

        if let Some(stdin) = &req.stdin {
            let dest = format!("{}/stdin.txt", work_dir);
            fs::write(&dest, stdin).await?;
            args.push("--stdin=stdin.txt".to_string());
        }

        args.push("--run".to_string());
        args.push("--".to_string());

        // Prepend /usr/bin/ to the command if it's not an absolute or relative path
        let mut cmd_iter = req.command.iter();
        if let Some(cmd) = cmd_iter.next() {
            if cmd.starts_with('/') || cmd.starts_with("./") {
                args.push(cmd.clone());
            } else {
                args.push(format!("/usr/bin/{}", cmd));
            }
            args.extend(cmd_iter.cloned());
        }

        debug!("Running isolate with args: {:?}", args);

        // kill_on_drop: a cancelled run must not leave the runner alive
        let _output = Command::new("isolate")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run isolate")?;

        let meta_content = fs::read_to_string(&meta_file).await.unwrap_or_default();
        let meta = parse_meta(&meta_content);
        let _ = fs::remove_file(&meta_file).await;

        let stdout = fs::read_to_string(format!("{}/stdout.txt", work_dir))
            .await
            .unwrap_or_default();
        let stderr = fs::read_to_string(format!("{}/stderr.txt", work_dir))
            .await
            .unwrap_or_default();

        // Copy compile artifacts back so later runs can reuse them
        if req.copy_out {
            copy_out_new_files(Path::new(&work_dir), &req.work_dir).await?;
        }

        let status = interpret_status(&meta, req.limits.memory_limit_bytes);

        Ok(RawResult {
            status,
            exit_code: meta.exit_code,
            time_ms: meta.time_ms,
            wall_time_ms: meta.wall_time_ms,
            memory_bytes: meta.memory_kb * 1024,
            syscall_count: meta.syscall_count,
            stdout,
            stderr,
        })
    }

    async fn destroy(&self, handle: &BoxHandle) -> Result<()> {
        Command::new("isolate")
            .args(["--box-id", &handle.box_id.to_string(), "--cleanup"])
            .output()
            .await
            .context("Failed to run isolate --cleanup")?;
        let _ = fs::remove_file(Self::policy_path(handle.box_id)).await;
        info!("Destroyed isolate box {}", handle.box_id);
        Ok(())
    }
}

/// Map the parsed meta record onto a run status, detecting policy breaches
fn interpret_status(meta: &super::meta::IsolateMeta, memory_limit_bytes: u64) -> RunStatus {
    let sigsys = Signal::SIGSYS as i32;
    let sigxfsz = Signal::SIGXFSZ as i32;
    let sigkill = Signal::SIGKILL as i32;

    let status = match meta.status {
        IsolateStatus::TimeOut => RunStatus::TimeLimitExceeded,
        IsolateStatus::Signal(sig) if sig == sigsys => {
            RunStatus::Violation(ViolationType::BlockedSyscall)
        }
        IsolateStatus::Signal(sig) if sig == sigxfsz => {
            RunStatus::Violation(ViolationType::ScratchQuota)
        }
        IsolateStatus::Signal(sig) if sig == sigkill && meta.oom_killed => {
            RunStatus::MemoryLimitExceeded
        }
        IsolateStatus::Signal(sig) => RunStatus::Signaled(sig),
        IsolateStatus::RuntimeError => {
            RunStatus::Exited(if meta.exit_code == 0 { 1 } else { meta.exit_code })
        }
        IsolateStatus::InternalError => RunStatus::SystemError,
        IsolateStatus::Ok => RunStatus::Exited(meta.exit_code),
    };

    // Memory breach can surface as a clean-looking exit when the allocator
    // failed gracefully; the peak measurement is authoritative.
    if meta.memory_kb * 1024 > memory_limit_bytes
        && !matches!(status, RunStatus::Violation(_) | RunStatus::SystemError)
    {
        return RunStatus::MemoryLimitExceeded;
    }

    status
}

async fn copy_dir_contents(source_dir: &Path, dest_dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(source_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_dir() {
            continue;
        }
        let dest = dest_dir.join(entry.file_name());
        fs::copy(entry.path(), &dest).await?;
    }
    Ok(())
}

async fn clear_dir(dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_dir() {
            fs::remove_dir_all(entry.path()).await?;
        } else {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

/// Copy files that appeared or changed in the box back into the work dir,
/// skipping I/O plumbing files and directories (e.g., __pycache__)
async fn copy_out_new_files(box_dir: &Path, work_dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(box_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if matches!(name_str.as_ref(), "stdin.txt" | "stdout.txt" | "stderr.txt") {
            continue;
        }
        let dest = work_dir.join(&name);
        let newer = match dest.metadata() {
            Ok(dest_meta) => metadata.modified()? > dest_meta.modified()?,
            Err(_) => true,
        };
        if newer {
            fs::copy(entry.path(), &dest).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::meta::IsolateMeta;

    fn meta(status: IsolateStatus) -> IsolateMeta {
        IsolateMeta {
            status,
            exit_code: 0,
            time_ms: 10,
            wall_time_ms: 12,
            memory_kb: 1024,
            oom_killed: false,
            syscall_count: 0,
        }
    }

    #[test]
    fn test_sigsys_is_syscall_violation() {
        let m = meta(IsolateStatus::Signal(Signal::SIGSYS as i32));
        assert_eq!(
            interpret_status(&m, u64::MAX),
            RunStatus::Violation(ViolationType::BlockedSyscall)
        );
    }

    #[test]
    fn test_oom_kill_is_mle() {
        let mut m = meta(IsolateStatus::Signal(Signal::SIGKILL as i32));
        m.oom_killed = true;
        assert_eq!(interpret_status(&m, u64::MAX), RunStatus::MemoryLimitExceeded);
    }

    #[test]
    fn test_plain_kill_is_signal() {
        let m = meta(IsolateStatus::Signal(Signal::SIGKILL as i32));
        assert_eq!(
            interpret_status(&m, u64::MAX),
            RunStatus::Signaled(Signal::SIGKILL as i32)
        );
    }

    #[test]
    fn test_peak_memory_overrides_clean_exit() {
        let m = meta(IsolateStatus::Ok);
        // 1024 KB peak against a 512 KB limit
        assert_eq!(
            interpret_status(&m, 512 * 1024),
            RunStatus::MemoryLimitExceeded
        );
    }

    #[test]
    fn test_runtime_error_never_reports_exit_zero() {
        let m = meta(IsolateStatus::RuntimeError);
        assert_eq!(interpret_status(&m, u64::MAX), RunStatus::Exited(1));
    }
}
