//! Isolate meta-file parsing
//!
//! The box runner writes a key:value meta file describing how the program
//! ended and what it consumed. This module turns that into a typed record;
//! verdict interpretation happens upstream.

/// Raw execution status from the meta file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateStatus {
    /// Program exited on its own
    Ok,
    /// CPU or wall time budget exhausted
    TimeOut,
    /// Killed by the given signal
    Signal(i32),
    /// Non-zero exit reported by the runner
    RuntimeError,
    /// The runner itself failed
    InternalError,
}

/// Parsed meta file contents
#[derive(Debug, Clone)]
pub struct IsolateMeta {
    pub status: IsolateStatus,
    pub exit_code: i32,
    pub time_ms: u32,
    pub wall_time_ms: u32,
    pub memory_kb: u64,
    /// Set when the cgroup OOM killer fired
    pub oom_killed: bool,
    /// Syscall count when the runner reports it, 0 otherwise
    pub syscall_count: u64,
}

impl Default for IsolateMeta {
    fn default() -> Self {
        Self {
            status: IsolateStatus::InternalError,
            exit_code: -1,
            time_ms: 0,
            wall_time_ms: 0,
            memory_kb: 0,
            oom_killed: false,
            syscall_count: 0,
        }
    }
}

/// Parse isolate meta file content into a typed record.
///
/// Unknown keys are ignored; a missing or empty file parses as an internal
/// error so a lost meta file never turns into a clean exit.
pub fn parse_meta(content: &str) -> IsolateMeta {
    let mut status_code = String::new();
    let mut exit_signal: Option<i32> = None;
    let mut meta = IsolateMeta::default();
    let mut saw_any = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        saw_any = true;
        let value = value.trim();

        match key.trim() {
            "time" => {
                if let Ok(t) = value.parse::<f64>() {
                    meta.time_ms = (t * 1000.0) as u32;
                }
            }
            "time-wall" => {
                if let Ok(t) = value.parse::<f64>() {
                    meta.wall_time_ms = (t * 1000.0) as u32;
                }
            }
            // cg-mem with cgroups, max-rss without; take the larger
            "cg-mem" | "max-rss" => {
                if let Ok(m) = value.parse::<u64>() {
                    meta.memory_kb = meta.memory_kb.max(m);
                }
            }
            "cg-oom-killed" => {
                meta.oom_killed = value == "1";
            }
            "status" => {
                status_code = value.to_string();
            }
            "exitcode" => {
                meta.exit_code = value.parse().unwrap_or(0);
            }
            "exitsig" => {
                exit_signal = value.parse().ok();
            }
            "syscalls" => {
                meta.syscall_count = value.parse().unwrap_or(0);
            }
            _ => {}
        }
    }

    meta.status = match status_code.as_str() {
        "TO" => IsolateStatus::TimeOut,
        "SG" => IsolateStatus::Signal(exit_signal.unwrap_or(0)),
        "RE" => IsolateStatus::RuntimeError,
        "XX" => IsolateStatus::InternalError,
        "" if saw_any => IsolateStatus::Ok,
        _ => IsolateStatus::InternalError,
    };

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_exit() {
        let meta = parse_meta("time:0.034\ntime-wall:0.051\nmax-rss:1234\nexitcode:0\n");
        assert_eq!(meta.status, IsolateStatus::Ok);
        assert_eq!(meta.time_ms, 34);
        assert_eq!(meta.wall_time_ms, 51);
        assert_eq!(meta.memory_kb, 1234);
        assert_eq!(meta.exit_code, 0);
    }

    #[test]
    fn test_parse_timeout() {
        let meta = parse_meta("time:2.001\nstatus:TO\nkilled:1\n");
        assert_eq!(meta.status, IsolateStatus::TimeOut);
        assert_eq!(meta.time_ms, 2001);
    }

    #[test]
    fn test_parse_signal() {
        let meta = parse_meta("status:SG\nexitsig:31\ntime:0.010\n");
        assert_eq!(meta.status, IsolateStatus::Signal(31));
    }

    #[test]
    fn test_parse_oom_kill() {
        let meta = parse_meta("status:SG\nexitsig:9\ncg-mem:262200\ncg-oom-killed:1\n");
        assert!(meta.oom_killed);
        assert_eq!(meta.memory_kb, 262200);
    }

    #[test]
    fn test_cg_mem_wins_over_smaller_rss() {
        let meta = parse_meta("max-rss:100\ncg-mem:500\nexitcode:0\n");
        assert_eq!(meta.memory_kb, 500);
    }

    #[test]
    fn test_empty_meta_is_internal_error() {
        let meta = parse_meta("");
        assert_eq!(meta.status, IsolateStatus::InternalError);
    }
}
