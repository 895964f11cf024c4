//! Verdict types shared across the judge pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome kind for a single test case or a whole submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Accepted,
    WrongAnswer,
    CompilationError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    SecurityViolation,
    RuntimeError,
    SystemError,
    Skipped,
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictKind::Accepted => "accepted",
            VerdictKind::WrongAnswer => "wrong_answer",
            VerdictKind::CompilationError => "compilation_error",
            VerdictKind::TimeLimitExceeded => "time_limit_exceeded",
            VerdictKind::MemoryLimitExceeded => "memory_limit_exceeded",
            VerdictKind::SecurityViolation => "security_violation",
            VerdictKind::RuntimeError => "runtime_error",
            VerdictKind::SystemError => "system_error",
            VerdictKind::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate verdict over all executed test cases of a submission.
///
/// Computed once by the judge engine and attached terminally to the
/// submission; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictKind,
    pub passed_tests: usize,
    pub total_tests: usize,
    /// Maximum CPU time across all cases actually run
    pub max_time_ms: u32,
    /// Maximum peak memory across all cases actually run
    pub max_memory_bytes: u64,
    /// 1-based index of the first failing test case
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_test_case: Option<usize>,
    /// Compiler diagnostics / runtime error / system error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Verdict {
    /// Verdict for a submission that never got to run any test case
    /// (compilation failure, provisioning failure, internal fault).
    pub fn aborted(status: VerdictKind, total_tests: usize, error_message: Option<String>) -> Self {
        Self {
            status,
            passed_tests: 0,
            total_tests,
            max_time_ms: 0,
            max_memory_bytes: 0,
            failed_test_case: None,
            error_message,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == VerdictKind::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_kind_display() {
        assert_eq!(VerdictKind::Accepted.to_string(), "accepted");
        assert_eq!(
            VerdictKind::TimeLimitExceeded.to_string(),
            "time_limit_exceeded"
        );
        assert_eq!(
            VerdictKind::SecurityViolation.to_string(),
            "security_violation"
        );
    }

    #[test]
    fn test_aborted_verdict_has_no_failed_case() {
        let v = Verdict::aborted(VerdictKind::CompilationError, 3, Some("boom".into()));
        assert_eq!(v.passed_tests, 0);
        assert_eq!(v.total_tests, 3);
        assert!(v.failed_test_case.is_none());
        assert!(!v.is_accepted());
    }
}
