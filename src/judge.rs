//! Judge engine - turns raw run outcomes into verdicts
//!
//! Runs the test cases in order through a `CaseRunner`, normalizes and
//! compares output, and aggregates per-case results into one final verdict.
//! The engine knows nothing about sandboxes; the runner hides them.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sandbox::{RawResult, RunStatus};
use crate::submission::{TestCase, TestCaseResult};
use crate::verdict::{Verdict, VerdictKind};

/// Stored program output is capped at this many bytes per test case
pub const OUTPUT_LIMIT_BYTES: usize = 4096;

/// Executes one test case and returns the raw outcome.
///
/// Implementations own the sandbox plumbing; the judge only sees results.
#[async_trait]
pub trait CaseRunner: Send {
    async fn run_case(&mut self, index: usize, test_case: &TestCase) -> anyhow::Result<RawResult>;
}

/// Receives each judged case as soon as its result exists, before the next
/// case starts. Lets callers expose partial progress mid-run.
#[async_trait]
pub trait CaseObserver: Send {
    async fn case_judged(&mut self, index: usize, result: &TestCaseResult);
}

/// No-op observer for callers that only want the final outcome
#[async_trait]
impl CaseObserver for () {
    async fn case_judged(&mut self, _index: usize, _result: &TestCaseResult) {}
}

#[derive(Debug, Clone)]
pub struct JudgeOptions {
    /// Stop at the first failing case; remaining cases are never run
    pub stop_on_first_failure: bool,
    /// Drop blank lines before comparing
    pub collapse_empty_lines: bool,
}

impl Default for JudgeOptions {
    fn default() -> Self {
        Self {
            stop_on_first_failure: true,
            collapse_empty_lines: false,
        }
    }
}

/// Result of one evaluation pass
#[derive(Debug)]
pub enum JudgeOutcome {
    Finished {
        verdict: Verdict,
        results: Vec<TestCaseResult>,
    },
    /// Cancellation observed between cases; no verdict is produced
    Cancelled { results: Vec<TestCaseResult> },
}

/// Judge a submission against its test cases.
///
/// Cases run strictly in order. Cancellation is observed between cases, never
/// mid-case. With `stop_on_first_failure` the cases after the first failure
/// are skipped and produce no result rows; `total_tests` still counts them.
/// A `SystemError` outcome always aborts the pass.
pub async fn evaluate<R: CaseRunner, O: CaseObserver>(
    runner: &mut R,
    test_cases: &[TestCase],
    options: &JudgeOptions,
    cancel: &CancellationToken,
    observer: &mut O,
) -> anyhow::Result<JudgeOutcome> {
    let total = test_cases.len();
    let mut results: Vec<TestCaseResult> = Vec::with_capacity(total);
    let mut passed = 0usize;
    let mut max_time_ms = 0u32;
    let mut max_memory_bytes = 0u64;
    let mut first_failure: Option<(usize, VerdictKind, Option<String>)> = None;

    for (index, test_case) in test_cases.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!("Cancellation observed before test case {}", index + 1);
            return Ok(JudgeOutcome::Cancelled { results });
        }

        let raw = runner.run_case(index, test_case).await?;
        let result = judge_case(&raw, test_case, options);

        max_time_ms = max_time_ms.max(result.execution_time_ms);
        max_memory_bytes = max_memory_bytes.max(result.memory_used_bytes);
        if result.passed {
            passed += 1;
        } else if first_failure.is_none() {
            first_failure = Some((index + 1, result.verdict, result.error.clone()));
        }

        observer.case_judged(index, &result).await;
        let aborting = result.verdict == VerdictKind::SystemError;
        let failed = !result.passed;
        results.push(result);

        if aborting || (failed && options.stop_on_first_failure) {
            break;
        }
    }

    let verdict = match first_failure {
        Some((case_number, kind, error)) => Verdict {
            status: kind,
            passed_tests: passed,
            total_tests: total,
            max_time_ms,
            max_memory_bytes,
            failed_test_case: Some(case_number),
            error_message: error,
        },
        None => Verdict {
            status: VerdictKind::Accepted,
            passed_tests: passed,
            total_tests: total,
            max_time_ms,
            max_memory_bytes,
            failed_test_case: None,
            error_message: None,
        },
    };

    Ok(JudgeOutcome::Finished { verdict, results })
}

/// Interpret one raw outcome against its test case
fn judge_case(raw: &RawResult, test_case: &TestCase, options: &JudgeOptions) -> TestCaseResult {
    let (verdict, error) = match raw.status {
        RunStatus::Exited(0) => {
            if compare_output(
                &raw.stdout,
                &test_case.expected_output,
                options.collapse_empty_lines,
            ) {
                (VerdictKind::Accepted, None)
            } else {
                (VerdictKind::WrongAnswer, None)
            }
        }
        RunStatus::Exited(code) => (
            VerdictKind::RuntimeError,
            Some(if raw.stderr.is_empty() {
                format!("exited with code {}", code)
            } else {
                truncate_output(&raw.stderr)
            }),
        ),
        RunStatus::TimeLimitExceeded => (VerdictKind::TimeLimitExceeded, None),
        RunStatus::MemoryLimitExceeded => (VerdictKind::MemoryLimitExceeded, None),
        RunStatus::Violation(v) => (
            VerdictKind::SecurityViolation,
            Some(format!("isolation policy breach: {}", v)),
        ),
        RunStatus::Signaled(sig) => (
            VerdictKind::RuntimeError,
            Some(format!("killed by signal {}", sig)),
        ),
        RunStatus::SystemError => (
            VerdictKind::SystemError,
            Some(if raw.stderr.is_empty() {
                "sandbox failure".to_string()
            } else {
                truncate_output(&raw.stderr)
            }),
        ),
    };

    // Hidden cases never leak what the program printed
    let actual_output = if test_case.is_hidden {
        None
    } else {
        Some(truncate_output(&raw.stdout))
    };

    TestCaseResult {
        passed: verdict == VerdictKind::Accepted,
        verdict,
        execution_time_ms: raw.time_ms,
        memory_used_bytes: raw.memory_bytes,
        actual_output,
        error,
    }
}

/// Line-oriented output comparison.
///
/// Trailing whitespace on each line is ignored, and a single trailing newline
/// on either side is tolerated. Interior blank lines are significant unless
/// `collapse_empty_lines` is set.
pub fn compare_output(actual: &str, expected: &str, collapse_empty_lines: bool) -> bool {
    let normalize = |text: &str| -> Vec<String> {
        text.lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !collapse_empty_lines || !line.is_empty())
            .collect()
    };
    normalize(actual) == normalize(expected)
}

/// Cap stored output, cutting on a char boundary
fn truncate_output(output: &str) -> String {
    if output.len() <= OUTPUT_LIMIT_BYTES {
        return output.to_string();
    }
    let mut end = OUTPUT_LIMIT_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output[..end].to_string()
}
