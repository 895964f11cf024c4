//! Submission data model and status state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::strategy::ExecutionStrategy;
use crate::verdict::{Verdict, VerdictKind};

/// Unique submission identifier, generated at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(Uuid);

impl SubmissionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Submission lifecycle states.
///
/// `Queued → Running → Judging → {Completed | Failed | Cancelled}`.
/// `Cancelled` is reachable only from `Queued` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Running,
    Judging,
    Completed,
    Failed,
    Cancelled,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Completed | SubmissionStatus::Failed | SubmissionStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Judging)
                // No test case ever started: compile error, provisioning failure
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Judging, Completed)
                | (Judging, Failed)
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Judging => "judging",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
            SubmissionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One test case to run a submission against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    pub time_limit_ms: u32,
    pub memory_limit_bytes: u64,
    /// Hidden cases never expose the program's actual output
    #[serde(default)]
    pub is_hidden: bool,
}

/// Realized result of running one test case. Append-only per submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub passed: bool,
    pub verdict: VerdictKind,
    pub execution_time_ms: u32,
    pub memory_used_bytes: u64,
    /// Truncated program output, absent for hidden test cases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A user submission as it moves through the pipeline.
///
/// Owned exclusively by the worker currently processing it; the registry hands
/// out snapshots for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub code: String,
    pub language: String,
    pub problem_id: String,
    pub user_id: String,
    pub is_custom_test: bool,
    pub status: SubmissionStatus,
    /// Router decision, attached once and immutable afterwards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategy>,
    pub test_results: Vec<TestCaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

impl Submission {
    pub fn new(
        code: String,
        language: String,
        problem_id: String,
        user_id: String,
        is_custom_test: bool,
    ) -> Self {
        Self {
            id: SubmissionId::generate(),
            code,
            language,
            problem_id,
            user_id,
            is_custom_test,
            status: SubmissionStatus::Queued,
            strategy: None,
            test_results: Vec::new(),
            verdict: None,
        }
    }

    /// Apply a status transition, rejecting anything the state machine forbids.
    pub fn transition_to(&mut self, next: SubmissionStatus) -> anyhow::Result<()> {
        if !self.status.can_transition_to(next) {
            anyhow::bail!(
                "illegal status transition {} -> {} for submission {}",
                self.status,
                next,
                self.id
            );
        }
        self.status = next;
        Ok(())
    }

    /// Attach the router decision. The strategy is immutable once set.
    pub fn attach_strategy(&mut self, strategy: ExecutionStrategy) {
        debug_assert!(self.strategy.is_none(), "strategy attached twice");
        self.strategy.get_or_insert(strategy);
    }

    /// Attach the final verdict and move to the matching terminal state.
    ///
    /// A `SystemError` verdict marks the submission `Failed`; everything else
    /// judged to completion is `Completed`.
    pub fn finish(&mut self, verdict: Verdict) -> anyhow::Result<()> {
        let terminal = if verdict.status == VerdictKind::SystemError {
            SubmissionStatus::Failed
        } else {
            SubmissionStatus::Completed
        };
        // A rejected transition must not leave a verdict on a live submission
        self.transition_to(terminal)?;
        self.verdict = Some(verdict);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> Submission {
        Submission::new(
            "print(42)".into(),
            "python".into(),
            "p1".into(),
            "u1".into(),
            false,
        )
    }

    #[test]
    fn test_initial_state_is_queued() {
        let s = submission();
        assert_eq!(s.status, SubmissionStatus::Queued);
        assert!(s.verdict.is_none());
    }

    #[test]
    fn test_legal_transition_chain() {
        let mut s = submission();
        s.transition_to(SubmissionStatus::Running).unwrap();
        s.transition_to(SubmissionStatus::Judging).unwrap();
        s.transition_to(SubmissionStatus::Completed).unwrap();
        assert!(s.status.is_terminal());
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut s = submission();
        assert!(s.transition_to(SubmissionStatus::Judging).is_err());
        assert!(s.transition_to(SubmissionStatus::Completed).is_err());
    }

    #[test]
    fn test_cancel_only_from_queued_or_running() {
        let mut s = submission();
        s.transition_to(SubmissionStatus::Running).unwrap();
        s.transition_to(SubmissionStatus::Judging).unwrap();
        assert!(s.transition_to(SubmissionStatus::Cancelled).is_err());

        let mut s2 = submission();
        s2.transition_to(SubmissionStatus::Cancelled).unwrap();
        assert_eq!(s2.status, SubmissionStatus::Cancelled);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = submission();
        s.transition_to(SubmissionStatus::Running).unwrap();
        s.transition_to(SubmissionStatus::Failed).unwrap();
        assert!(s.transition_to(SubmissionStatus::Running).is_err());
        assert!(s.transition_to(SubmissionStatus::Cancelled).is_err());
    }

    #[test]
    fn test_finish_attaches_verdict_and_terminal_state() {
        let mut s = submission();
        s.transition_to(SubmissionStatus::Running).unwrap();
        s.transition_to(SubmissionStatus::Judging).unwrap();
        s.finish(Verdict::aborted(VerdictKind::WrongAnswer, 1, None))
            .unwrap();
        assert_eq!(s.status, SubmissionStatus::Completed);
        assert!(s.verdict.is_some());
    }

    #[test]
    fn test_system_error_finishes_as_failed() {
        let mut s = submission();
        s.transition_to(SubmissionStatus::Running).unwrap();
        s.finish(Verdict::aborted(
            VerdictKind::SystemError,
            0,
            Some("provisioning exhausted retries".into()),
        ))
        .unwrap();
        assert_eq!(s.status, SubmissionStatus::Failed);
        assert!(s.verdict.is_some());
    }

    #[test]
    fn test_rejected_finish_leaves_no_verdict() {
        let mut s = submission();
        // Queued cannot jump straight to a judged terminal state
        let result = s.finish(Verdict::aborted(VerdictKind::WrongAnswer, 1, None));
        assert!(result.is_err());
        assert!(s.verdict.is_none());
        assert_eq!(s.status, SubmissionStatus::Queued);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let ids: Vec<SubmissionId> = (0..64).map(|_| SubmissionId::generate()).collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
