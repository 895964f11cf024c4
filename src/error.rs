//! Error taxonomy for the judge service API surface.
//!
//! Judged outcomes (wrong answer, limit breaches, ...) are not errors; they
//! travel as `VerdictKind` on the submission. This enum covers the failures
//! that happen before or outside judging.

use thiserror::Error;

use crate::submission::{SubmissionId, SubmissionStatus};

#[derive(Debug, Error)]
pub enum JudgeError {
    /// Rejected before enqueue; never enters the state machine.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("submission not found: {0}")]
    NotFound(SubmissionId),

    #[error("submission queue is closed")]
    QueueClosed,

    #[error("submission in state {0} cannot be cancelled")]
    NotCancellable(SubmissionStatus),

    /// Infrastructure failure: provisioning exhausted retries, internal fault.
    #[error("system error: {0}")]
    System(#[from] anyhow::Error),
}
