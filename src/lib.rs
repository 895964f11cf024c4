//! Arbiter - a sandboxed code-judging worker service
//!
//! Executes untrusted submissions against test cases inside disposable
//! isolated sandboxes and derives a verdict. Four cooperating parts: the
//! strategy router classifies code and picks an execution path, the
//! orchestrator owns sandbox lifecycle and resource enforcement, the judge
//! engine compares outputs and aggregates verdicts, and the worker pool
//! provides bounded elastic concurrency over the submission queue.

pub mod config;
pub mod error;
pub mod events;
pub mod judge;
pub mod languages;
pub mod orchestrator;
pub mod queue;
pub mod sandbox;
pub mod service;
pub mod strategy;
pub mod submission;
pub mod verdict;
pub mod worker;

pub use config::ServiceConfig;
pub use error::JudgeError;
pub use service::JudgeService;
pub use submission::{Submission, SubmissionId, SubmissionStatus, TestCase, TestCaseResult};
pub use verdict::{Verdict, VerdictKind};
