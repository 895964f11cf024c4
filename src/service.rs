//! Service facade: intake, status queries, cancellation
//!
//! The registry is the in-memory view of every submission the service has
//! accepted. Workers own a submission while processing it and mirror each
//! status change back into the registry; readers always get a snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServiceConfig;
use crate::error::JudgeError;
use crate::events::{EventSink, SubmissionStore, UpdateEvent};
use crate::languages;
use crate::queue::SubmissionQueue;
use crate::submission::{Submission, SubmissionId, SubmissionStatus, TestCase};

/// Source of the test cases a submission is judged against.
///
/// Problems live with the persistence collaborator; this trait is the
/// boundary. Custom tests register their scratch cases the same way.
#[async_trait]
pub trait TestCaseProvider: Send + Sync {
    async fn test_cases(&self, problem_id: &str) -> anyhow::Result<Vec<TestCase>>;
}

/// In-memory provider, used by tests and standalone runs
#[derive(Default)]
pub struct InMemoryTestCases {
    problems: RwLock<HashMap<String, Vec<TestCase>>>,
}

impl InMemoryTestCases {
    pub async fn insert(&self, problem_id: impl Into<String>, cases: Vec<TestCase>) {
        self.problems.write().await.insert(problem_id.into(), cases);
    }
}

#[async_trait]
impl TestCaseProvider for InMemoryTestCases {
    async fn test_cases(&self, problem_id: &str) -> anyhow::Result<Vec<TestCase>> {
        self.problems
            .read()
            .await
            .get(problem_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown problem: {}", problem_id))
    }
}

struct Entry {
    snapshot: Submission,
    cancel: CancellationToken,
}

/// In-memory submission registry shared by the service and the workers
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<SubmissionId, Entry>>,
}

impl Registry {
    /// Register a new submission, returning its cancellation token
    pub async fn insert(&self, submission: &Submission) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.entries.write().await.insert(
            submission.id,
            Entry {
                snapshot: submission.clone(),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Mirror the worker's current view of a submission
    pub async fn update(&self, submission: &Submission) {
        if let Some(entry) = self.entries.write().await.get_mut(&submission.id) {
            entry.snapshot = submission.clone();
        }
    }

    pub async fn get(&self, id: SubmissionId) -> Option<Submission> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|e| e.snapshot.clone())
    }

    pub async fn token(&self, id: SubmissionId) -> Option<CancellationToken> {
        self.entries.read().await.get(&id).map(|e| e.cancel.clone())
    }

    /// Move a submission into `Judging` unless cancellation already won.
    ///
    /// Serialized against `request_cancel` through the registry lock: once
    /// `Judging` is recorded here, cancellation requests are rejected, so the
    /// token can never fire mid-judging. Returns `false` when the submission
    /// was cancelled first; the caller takes the cancellation path.
    pub async fn enter_judging(&self, submission: &mut Submission) -> anyhow::Result<bool> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&submission.id)
            .ok_or_else(|| anyhow::anyhow!("submission {} not registered", submission.id))?;
        if entry.cancel.is_cancelled() {
            return Ok(false);
        }
        submission.transition_to(SubmissionStatus::Judging)?;
        entry.snapshot = submission.clone();
        Ok(true)
    }

    /// Cancel a submission's token if its state still allows cancellation.
    /// Atomic with respect to `enter_judging`.
    pub async fn request_cancel(&self, id: SubmissionId) -> Result<SubmissionStatus, JudgeError> {
        let entries = self.entries.read().await;
        let entry = entries.get(&id).ok_or(JudgeError::NotFound(id))?;
        match entry.snapshot.status {
            SubmissionStatus::Queued | SubmissionStatus::Running => {
                entry.cancel.cancel();
                Ok(entry.snapshot.status)
            }
            status => Err(JudgeError::NotCancellable(status)),
        }
    }

    /// Drop a custom test's registry entry once it reaches a terminal state;
    /// custom tests leave no trace in submission history
    pub async fn forget(&self, id: SubmissionId) {
        self.entries.write().await.remove(&id);
    }
}

/// Intake / status / cancel facade over the queue and registry
pub struct JudgeService {
    queue: Arc<SubmissionQueue>,
    registry: Arc<Registry>,
    tests: Arc<dyn TestCaseProvider>,
    events: Arc<dyn EventSink>,
    store: Arc<dyn SubmissionStore>,
}

impl JudgeService {
    pub fn new(
        _config: &ServiceConfig,
        queue: Arc<SubmissionQueue>,
        registry: Arc<Registry>,
        tests: Arc<dyn TestCaseProvider>,
        events: Arc<dyn EventSink>,
        store: Arc<dyn SubmissionStore>,
    ) -> Self {
        Self {
            queue,
            registry,
            tests,
            events,
            store,
        }
    }

    pub fn test_cases(&self) -> Arc<dyn TestCaseProvider> {
        self.tests.clone()
    }

    /// Accept a submission for judging.
    ///
    /// Empty or whitespace-only code and unknown languages are rejected here,
    /// before anything is queued or registered.
    pub async fn submit(
        &self,
        code: &str,
        language: &str,
        problem_id: &str,
        user_id: &str,
        is_custom_test: bool,
    ) -> Result<SubmissionId, JudgeError> {
        if code.trim().is_empty() {
            return Err(JudgeError::Validation(
                "source code must not be empty".into(),
            ));
        }
        if languages::get_language_config(language).is_none() {
            return Err(JudgeError::UnsupportedLanguage(language.to_string()));
        }

        let submission = Submission::new(
            code.to_string(),
            language.to_string(),
            problem_id.to_string(),
            user_id.to_string(),
            is_custom_test,
        );
        let id = submission.id;

        self.registry.insert(&submission).await;
        self.events
            .push(UpdateEvent::status(id, user_id, SubmissionStatus::Queued));

        if let Err(e) = self.queue.push(submission).await {
            self.registry.forget(id).await;
            return Err(e);
        }
        info!("Accepted submission {} ({}, user {})", id, language, user_id);
        Ok(id)
    }

    /// Snapshot of a submission's current state
    pub async fn get_submission(&self, id: SubmissionId) -> Result<Submission, JudgeError> {
        self.registry.get(id).await.ok_or(JudgeError::NotFound(id))
    }

    /// Zero-based queue position, `None` once a worker has claimed it
    pub async fn queue_position(&self, id: SubmissionId) -> Option<usize> {
        self.queue.position(id).await
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.depth().await
    }

    /// Cancel a queued or running submission.
    ///
    /// A queued submission is removed from the queue and finalized here. A
    /// running one has its token cancelled; the owning worker observes it at
    /// the next suspension point and finalizes within a second. Anything past
    /// `Running` is no longer cancellable.
    pub async fn cancel(&self, id: SubmissionId) -> Result<(), JudgeError> {
        match self.registry.request_cancel(id).await? {
            SubmissionStatus::Queued => {
                if let Some(mut submission) = self.queue.remove(id).await {
                    submission.transition_to(SubmissionStatus::Cancelled)?;
                    self.registry.update(&submission).await;
                    self.events.push(UpdateEvent::status(
                        id,
                        &submission.user_id,
                        SubmissionStatus::Cancelled,
                    ));
                    if submission.is_custom_test {
                        self.registry.forget(id).await;
                    } else {
                        self.store.persist_terminal(&submission).await?;
                    }
                    info!("Cancelled queued submission {}", id);
                }
                // Not in the queue anymore: a worker claimed it and will
                // observe the cancelled token itself
                Ok(())
            }
            _ => {
                info!("Requested cancellation of running submission {}", id);
                Ok(())
            }
        }
    }
}
