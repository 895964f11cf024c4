//! Outbound records: live updates, resource metrics, security audit
//!
//! Workers push to these sinks without ever blocking on delivery; the
//! persisted submission stays the source of truth for polling clients.
//! Transport behind each sink is an external collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sandbox::ViolationType;
use crate::submission::{Submission, SubmissionId, SubmissionStatus, TestCaseResult};
use crate::verdict::Verdict;

/// Live update pushed on every status transition and completed test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub submission_id: SubmissionId,
    /// Owning user, used by the streaming collaborator for routing
    pub user_id: String,
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_test_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_result: Option<TestCaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Full result list, included on verdict-completion events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Vec<TestCaseResult>>,
}

impl UpdateEvent {
    /// Bare status-transition event
    pub fn status(submission_id: SubmissionId, user_id: &str, status: SubmissionStatus) -> Self {
        Self {
            submission_id,
            user_id: user_id.to_string(),
            status,
            current_test_index: None,
            test_result: None,
            verdict: None,
            test_results: None,
        }
    }
}

/// Per-run resource accounting record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub submission_id: SubmissionId,
    pub cpu_time_ms: u32,
    pub wall_time_ms: u32,
    pub peak_memory_bytes: u64,
    pub syscall_count: u64,
}

/// Audit record for an isolation policy breach.
///
/// Written whenever a breach is detected, independent of what the submission's
/// own verdict ends up being.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub submission_id: SubmissionId,
    pub user_id: String,
    pub violation_type: ViolationType,
    pub attempted_action: String,
    pub timestamp: DateTime<Utc>,
}

impl SecurityViolation {
    pub fn new(
        submission_id: SubmissionId,
        user_id: &str,
        violation_type: ViolationType,
        attempted_action: impl Into<String>,
    ) -> Self {
        Self {
            submission_id,
            user_id: user_id.to_string(),
            violation_type,
            attempted_action: attempted_action.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Streaming collaborator for live updates. Must never block the caller.
pub trait EventSink: Send + Sync {
    fn push(&self, event: UpdateEvent);
}

/// Metrics collaborator, one record per run
pub trait MetricsSink: Send + Sync {
    fn record(&self, metrics: ResourceMetrics);
}

/// Audit collaborator for security violations
pub trait AuditSink: Send + Sync {
    fn record(&self, violation: SecurityViolation);
}

/// Channel-backed event sink with at-most-once push semantics.
///
/// A full or closed channel drops the event; polling the persisted submission
/// always yields the authoritative state.
pub struct ChannelEventSink {
    tx: mpsc::Sender<UpdateEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<UpdateEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn push(&self, event: UpdateEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("Dropping update event: {}", e);
        }
    }
}

/// Sink that logs records via tracing; the default for standalone workers
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn push(&self, event: UpdateEvent) {
        debug!(
            "update: submission_id={} status={}",
            event.submission_id, event.status
        );
    }
}

impl MetricsSink for LogSink {
    fn record(&self, metrics: ResourceMetrics) {
        debug!(
            "run metrics: submission_id={} cpu_ms={} wall_ms={} peak_mem={} syscalls={}",
            metrics.submission_id,
            metrics.cpu_time_ms,
            metrics.wall_time_ms,
            metrics.peak_memory_bytes,
            metrics.syscall_count
        );
    }
}

impl AuditSink for LogSink {
    fn record(&self, violation: SecurityViolation) {
        warn!(
            "security violation: submission_id={} user_id={} type={} action={}",
            violation.submission_id,
            violation.user_id,
            violation.violation_type,
            violation.attempted_action
        );
    }
}

/// Persistence collaborator, written only at terminal transitions
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn persist_terminal(&self, submission: &Submission) -> anyhow::Result<()>;
}

/// Store that discards everything; used for custom tests and standalone runs
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl SubmissionStore for NullStore {
    async fn persist_terminal(&self, _submission: &Submission) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_never_blocks_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelEventSink::new(tx);
        let id = SubmissionId::generate();

        sink.push(UpdateEvent::status(id, "u1", SubmissionStatus::Queued));
        // Second push drops instead of blocking
        sink.push(UpdateEvent::status(id, "u1", SubmissionStatus::Running));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, SubmissionStatus::Queued);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_update_event_wire_format() {
        let id = SubmissionId::generate();
        let event = UpdateEvent::status(id, "u1", SubmissionStatus::Running);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["user_id"], "u1");
        // Absent optionals stay off the wire entirely
        assert!(json.get("verdict").is_none());
        assert!(json.get("test_result").is_none());
    }

    #[test]
    fn test_violation_record_carries_identifiers() {
        let id = SubmissionId::generate();
        let v = SecurityViolation::new(id, "u42", ViolationType::BlockedSyscall, "socket()");
        assert_eq!(v.submission_id, id);
        assert_eq!(v.user_id, "u42");
        assert_eq!(v.attempted_action, "socket()");
    }
}
