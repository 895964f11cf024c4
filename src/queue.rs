//! In-process submission queue
//!
//! FIFO shared by the intake side and the worker pool. Supports blocking and
//! non-blocking dequeue, depth and position queries, and removal by id for
//! cancelling still-queued submissions. All operations are atomic with
//! respect to each other; a submission is delivered to exactly one worker.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::error::JudgeError;
use crate::submission::{Submission, SubmissionId};

struct Inner {
    items: VecDeque<Submission>,
    closed: bool,
}

pub struct SubmissionQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a submission, waking one blocked worker
    pub async fn push(&self, submission: Submission) -> Result<(), JudgeError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(JudgeError::QueueClosed);
            }
            inner.items.push_back(submission);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Dequeue the oldest submission, blocking until one is available.
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Submission> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(submission) = inner.items.pop_front() {
                    // Pass the wakeup on in case more items remain
                    if !inner.items.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(submission);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Dequeue without blocking
    pub async fn try_pop(&self) -> Option<Submission> {
        self.inner.lock().await.items.pop_front()
    }

    /// Zero-based position of a queued submission, `None` if not queued
    pub async fn position(&self, id: SubmissionId) -> Option<usize> {
        let inner = self.inner.lock().await;
        inner.items.iter().position(|s| s.id == id)
    }

    pub async fn depth(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Remove a still-queued submission; the cancellation path for `Queued`
    pub async fn remove(&self, id: SubmissionId) -> Option<Submission> {
        let mut inner = self.inner.lock().await;
        let index = inner.items.iter().position(|s| s.id == id)?;
        inner.items.remove(index)
    }

    /// Close the queue; blocked workers drain what remains and then stop
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn submission(code: &str) -> Submission {
        Submission::new(code.into(), "python".into(), "p1".into(), "u1".into(), false)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let q = SubmissionQueue::new();
        let a = submission("a");
        let b = submission("b");
        let (ida, idb) = (a.id, b.id);
        q.push(a).await.unwrap();
        q.push(b).await.unwrap();

        assert_eq!(q.pop().await.unwrap().id, ida);
        assert_eq!(q.pop().await.unwrap().id, idb);
    }

    #[tokio::test]
    async fn test_try_pop_empty() {
        let q = SubmissionQueue::new();
        assert!(q.try_pop().await.is_none());
    }

    #[tokio::test]
    async fn test_position_and_depth() {
        let q = SubmissionQueue::new();
        let a = submission("a");
        let b = submission("b");
        let idb = b.id;
        q.push(a).await.unwrap();
        q.push(b).await.unwrap();

        assert_eq!(q.depth().await, 2);
        assert_eq!(q.position(idb).await, Some(1));
        assert_eq!(q.position(SubmissionId::generate()).await, None);
    }

    #[tokio::test]
    async fn test_remove_queued_submission() {
        let q = SubmissionQueue::new();
        let a = submission("a");
        let ida = a.id;
        q.push(a).await.unwrap();

        let removed = q.remove(ida).await.unwrap();
        assert_eq!(removed.id, ida);
        assert_eq!(q.depth().await, 0);
        assert!(q.remove(ida).await.is_none());
    }

    #[tokio::test]
    async fn test_blocked_pop_wakes_on_push() {
        let q = Arc::new(SubmissionQueue::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let s = submission("a");
        let id = s.id;
        q.push(s).await.unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.id, id);
    }

    #[tokio::test]
    async fn test_close_unblocks_and_rejects_push() {
        let q = Arc::new(SubmissionQueue::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.close().await;
        assert!(waiter.await.unwrap().is_none());
        assert!(matches!(
            q.push(submission("a")).await,
            Err(JudgeError::QueueClosed)
        ));
    }
}
