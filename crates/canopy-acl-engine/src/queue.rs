//! Task-queue adapter.
//!
//! The real deployment hands maintenance jobs to a durable external queue
//! with at-least-once, FIFO-ish delivery and no ordering guarantee across
//! keys. This module defines the seam ([`TaskQueue`]) and an in-process
//! implementation ([`MemoryQueue`]) with the same delivery contract, used
//! by tests and single-process deployments.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use canopy_acl_core::MaintenanceOp;

use crate::error::{EngineError, Result};

/// A queued maintenance job: opaque payload bytes plus how many times
/// delivery has been attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Encoded [`MaintenanceOp`] envelope.
    pub payload: Vec<u8>,
    /// Zero on first delivery.
    pub attempt: u32,
}

impl Job {
    /// Encode an operation into a first-delivery job.
    pub fn from_op(op: &MaintenanceOp) -> Result<Self> {
        Ok(Self {
            payload: op.to_json_bytes()?,
            attempt: 0,
        })
    }

    /// The same job, one attempt later.
    pub fn retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// The queue seam between mutation code paths and the worker pool.
///
/// Implementations must deliver at least once; they need not preserve
/// order. Payloads are opaque bytes so that a malformed or unknown
/// operation is a worker-side decode failure, not a queue failure.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a job. Fails with `QueueClosed` after `close`.
    async fn push(&self, job: Job) -> Result<()>;

    /// Wait for the next job. Returns `None` once the queue is closed
    /// and drained.
    async fn pull(&self) -> Result<Option<Job>>;

    /// Stop accepting jobs and wake all waiting workers.
    fn close(&self);
}

/// In-process queue with the external queue's delivery contract.
pub struct MemoryQueue {
    inner: Mutex<VecDeque<Job>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    /// Create a new open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of jobs currently waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Whether no jobs are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop without waiting. For synchronous drains in tests.
    pub fn try_pull(&self) -> Option<Job> {
        self.inner.lock().ok()?.pop_front()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn push(&self, job: Job) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::QueueClosed);
        }
        {
            let mut queue = self
                .inner
                .lock()
                .map_err(|_| EngineError::QueueClosed)?;
            queue.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn pull(&self) -> Result<Option<Job>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking, so a push or close between the
            // check and the await cannot be missed.
            notified.as_mut().enable();

            if let Some(job) = self.try_pull() {
                // Wake another waiter in case more jobs are queued.
                self.notify.notify_one();
                return Ok(Some(job));
            }
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}
