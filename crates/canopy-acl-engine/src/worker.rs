//! Worker pool: pulls maintenance jobs off the queue and applies them.
//!
//! Failure policy per job, in order:
//! - payload does not decode → log at error, drop, keep running;
//! - target entity gone → success (`Skipped`), logged at debug;
//! - transient infrastructure failure → re-enqueue with a delay, up to
//!   `max_attempts`, then log at error and drop;
//! - any other failure → log at error and drop.
//!
//! A worker never panics over a bad job and never blocks the read path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use canopy_acl_core::MaintenanceOp;
use canopy_acl_store::Backend;

use crate::engine::{MaintenanceEngine, OpOutcome};
use crate::queue::TaskQueue;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Total delivery attempts per job before it is dropped.
    pub max_attempts: u32,
    /// Delay before a transient failure is re-enqueued.
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// A running pool of maintenance workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` tasks over the given engine and queue.
    ///
    /// The pool runs until the queue is closed and drained; call
    /// [`WorkerPool::join`] to wait for that.
    pub fn spawn<B, Q>(
        engine: Arc<MaintenanceEngine<B>>,
        queue: Arc<Q>,
        config: WorkerConfig,
    ) -> Self
    where
        B: Backend + Send + Sync + 'static,
        Q: TaskQueue + 'static,
    {
        let handles = (0..config.workers.max(1))
            .map(|id| {
                let engine = Arc::clone(&engine);
                let queue = Arc::clone(&queue);
                let config = config.clone();
                tokio::spawn(async move {
                    run_worker(id, engine, queue, config).await;
                })
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to finish.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker<B, Q>(
    id: usize,
    engine: Arc<MaintenanceEngine<B>>,
    queue: Arc<Q>,
    config: WorkerConfig,
) where
    B: Backend + Send + Sync,
    Q: TaskQueue,
{
    loop {
        let job = match queue.pull().await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("worker {}: queue pull failed: {}", id, e);
                break;
            }
        };

        let op = match MaintenanceOp::from_json_bytes(&job.payload) {
            Ok(op) => op,
            Err(e) => {
                tracing::error!("worker {}: dropping malformed maintenance job: {}", id, e);
                continue;
            }
        };

        match engine.apply(&op).await {
            Ok(OpOutcome::Applied) => {
                tracing::debug!("worker {}: applied {}", id, op.name());
            }
            Ok(OpOutcome::Skipped) => {
                tracing::debug!("worker {}: {} target gone, skipped", id, op.name());
            }
            Err(e) if e.is_transient() && job.attempt + 1 < config.max_attempts => {
                tracing::warn!(
                    "worker {}: {} failed transiently (attempt {}), re-enqueueing: {}",
                    id,
                    op.name(),
                    job.attempt + 1,
                    e
                );
                tokio::time::sleep(config.retry_delay).await;
                if queue.push(job.retry()).await.is_err() {
                    tracing::error!(
                        "worker {}: queue closed while re-enqueueing {}, job lost",
                        id,
                        op.name()
                    );
                    break;
                }
            }
            Err(e) => {
                tracing::error!("worker {}: {} failed, dropping: {}", id, op.name(), e);
            }
        }
    }
}
