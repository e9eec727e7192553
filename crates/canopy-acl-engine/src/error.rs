//! Error types for the maintenance engine.

use canopy_acl_core::CoreError;
use canopy_acl_store::StoreError;
use thiserror::Error;

/// Errors that can occur while executing or enqueueing maintenance work.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Payload encoding/decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CoreError),

    /// The task queue has been closed.
    #[error("task queue is closed")]
    QueueClosed,
}

impl EngineError {
    /// Whether the queue's retry policy should re-deliver the job.
    ///
    /// Only infrastructure failures are transient; malformed payloads and
    /// closed queues never heal by retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_transient(),
            EngineError::Codec(_) | EngineError::QueueClosed => false,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
