//! Error types for the store module.

use canopy_acl_core::{NodeId, UserId};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A grant already exists for this `(node, subject)` pair.
    #[error("duplicate grant on node {node} for subject {subject}")]
    DuplicateGrant {
        node: NodeId,
        /// Display form of the subject; "public" for the anonymous grant.
        subject: String,
    },

    /// A node with this id already exists.
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// The referenced node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A move would place a node under its own subtree.
    #[error("cannot move node {node} under its own descendant {new_parent}")]
    MoveIntoSubtree { node: NodeId, new_parent: NodeId },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("connection lock poisoned: {0}")]
    LockPoisoned(String),

    /// A blocking task failed to complete.
    #[error("blocking task failed: {0}")]
    Join(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Display form of a grant subject for error messages.
    pub fn subject_label(user: Option<UserId>) -> String {
        match user {
            Some(u) => u.to_string(),
            None => "public".to_string(),
        }
    }

    /// Whether retrying the operation could succeed.
    ///
    /// Constraint violations and missing entities are never transient;
    /// database, lock, and I/O failures are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_)
                | StoreError::LockPoisoned(_)
                | StoreError::Join(_)
                | StoreError::Io(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
