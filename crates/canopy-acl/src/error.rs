//! Error types for the Canopy ACL facade.

use canopy_acl_core::{NodeId, PermissionLevel, UserId};
use canopy_acl_engine::EngineError;
use canopy_acl_resolve::ResolveError;
use canopy_acl_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the ACL service.
#[derive(Debug, Error)]
pub enum AclError {
    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Maintenance engine or queue error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Resolution error.
    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// The actor lacks the level this mutation requires.
    ///
    /// Callers surface this as a generic forbidden/not-found response;
    /// it deliberately carries no detail about why.
    #[error("actor {actor} lacks {required} on node {node}")]
    Forbidden {
        node: NodeId,
        actor: UserId,
        required: PermissionLevel,
    },

    /// The referenced node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
}

/// Result type for ACL service operations.
pub type Result<T> = std::result::Result<T, AclError>;
