//! Maintenance operations: the jobs the cache engine executes.
//!
//! Each operation names only the entities it needs; workers re-read all
//! other state from the stores at execution time. Payloads are internally
//! tagged JSON so that an unknown operation name fails decoding at the
//! worker, which logs and drops the job.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{GrantId, NodeId, UserId};

/// A single cache maintenance operation.
///
/// Operations are idempotent recomputations against current persisted
/// state, never deltas against a snapshot captured at enqueue time. No
/// ordering is guaranteed between two operations, even for the same node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MaintenanceOp {
    /// Upsert the ownership row for a node.
    CacheOwner { node: NodeId },

    /// Swap the ownership row from one user to another.
    UpdateOwner {
        node: NodeId,
        old_owner: UserId,
        new_owner: UserId,
    },

    /// Re-resolve every affected subject over a moved node and its
    /// subtree against the current ancestor path.
    RebuildForNode { node: NodeId },

    /// Materialize a newly created grant over its node's subtree.
    PropagateShare { grant: GrantId },

    /// Remove every row derived from a destroyed grant, then re-derive
    /// the affected subject's rows from the closest remaining grant.
    ///
    /// The grant is already gone when this runs, so the op carries the
    /// node and subject it used to cover.
    RemoveShare {
        grant: GrantId,
        node: NodeId,
        user: Option<UserId>,
    },

    /// Re-resolve one subject's rows over a node and its subtree.
    RebuildUserCacheForSubtree {
        node: NodeId,
        user: Option<UserId>,
    },
}

impl MaintenanceOp {
    /// Encode for the task queue.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::Encoding(e.to_string()))
    }

    /// Decode a queue payload.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
    }

    /// The wire name of this operation, as it appears in the `op` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CacheOwner { .. } => "cache_owner",
            Self::UpdateOwner { .. } => "update_owner",
            Self::RebuildForNode { .. } => "rebuild_for_node",
            Self::PropagateShare { .. } => "propagate_share",
            Self::RemoveShare { .. } => "remove_share",
            Self::RebuildUserCacheForSubtree { .. } => "rebuild_user_cache_for_subtree",
        }
    }
}
