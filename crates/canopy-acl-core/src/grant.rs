//! Share grants: explicit permission edges on the tree.

use serde::{Deserialize, Serialize};

use crate::level::PermissionLevel;
use crate::types::{GrantId, NodeId, UserId};

/// An explicit share grant `(node, subject, level)`.
///
/// At most one grant exists per `(node, subject)`. A grant's effect is
/// materialized into the permission cache for the node and its whole
/// subtree; destroying the grant triggers cache repair rather than direct
/// cache mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    /// The grant's identifier, recorded as `source` on derived cache rows.
    pub id: GrantId,
    /// The node the grant is attached to.
    pub node: NodeId,
    /// The granted subject. `None` is the public (anonymous) subject.
    pub user: Option<UserId>,
    /// The granted level.
    pub level: PermissionLevel,
}

impl ShareGrant {
    /// Create a grant for a specific user.
    pub fn for_user(id: GrantId, node: NodeId, user: UserId, level: PermissionLevel) -> Self {
        Self {
            id,
            node,
            user: Some(user),
            level,
        }
    }

    /// Create a public grant.
    pub fn public(id: GrantId, node: NodeId, level: PermissionLevel) -> Self {
        Self {
            id,
            node,
            user: None,
            level,
        }
    }

    /// Whether this is a public grant.
    pub fn is_public(&self) -> bool {
        self.user.is_none()
    }
}
