//! Materialized permission cache rows.

use serde::{Deserialize, Serialize};

use crate::level::PermissionLevel;
use crate::types::{GrantId, NodeId, UserId};

/// One row of the materialized permission cache: the resolved level for a
/// `(node, subject)` pair, plus where it came from.
///
/// `source = None` marks an ownership-derived row. At most one row exists
/// per `(node, subject)`; ownership-derived rows take unconditional
/// precedence and are never overwritten by grant-derived writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
    /// The node the row answers for (always a canonical id).
    pub node: NodeId,
    /// The subject. `None` is the public (anonymous) subject.
    pub user: Option<UserId>,
    /// The resolved level.
    pub level: PermissionLevel,
    /// The grant this row was derived from; `None` for ownership rows.
    pub source: Option<GrantId>,
}

impl PermissionRow {
    /// An ownership-derived row: the owner holds admin.
    pub fn owner(node: NodeId, user: UserId) -> Self {
        Self {
            node,
            user: Some(user),
            level: PermissionLevel::Admin,
            source: None,
        }
    }

    /// A grant-derived row.
    pub fn derived(
        node: NodeId,
        user: Option<UserId>,
        level: PermissionLevel,
        source: GrantId,
    ) -> Self {
        Self {
            node,
            user,
            level,
            source: Some(source),
        }
    }

    /// Whether this row came from ownership rather than a grant.
    pub fn is_ownership(&self) -> bool {
        self.source.is_none()
    }
}
