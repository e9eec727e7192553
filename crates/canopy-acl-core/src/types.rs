//! Strong type definitions for the Canopy permission engine.
//!
//! All identifiers are newtypes to prevent misuse at compile time. A node
//! id, a user id, and a grant id are all UUIDs on the wire, but they are
//! never interchangeable in code.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a node in the workspace tree.
///
/// A node may be a *link*: a node that defers entirely to its origin for
/// ownership and cache identity. Cache operations always key by the
/// canonical id, never by a link's own id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

/// Identifier of a user account.
///
/// Share grants and cache rows use `Option<UserId>` where `None` denotes
/// the public (anonymous) subject.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

/// Identifier of an explicit share grant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GrantId(pub Uuid);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the underlying UUID.
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The nil identifier (used as a storage sentinel).
            pub const NIL: Self = Self(Uuid::nil());
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), &self.0.simple().to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.0.simple().to_string()[..8])
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

impl_id!(NodeId);
impl_id!(UserId);
impl_id!(GrantId);

/// A node record as the permission engine sees it.
///
/// This is the slice of the application's node that matters for access
/// control: ownership, position in the tree, and link canonicalization.
/// Rich content lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// The node's identifier.
    pub id: NodeId,
    /// The owning user. Nullable only transiently, during creation.
    pub owner: Option<UserId>,
    /// The parent node. `None` for roots.
    pub parent: Option<NodeId>,
    /// When set, this node is a link deferring to the given origin.
    pub origin: Option<NodeId>,
}

impl Node {
    /// Create a canonical (non-link) node.
    pub fn new(id: NodeId, owner: UserId, parent: Option<NodeId>) -> Self {
        Self {
            id,
            owner: Some(owner),
            parent,
            origin: None,
        }
    }

    /// Create a link node deferring to `origin`.
    pub fn link(id: NodeId, origin: NodeId, parent: Option<NodeId>) -> Self {
        Self {
            id,
            owner: None,
            parent,
            origin: Some(origin),
        }
    }

    /// Whether this node is a link rather than a canonical node.
    pub fn is_link(&self) -> bool {
        self.origin.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_is_short() {
        let id = NodeId::from_uuid(Uuid::from_u128(0xabcdef01_2345_6789_abcd_ef0123456789));
        let display = format!("{}", id);
        assert_eq!(display.len(), 8);
        assert_eq!(display, "abcdef01");
    }

    #[test]
    fn test_id_debug_names_the_type() {
        let id = GrantId::from_uuid(Uuid::from_u128(7));
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("GrantId("));
    }

    #[test]
    fn test_ids_are_not_interchangeable() {
        // Compile-time property; here we just check serde round-trips.
        let node = NodeId::generate();
        let json = serde_json::to_string(&node).unwrap();
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }

    #[test]
    fn test_link_node() {
        let origin = NodeId::generate();
        let link = Node::link(NodeId::generate(), origin, None);
        assert!(link.is_link());
        assert_eq!(link.origin, Some(origin));
        assert_eq!(link.owner, None);
    }
}
