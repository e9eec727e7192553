//! Store traits: the abstract interfaces the permission engine runs over.
//!
//! Three concerns, three traits: the tree and its ancestor closure
//! ([`TreeStore`]), explicit share grants ([`GrantStore`]), and the
//! materialized permission cache ([`CacheStore`]). Implementations include
//! SQLite (primary) and in-memory (for tests); both back all three traits,
//! bundled by the blanket [`Backend`] supertrait.

use async_trait::async_trait;
use canopy_acl_core::{GrantId, Node, NodeId, PermissionLevel, PermissionRow, ShareGrant, UserId};

use crate::error::Result;

/// Result of writing a grant-derived cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// The row was inserted or updated.
    Applied,
    /// An ownership-derived row holds the key; the write was skipped.
    ///
    /// Ownership has unconditional precedence over grant-derived rows,
    /// so this is a success, not a conflict.
    SkippedOwnerRow,
}

/// The workspace tree and its ancestor closure.
///
/// # Design Notes
///
/// - **Canonicalization**: a link node defers to its origin; every cache
///   operation and resolution keys by `canonical(node)`.
/// - **Ancestor order**: `ancestors` returns self first (distance 0) and
///   walks outward; the permission engine depends on this order for
///   closest-ancestor-wins resolution.
/// - **Missing nodes**: `ancestors`/`descendants` of a missing node return
///   empty rather than erroring, so that maintenance operations can treat
///   a deleted target as a benign no-op.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Insert a node (and its closure rows) atomically.
    ///
    /// Fails with `DuplicateNode` if the id exists and `NodeNotFound` if
    /// the parent is named but missing.
    async fn insert_node(&self, node: &Node) -> Result<()>;

    /// Fetch a node record.
    async fn get_node(&self, node: NodeId) -> Result<Option<Node>>;

    /// Resolve a node to its canonical id, following link origins.
    ///
    /// Returns `None` when the node (or any origin on the chain) is gone.
    async fn canonical(&self, node: NodeId) -> Result<Option<NodeId>>;

    /// Ancestor ids ordered nearest to farthest, including `node` itself
    /// at distance 0. Empty when the node does not exist.
    async fn ancestors(&self, node: NodeId) -> Result<Vec<NodeId>>;

    /// All descendant ids, unordered, excluding `node` itself.
    async fn descendants(&self, node: NodeId) -> Result<Vec<NodeId>>;

    /// The node's owner, if assigned.
    async fn owner(&self, node: NodeId) -> Result<Option<UserId>>;

    /// Reassign the node's owner.
    async fn set_owner(&self, node: NodeId, owner: UserId) -> Result<()>;

    /// Re-parent a node, rewriting the ancestor closure for its whole
    /// subtree in one transaction.
    ///
    /// Fails with `MoveIntoSubtree` when `new_parent` is the node itself
    /// or one of its descendants.
    async fn move_node(&self, node: NodeId, new_parent: NodeId) -> Result<()>;

    /// Delete a node and its whole subtree, cascading to closure rows,
    /// grants, and cache rows. Returns the deleted node ids (for memo
    /// eviction). Deleting a missing node is a no-op returning empty.
    async fn delete_node(&self, node: NodeId) -> Result<Vec<NodeId>>;

    /// All nodes owned by a user (for listing joins).
    async fn nodes_owned_by(&self, user: UserId) -> Result<Vec<NodeId>>;
}

/// Explicit share grants, unique per `(node, subject)`.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Create a grant. Fails with `DuplicateGrant` when a grant already
    /// exists for the `(node, subject)` pair.
    async fn create_grant(&self, grant: &ShareGrant) -> Result<()>;

    /// Destroy a grant. Idempotent: returns `false` when it was already
    /// gone, `true` when this call removed it.
    async fn destroy_grant(&self, grant: GrantId) -> Result<bool>;

    /// Fetch a grant by id.
    async fn get_grant(&self, grant: GrantId) -> Result<Option<ShareGrant>>;

    /// The grant for an exact `(node, subject)` key, if any.
    async fn grant_for(&self, node: NodeId, user: Option<UserId>) -> Result<Option<ShareGrant>>;

    /// All grants attached to any of the given nodes.
    async fn grants_on_any(&self, nodes: &[NodeId]) -> Result<Vec<ShareGrant>>;
}

/// The materialized permission cache: one resolved row per
/// `(node, subject)`.
///
/// Only maintenance operations write here. Writers touching disjoint
/// `(node, subject)` sets never contend on rows; overlapping writers
/// converge because every write is a recomputation from current state.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Upsert the ownership row `(node, user, admin, source = None)`.
    /// Unconditional: replaces a grant-derived row on the same key.
    async fn upsert_owner_row(&self, node: NodeId, user: UserId) -> Result<()>;

    /// Upsert a grant-derived row, unless an ownership row holds the key.
    async fn upsert_grant_row(&self, row: &PermissionRow) -> Result<UpsertResult>;

    /// Fetch the row for an exact `(node, subject)` key.
    async fn get_row(&self, node: NodeId, user: Option<UserId>) -> Result<Option<PermissionRow>>;

    /// Delete the ownership row for `(node, user)`, leaving any
    /// grant-derived row untouched.
    async fn delete_owner_row(&self, node: NodeId, user: UserId) -> Result<()>;

    /// Delete the grant-derived row for `(node, subject)`, leaving an
    /// ownership row untouched.
    async fn delete_grant_row(&self, node: NodeId, user: Option<UserId>) -> Result<()>;

    /// Delete every row derived from the given grant. Returns the number
    /// of rows removed.
    async fn delete_rows_by_source(&self, grant: GrantId) -> Result<u64>;

    /// Distinct subjects of rows derived from the given grant.
    ///
    /// A public grant can be the resolution source for signed-in
    /// subjects too; removal repairs each of them.
    async fn subjects_for_source(&self, grant: GrantId) -> Result<Vec<Option<UserId>>>;

    /// All rows for a node.
    async fn rows_for_node(&self, node: NodeId) -> Result<Vec<PermissionRow>>;

    /// Nodes where the exact subject holds at least `min_level`.
    ///
    /// Listing callers combine this with the public subject's rows and
    /// with `nodes_owned_by` - never with per-row ancestor walks.
    async fn nodes_for_user(
        &self,
        user: Option<UserId>,
        min_level: PermissionLevel,
    ) -> Result<Vec<NodeId>>;

    /// Every cache row, ordered deterministically. For tests and
    /// idempotence comparisons.
    async fn all_rows(&self) -> Result<Vec<PermissionRow>>;
}

/// A complete storage backend: tree, grants, and cache together.
pub trait Backend: TreeStore + GrantStore + CacheStore {}

impl<T: TreeStore + GrantStore + CacheStore> Backend for T {}
