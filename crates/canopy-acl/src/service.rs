//! The ACL service: the transactional mutation surface of the
//! permission engine.
//!
//! Every mutation follows the same shape: authorize via the strict path,
//! commit the store mutation, evict affected memo entries synchronously,
//! then enqueue the maintenance operation. The commit happens before the
//! enqueue, so a worker picking up the job always sees at least the
//! triggering state.

use std::collections::BTreeSet;
use std::sync::Arc;

use canopy_acl_core::{
    GrantId, MaintenanceOp, Node, NodeId, PermissionLevel, ShareGrant, UserId,
};
use canopy_acl_engine::{Job, TaskQueue};
use canopy_acl_resolve::{MemoConfig, PermissionResolver};
use canopy_acl_store::Backend;

use crate::error::{AclError, Result};

/// Configuration for the ACL service.
#[derive(Debug, Clone, Default)]
pub struct AclConfig {
    /// Memo tuning for the resolver.
    pub memo: MemoConfig,
}

/// The unified permission surface the rest of the application calls.
///
/// Reads go through the embedded [`PermissionResolver`]; mutations go
/// through the methods here, which keep the memo strongly consistent and
/// the materialized cache eventually consistent via the queue.
pub struct AclService<B, Q> {
    backend: Arc<B>,
    queue: Arc<Q>,
    resolver: PermissionResolver<B>,
}

impl<B: Backend, Q: TaskQueue> AclService<B, Q> {
    /// Create a service over the given backend and task queue.
    pub fn new(backend: Arc<B>, queue: Arc<Q>, config: AclConfig) -> Self {
        let resolver = PermissionResolver::new(Arc::clone(&backend), config.memo);
        Self {
            backend,
            queue,
            resolver,
        }
    }

    /// The storage backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The resolver (and through it, the memo).
    pub fn resolver(&self) -> &PermissionResolver<B> {
        &self.resolver
    }

    // ─────────────────────────────────────────────────────────────────────
    // Read Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Whether `user` holds at least `level` on `node`.
    pub async fn allowed(
        &self,
        node: NodeId,
        user: Option<UserId>,
        level: PermissionLevel,
    ) -> Result<bool> {
        Ok(self.resolver.allowed(node, user, level).await?)
    }

    /// Strict resolution from live grants; for high-stakes checks.
    pub async fn allowed_strict(
        &self,
        node: NodeId,
        user: Option<UserId>,
        level: PermissionLevel,
    ) -> Result<bool> {
        Ok(self.resolver.allowed_strict(node, user, level).await?)
    }

    /// Every node where `user` holds at least `min_level`.
    pub async fn accessible_nodes(
        &self,
        user: Option<UserId>,
        min_level: PermissionLevel,
    ) -> Result<Vec<NodeId>> {
        Ok(self.resolver.accessible_nodes(user, min_level).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Node Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Create a root node owned by `owner`.
    pub async fn create_root(&self, owner: UserId) -> Result<NodeId> {
        let node = Node::new(NodeId::generate(), owner, None);
        self.backend.insert_node(&node).await?;
        self.enqueue(MaintenanceOp::CacheOwner { node: node.id })
            .await?;
        Ok(node.id)
    }

    /// Create a child node under `parent`, owned by `owner`.
    pub async fn create_node(
        &self,
        parent: NodeId,
        owner: UserId,
        actor: UserId,
    ) -> Result<NodeId> {
        self.require(parent, actor, PermissionLevel::Write).await?;

        let node = Node::new(NodeId::generate(), owner, Some(parent));
        self.backend.insert_node(&node).await?;
        self.enqueue(MaintenanceOp::CacheOwner { node: node.id })
            .await?;
        Ok(node.id)
    }

    /// Create a link under `parent` deferring to `origin`.
    ///
    /// Links carry no cache rows of their own; every check on the link
    /// resolves against the canonical origin.
    pub async fn create_link(
        &self,
        origin: NodeId,
        parent: NodeId,
        actor: UserId,
    ) -> Result<NodeId> {
        self.require(parent, actor, PermissionLevel::Write).await?;
        self.require(origin, actor, PermissionLevel::Read).await?;

        let canon = self
            .backend
            .canonical(origin)
            .await?
            .ok_or(AclError::NodeNotFound(origin))?;
        let link = Node::link(NodeId::generate(), canon, Some(parent));
        self.backend.insert_node(&link).await?;
        Ok(link.id)
    }

    /// Move `node` under `new_parent`.
    ///
    /// The affected subject set is every owner and grant subject
    /// reachable from the old *or* the new ancestor path, plus owners
    /// inside the moved subtree; their memo entries are evicted before
    /// this returns, and one rebuild converges the cache.
    pub async fn move_node(
        &self,
        node: NodeId,
        new_parent: NodeId,
        actor: UserId,
    ) -> Result<()> {
        self.require(node, actor, PermissionLevel::Write).await?;
        self.require(new_parent, actor, PermissionLevel::Write)
            .await?;

        let old_path = self.backend.ancestors(node).await?;
        self.backend.move_node(node, new_parent).await?;
        let new_path = self.backend.ancestors(node).await?;

        let mut subjects: BTreeSet<Option<UserId>> = BTreeSet::new();
        for grant in self.backend.grants_on_any(&old_path).await? {
            subjects.insert(grant.user);
        }
        for grant in self.backend.grants_on_any(&new_path).await? {
            subjects.insert(grant.user);
        }

        let mut subtree = vec![node];
        subtree.extend(self.backend.descendants(node).await?);
        for &member in &subtree {
            if let Some(owner) = self.backend.owner(member).await? {
                subjects.insert(Some(owner));
            }
        }

        let subjects: Vec<Option<UserId>> = subjects.into_iter().collect();
        self.resolver.memo().evict_subjects(&subtree, &subjects);

        self.enqueue(MaintenanceOp::RebuildForNode { node }).await
    }

    /// Delete `node` and its whole subtree.
    ///
    /// The cascade removes grants and cache rows transactionally, so no
    /// maintenance operation is needed; memo entries for the deleted
    /// subtree are evicted before returning.
    pub async fn delete_node(&self, node: NodeId, actor: UserId) -> Result<()> {
        self.require(node, actor, PermissionLevel::Admin).await?;

        let deleted = self.backend.delete_node(node).await?;
        self.resolver.memo().evict_nodes(&deleted);
        Ok(())
    }

    /// Reassign ownership of `node` to `new_owner`.
    pub async fn reassign_owner(
        &self,
        node: NodeId,
        new_owner: UserId,
        actor: UserId,
    ) -> Result<()> {
        self.require(node, actor, PermissionLevel::Admin).await?;

        let canon = self
            .backend
            .canonical(node)
            .await?
            .ok_or(AclError::NodeNotFound(node))?;
        let old_owner = self.backend.owner(canon).await?;
        if old_owner == Some(new_owner) {
            return Ok(());
        }
        self.backend.set_owner(canon, new_owner).await?;

        let mut subtree = vec![canon];
        subtree.extend(self.backend.descendants(canon).await?);

        match old_owner {
            Some(old) => {
                self.resolver
                    .memo()
                    .evict_subjects(&subtree, &[Some(old), Some(new_owner)]);
                self.enqueue(MaintenanceOp::UpdateOwner {
                    node: canon,
                    old_owner: old,
                    new_owner,
                })
                .await?;
                // A still-standing ancestor grant of the old owner should
                // re-materialize without waiting for an unrelated rebuild.
                self.enqueue(MaintenanceOp::RebuildUserCacheForSubtree {
                    node: canon,
                    user: Some(old),
                })
                .await
            }
            None => {
                self.resolver
                    .memo()
                    .evict_subjects(&subtree, &[Some(new_owner)]);
                self.enqueue(MaintenanceOp::CacheOwner { node: canon }).await
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Grant Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Create a share grant on `node` for `user` (`None` = public).
    ///
    /// Fails with `DuplicateGrant` when the `(node, subject)` pair is
    /// already granted. The memo for the affected subtree and subject is
    /// evicted before this returns; the cache converges via the queue.
    pub async fn create_grant(
        &self,
        node: NodeId,
        user: Option<UserId>,
        level: PermissionLevel,
        actor: UserId,
    ) -> Result<GrantId> {
        self.require(node, actor, PermissionLevel::Admin).await?;

        let canon = self
            .backend
            .canonical(node)
            .await?
            .ok_or(AclError::NodeNotFound(node))?;
        let grant = ShareGrant {
            id: GrantId::generate(),
            node: canon,
            user,
            level,
        };
        self.backend.create_grant(&grant).await?;

        self.evict_subtree_memo(canon, user).await?;
        self.enqueue(MaintenanceOp::PropagateShare { grant: grant.id })
            .await?;
        Ok(grant.id)
    }

    /// Destroy a grant. Idempotent: destroying an already-missing grant
    /// succeeds without side effects.
    pub async fn destroy_grant(&self, grant: GrantId, actor: UserId) -> Result<()> {
        let Some(record) = self.backend.get_grant(grant).await? else {
            return Ok(());
        };
        self.require(record.node, actor, PermissionLevel::Admin)
            .await?;

        if !self.backend.destroy_grant(grant).await? {
            // Raced another destroy; that path owns the repair.
            return Ok(());
        }

        self.evict_subtree_memo(record.node, record.user).await?;
        self.enqueue(MaintenanceOp::RemoveShare {
            grant: record.id,
            node: record.node,
            user: record.user,
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// Authorize a mutation via the strict path.
    async fn require(&self, node: NodeId, actor: UserId, level: PermissionLevel) -> Result<()> {
        if self
            .resolver
            .allowed_strict(node, Some(actor), level)
            .await?
        {
            Ok(())
        } else {
            Err(AclError::Forbidden {
                node,
                actor,
                required: level,
            })
        }
    }

    /// Evict memo entries for a subject across a node's subtree.
    async fn evict_subtree_memo(&self, node: NodeId, user: Option<UserId>) -> Result<()> {
        let mut subtree = vec![node];
        subtree.extend(self.backend.descendants(node).await?);
        self.resolver.memo().evict_subjects(&subtree, &[user]);
        Ok(())
    }

    /// Hand a maintenance operation to the queue.
    async fn enqueue(&self, op: MaintenanceOp) -> Result<()> {
        let job = Job::from_op(&op)?;
        self.queue.push(job).await?;
        Ok(())
    }
}
