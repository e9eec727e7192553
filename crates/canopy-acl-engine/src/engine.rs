//! The cache maintenance engine.
//!
//! Every operation here is an idempotent recomputation against *current*
//! persisted state - never a delta against state captured at enqueue
//! time. Workers may run concurrently and deliveries may be reordered; a
//! stale job that runs after a fresher one simply recomputes the same
//! answer. A referenced node or grant that has since been deleted makes
//! the operation a successful no-op, not an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use canopy_acl_core::{
    GrantId, MaintenanceOp, NodeId, PermissionRow, ShareGrant, UserId,
};
use canopy_acl_store::Backend;

use crate::error::Result;

/// Result of applying a maintenance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// The operation ran against live state.
    Applied,
    /// The referenced node or grant no longer exists; nothing to do.
    ///
    /// A benign race: the deletion's own cascade already produced (or
    /// will produce) the correct cache state.
    Skipped,
}

/// Executes maintenance operations against a storage backend.
///
/// The engine is the only writer of the materialized permission cache.
/// It takes no locks of its own: operations touching disjoint
/// `(node, subject)` sets write disjoint rows, and overlapping operations
/// converge because each one re-reads fresh state.
pub struct MaintenanceEngine<B> {
    backend: Arc<B>,
}

impl<B: Backend> MaintenanceEngine<B> {
    /// Create an engine over the given backend.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// The backend this engine writes through.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Apply a single maintenance operation.
    pub async fn apply(&self, op: &MaintenanceOp) -> Result<OpOutcome> {
        match *op {
            MaintenanceOp::CacheOwner { node } => self.cache_owner(node).await,
            MaintenanceOp::UpdateOwner {
                node,
                old_owner,
                new_owner,
            } => self.update_owner(node, old_owner, new_owner).await,
            MaintenanceOp::RebuildForNode { node } => self.rebuild_for_node(node).await,
            MaintenanceOp::PropagateShare { grant } => self.propagate_share(grant).await,
            MaintenanceOp::RemoveShare { grant, node, user } => {
                self.remove_share(grant, node, user).await
            }
            MaintenanceOp::RebuildUserCacheForSubtree { node, user } => {
                self.rebuild_user_subtree(node, user).await
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Upsert the ownership row for a node.
    async fn cache_owner(&self, node: NodeId) -> Result<OpOutcome> {
        let Some(canon) = self.backend.canonical(node).await? else {
            return Ok(OpOutcome::Skipped);
        };
        let Some(owner) = self.backend.owner(canon).await? else {
            // Ownerless is a transient creation state; the follow-up
            // assignment enqueues its own operation.
            return Ok(OpOutcome::Skipped);
        };
        self.backend.upsert_owner_row(canon, owner).await?;
        Ok(OpOutcome::Applied)
    }

    /// Swap the ownership row from `old_owner` to `new_owner`.
    async fn update_owner(
        &self,
        node: NodeId,
        old_owner: UserId,
        new_owner: UserId,
    ) -> Result<OpOutcome> {
        let Some(canon) = self.backend.canonical(node).await? else {
            return Ok(OpOutcome::Skipped);
        };
        self.backend.delete_owner_row(canon, old_owner).await?;
        self.backend.upsert_owner_row(canon, new_owner).await?;
        Ok(OpOutcome::Applied)
    }

    /// Re-resolve every affected subject over a moved node's subtree.
    ///
    /// The affected set is derived from current state alone: the owner,
    /// grant subjects along the current ancestor path, and the subjects
    /// of cache rows already present on the subtree - those rows are the
    /// residue of the old path, so old-path holders are covered without
    /// the job carrying a snapshot.
    async fn rebuild_for_node(&self, node: NodeId) -> Result<OpOutcome> {
        let Some(canon) = self.backend.canonical(node).await? else {
            return Ok(OpOutcome::Skipped);
        };

        let path = self.backend.ancestors(canon).await?;
        let targets = self.subtree_targets(canon).await?;

        let mut subjects: BTreeSet<Option<UserId>> = BTreeSet::new();
        if let Some(owner) = self.backend.owner(canon).await? {
            subjects.insert(Some(owner));
        }
        for grant in self.backend.grants_on_any(&path).await? {
            subjects.insert(grant.user);
        }
        for &target in &targets {
            for row in self.backend.rows_for_node(target).await? {
                subjects.insert(row.user);
            }
        }

        for subject in subjects {
            self.rebuild_rows(&targets, subject).await?;
        }
        Ok(OpOutcome::Applied)
    }

    /// Materialize a grant over its node's subtree.
    ///
    /// Each target resolves its own nearest grant rather than taking the
    /// new grant unconditionally: a target below a nearer grant for the
    /// same subject keeps that nearer resolution regardless of creation
    /// order.
    async fn propagate_share(&self, grant: GrantId) -> Result<OpOutcome> {
        let Some(grant) = self.backend.get_grant(grant).await? else {
            return Ok(OpOutcome::Skipped);
        };
        self.rebuild_user_subtree(grant.node, grant.user).await
    }

    /// Remove every row derived from a destroyed grant, then re-derive
    /// state for every subject that had flowed through it.
    ///
    /// The grant itself is normally already gone here, which is why the
    /// operation carries the node and subject it used to cover. Every
    /// subject with rows sourced from the grant is rebuilt, not just the
    /// grant's own - rows are self-healing, whatever wrote them.
    async fn remove_share(
        &self,
        grant: GrantId,
        node: NodeId,
        user: Option<UserId>,
    ) -> Result<OpOutcome> {
        let mut subjects: BTreeSet<Option<UserId>> = BTreeSet::new();
        subjects.insert(user);
        for subject in self.backend.subjects_for_source(grant).await? {
            subjects.insert(subject);
        }

        self.backend.delete_rows_by_source(grant).await?;

        let Some(canon) = self.backend.canonical(node).await? else {
            return Ok(OpOutcome::Skipped);
        };
        let targets = self.subtree_targets(canon).await?;

        for subject in subjects {
            self.rebuild_rows(&targets, subject).await?;
        }
        Ok(OpOutcome::Applied)
    }

    /// Re-resolve one subject's rows over a node and its subtree.
    async fn rebuild_user_subtree(
        &self,
        node: NodeId,
        user: Option<UserId>,
    ) -> Result<OpOutcome> {
        let Some(canon) = self.backend.canonical(node).await? else {
            return Ok(OpOutcome::Skipped);
        };
        let targets = self.subtree_targets(canon).await?;
        self.rebuild_rows(&targets, user).await?;
        Ok(OpOutcome::Applied)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────

    /// The node and its descendants, links excluded: links carry no rows
    /// of their own, they defer to their canonical origin.
    async fn subtree_targets(&self, canon: NodeId) -> Result<Vec<NodeId>> {
        let mut targets = vec![canon];
        for node in self.backend.descendants(canon).await? {
            if let Some(record) = self.backend.get_node(node).await? {
                if !record.is_link() {
                    targets.push(node);
                }
            }
        }
        Ok(targets)
    }

    /// Rewrite one subject's cache row on each target from the nearest
    /// grant along that target's own ancestor path; delete the row when
    /// nothing resolves. Ownership rows are left standing either way.
    async fn rebuild_rows(&self, targets: &[NodeId], user: Option<UserId>) -> Result<()> {
        for &target in targets {
            let path = self.backend.ancestors(target).await?;
            match self.nearest_grant(&path, user).await? {
                Some(grant) => {
                    self.backend
                        .upsert_grant_row(&PermissionRow::derived(
                            target, user, grant.level, grant.id,
                        ))
                        .await?;
                }
                None => {
                    self.backend.delete_grant_row(target, user).await?;
                }
            }
        }
        Ok(())
    }

    /// The first grant for `user` along an ancestor path ordered
    /// nearest to farthest.
    ///
    /// A user's explicit grants shadow public grants along the whole
    /// path: the public grant is a fallback only when the user holds no
    /// explicit grant on any ancestor. This keeps per-subject rebuilds
    /// independent and matches the resolver's row precedence.
    async fn nearest_grant(
        &self,
        path: &[NodeId],
        user: Option<UserId>,
    ) -> Result<Option<ShareGrant>> {
        if user.is_some() {
            for &ancestor in path {
                if let Some(grant) = self.backend.grant_for(ancestor, user).await? {
                    return Ok(Some(grant));
                }
            }
            return Ok(None);
        }
        for &ancestor in path {
            if let Some(grant) = self.backend.grant_for(ancestor, None).await? {
                return Ok(Some(grant));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_acl_core::{Node, PermissionLevel};
    use canopy_acl_store::{CacheStore, GrantStore, MemoryBackend, TreeStore};

    struct Tree {
        backend: Arc<MemoryBackend>,
        engine: MaintenanceEngine<MemoryBackend>,
        owner: UserId,
        root: NodeId,
        child: NodeId,
        grandchild: NodeId,
    }

    /// root -> child -> grandchild, all owned by one user.
    async fn make_tree() -> Tree {
        let backend = Arc::new(MemoryBackend::new());
        let engine = MaintenanceEngine::new(Arc::clone(&backend));
        let owner = UserId::generate();

        let root = Node::new(NodeId::generate(), owner, None);
        let child = Node::new(NodeId::generate(), owner, Some(root.id));
        let grandchild = Node::new(NodeId::generate(), owner, Some(child.id));
        backend.insert_node(&root).await.unwrap();
        backend.insert_node(&child).await.unwrap();
        backend.insert_node(&grandchild).await.unwrap();

        Tree {
            backend,
            engine,
            owner,
            root: root.id,
            child: child.id,
            grandchild: grandchild.id,
        }
    }

    async fn grant(
        tree: &Tree,
        node: NodeId,
        user: Option<UserId>,
        level: PermissionLevel,
    ) -> GrantId {
        let grant = ShareGrant {
            id: GrantId::generate(),
            node,
            user,
            level,
        };
        tree.backend.create_grant(&grant).await.unwrap();
        tree.engine
            .apply(&MaintenanceOp::PropagateShare { grant: grant.id })
            .await
            .unwrap();
        grant.id
    }

    #[tokio::test]
    async fn test_cache_owner_writes_admin_row() {
        let tree = make_tree().await;
        let outcome = tree
            .engine
            .apply(&MaintenanceOp::CacheOwner { node: tree.root })
            .await
            .unwrap();
        assert_eq!(outcome, OpOutcome::Applied);

        let row = tree
            .backend
            .get_row(tree.root, Some(tree.owner))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_ownership());
        assert_eq!(row.level, PermissionLevel::Admin);
    }

    #[tokio::test]
    async fn test_cache_owner_on_deleted_node_is_noop() {
        let tree = make_tree().await;
        tree.backend.delete_node(tree.root).await.unwrap();

        let outcome = tree
            .engine
            .apply(&MaintenanceOp::CacheOwner { node: tree.root })
            .await
            .unwrap();
        assert_eq!(outcome, OpOutcome::Skipped);
        assert!(tree.backend.all_rows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_propagate_covers_subtree() {
        let tree = make_tree().await;
        let reader = UserId::generate();
        let grant_id = grant(&tree, tree.root, Some(reader), PermissionLevel::Read).await;

        for node in [tree.root, tree.child, tree.grandchild] {
            let row = tree.backend.get_row(node, Some(reader)).await.unwrap().unwrap();
            assert_eq!(row.level, PermissionLevel::Read);
            assert_eq!(row.source, Some(grant_id));
        }
    }

    #[tokio::test]
    async fn test_closest_grant_wins_regardless_of_level() {
        let tree = make_tree().await;
        let user = UserId::generate();

        // Stronger grant at the root, weaker one closer on the child:
        // the child's subtree resolves to the weaker level.
        grant(&tree, tree.root, Some(user), PermissionLevel::Admin).await;
        let near = grant(&tree, tree.child, Some(user), PermissionLevel::Read).await;

        let row = tree
            .backend
            .get_row(tree.grandchild, Some(user))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.level, PermissionLevel::Read);
        assert_eq!(row.source, Some(near));
    }

    #[tokio::test]
    async fn test_closest_wins_independent_of_creation_order() {
        let tree = make_tree().await;
        let user = UserId::generate();

        // The nearer grant exists first; propagating the farther,
        // stronger grant afterwards must not capture the near subtree.
        let near = grant(&tree, tree.child, Some(user), PermissionLevel::Read).await;
        grant(&tree, tree.root, Some(user), PermissionLevel::Admin).await;

        let row = tree
            .backend
            .get_row(tree.grandchild, Some(user))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.level, PermissionLevel::Read);
        assert_eq!(row.source, Some(near));

        let root_row = tree.backend.get_row(tree.root, Some(user)).await.unwrap().unwrap();
        assert_eq!(root_row.level, PermissionLevel::Admin);
    }

    #[tokio::test]
    async fn test_remove_share_restores_shadowed_grant() {
        let tree = make_tree().await;
        let user = UserId::generate();

        let far = grant(&tree, tree.root, Some(user), PermissionLevel::Read).await;
        let near = grant(&tree, tree.child, Some(user), PermissionLevel::Write).await;

        tree.backend.destroy_grant(near).await.unwrap();
        tree.engine
            .apply(&MaintenanceOp::RemoveShare {
                grant: near,
                node: tree.child,
                user: Some(user),
            })
            .await
            .unwrap();

        let row = tree
            .backend
            .get_row(tree.grandchild, Some(user))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.level, PermissionLevel::Read);
        assert_eq!(row.source, Some(far));
    }

    #[tokio::test]
    async fn test_remove_last_share_clears_rows() {
        let tree = make_tree().await;
        let user = UserId::generate();

        let only = grant(&tree, tree.root, Some(user), PermissionLevel::Feedback).await;
        tree.backend.destroy_grant(only).await.unwrap();
        tree.engine
            .apply(&MaintenanceOp::RemoveShare {
                grant: only,
                node: tree.root,
                user: Some(user),
            })
            .await
            .unwrap();

        for node in [tree.root, tree.child, tree.grandchild] {
            assert!(tree.backend.get_row(node, Some(user)).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_user_rows_independent_of_public_grants() {
        let tree = make_tree().await;
        let user = UserId::generate();

        // A farther user grant and a nearer public grant. The user's own
        // grant keeps sourcing their rows; the public grant materializes
        // separately under the public subject.
        let own = grant(&tree, tree.root, Some(user), PermissionLevel::Read).await;
        let public = grant(&tree, tree.child, None, PermissionLevel::Write).await;

        tree.engine
            .apply(&MaintenanceOp::RebuildUserCacheForSubtree {
                node: tree.child,
                user: Some(user),
            })
            .await
            .unwrap();

        let row = tree.backend.get_row(tree.grandchild, Some(user)).await.unwrap().unwrap();
        assert_eq!(row.source, Some(own));
        let public_row = tree.backend.get_row(tree.grandchild, None).await.unwrap().unwrap();
        assert_eq!(public_row.source, Some(public));

        // Removing the public grant clears its rows and leaves the
        // user's untouched.
        tree.backend.destroy_grant(public).await.unwrap();
        tree.engine
            .apply(&MaintenanceOp::RemoveShare {
                grant: public,
                node: tree.child,
                user: None,
            })
            .await
            .unwrap();

        assert!(tree.backend.get_row(tree.grandchild, None).await.unwrap().is_none());
        let row = tree.backend.get_row(tree.grandchild, Some(user)).await.unwrap().unwrap();
        assert_eq!(row.level, PermissionLevel::Read);
    }

    #[tokio::test]
    async fn test_update_owner_swaps_single_ownership_row() {
        let tree = make_tree().await;
        let new_owner = UserId::generate();

        tree.engine
            .apply(&MaintenanceOp::CacheOwner { node: tree.root })
            .await
            .unwrap();
        tree.backend.set_owner(tree.root, new_owner).await.unwrap();
        tree.engine
            .apply(&MaintenanceOp::UpdateOwner {
                node: tree.root,
                old_owner: tree.owner,
                new_owner,
            })
            .await
            .unwrap();

        assert!(tree
            .backend
            .get_row(tree.root, Some(tree.owner))
            .await
            .unwrap()
            .is_none());
        let row = tree.backend.get_row(tree.root, Some(new_owner)).await.unwrap().unwrap();
        assert!(row.is_ownership());

        // Exactly one ownership row for the node system-wide.
        let ownership_rows: Vec<_> = tree
            .backend
            .rows_for_node(tree.root)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_ownership())
            .collect();
        assert_eq!(ownership_rows.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_for_node_after_move() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = MaintenanceEngine::new(Arc::clone(&backend));
        let owner = UserId::generate();
        let user = UserId::generate();

        // Two roots; the shared one carries an admin grant for `user`.
        let plain_root = Node::new(NodeId::generate(), owner, None);
        let shared_root = Node::new(NodeId::generate(), owner, None);
        let subject = Node::new(NodeId::generate(), owner, Some(plain_root.id));
        let leaf = Node::new(NodeId::generate(), owner, Some(subject.id));
        for n in [&plain_root, &shared_root, &subject, &leaf] {
            backend.insert_node(n).await.unwrap();
        }

        let admin_grant = ShareGrant::for_user(
            GrantId::generate(),
            shared_root.id,
            user,
            PermissionLevel::Admin,
        );
        backend.create_grant(&admin_grant).await.unwrap();
        engine
            .apply(&MaintenanceOp::PropagateShare {
                grant: admin_grant.id,
            })
            .await
            .unwrap();
        assert!(backend.get_row(subject.id, Some(user)).await.unwrap().is_none());

        backend.move_node(subject.id, shared_root.id).await.unwrap();
        engine
            .apply(&MaintenanceOp::RebuildForNode { node: subject.id })
            .await
            .unwrap();

        // The moved node and its descendant both pick up the grant.
        for node in [subject.id, leaf.id] {
            let row = backend.get_row(node, Some(user)).await.unwrap().unwrap();
            assert_eq!(row.level, PermissionLevel::Admin);
            assert_eq!(row.source, Some(admin_grant.id));
        }
    }

    #[tokio::test]
    async fn test_rebuild_for_node_clears_stale_rows_after_move_away() {
        let tree = make_tree().await;
        let user = UserId::generate();
        grant(&tree, tree.root, Some(user), PermissionLevel::Read).await;

        // Move the child out from under the granted root.
        let other_root = Node::new(NodeId::generate(), tree.owner, None);
        tree.backend.insert_node(&other_root).await.unwrap();
        tree.backend.move_node(tree.child, other_root.id).await.unwrap();

        tree.engine
            .apply(&MaintenanceOp::RebuildForNode { node: tree.child })
            .await
            .unwrap();

        // The stale rows from the old path are gone; the root keeps its own.
        assert!(tree.backend.get_row(tree.child, Some(user)).await.unwrap().is_none());
        assert!(tree.backend.get_row(tree.grandchild, Some(user)).await.unwrap().is_none());
        assert!(tree.backend.get_row(tree.root, Some(user)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_operations_are_idempotent() {
        let tree = make_tree().await;
        let user = UserId::generate();

        tree.engine
            .apply(&MaintenanceOp::CacheOwner { node: tree.root })
            .await
            .unwrap();
        let far = grant(&tree, tree.root, Some(user), PermissionLevel::Admin).await;
        let near = grant(&tree, tree.child, Some(user), PermissionLevel::Read).await;

        let before = tree.backend.all_rows().await.unwrap();
        for op in [
            MaintenanceOp::CacheOwner { node: tree.root },
            MaintenanceOp::PropagateShare { grant: far },
            MaintenanceOp::PropagateShare { grant: near },
            MaintenanceOp::RebuildForNode { node: tree.child },
            MaintenanceOp::RebuildUserCacheForSubtree {
                node: tree.root,
                user: Some(user),
            },
        ] {
            tree.engine.apply(&op).await.unwrap();
            tree.engine.apply(&op).await.unwrap();
        }
        let after = tree.backend.all_rows().await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_owner_subject_never_demoted_by_rebuild() {
        let tree = make_tree().await;

        tree.engine
            .apply(&MaintenanceOp::CacheOwner { node: tree.child })
            .await
            .unwrap();
        // The owner also holds an explicit read grant on the root.
        grant(&tree, tree.root, Some(tree.owner), PermissionLevel::Read).await;

        let row = tree
            .backend
            .get_row(tree.child, Some(tree.owner))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_ownership());
        assert_eq!(row.level, PermissionLevel::Admin);
    }

    #[tokio::test]
    async fn test_link_resolves_to_canonical_node() {
        let tree = make_tree().await;
        let link = Node::link(NodeId::generate(), tree.child, Some(tree.root));
        tree.backend.insert_node(&link).await.unwrap();

        let user = UserId::generate();
        let g = ShareGrant::for_user(GrantId::generate(), tree.child, user, PermissionLevel::Read);
        tree.backend.create_grant(&g).await.unwrap();

        // Rebuilding through the link id lands rows on the canonical node.
        tree.engine
            .apply(&MaintenanceOp::RebuildUserCacheForSubtree {
                node: link.id,
                user: Some(user),
            })
            .await
            .unwrap();

        assert!(tree.backend.get_row(link.id, Some(user)).await.unwrap().is_none());
        assert!(tree.backend.get_row(tree.child, Some(user)).await.unwrap().is_some());
    }
}
