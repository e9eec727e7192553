//! End-to-end convergence tests: mutate through the service, drain the
//! queue through the engine, then check the materialized cache and the
//! resolver agree.

use std::sync::Arc;

use canopy_acl::core::{MaintenanceOp, NodeId, PermissionLevel, UserId};
use canopy_acl::engine::{MaintenanceEngine, MemoryQueue, OpOutcome};
use canopy_acl::store::{CacheStore, MemoryBackend};
use canopy_acl::{AclConfig, AclService};

struct Harness {
    service: AclService<MemoryBackend, MemoryQueue>,
    engine: MaintenanceEngine<MemoryBackend>,
    queue: Arc<MemoryQueue>,
}

impl Harness {
    fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let queue = Arc::new(MemoryQueue::new());
        Self {
            service: AclService::new(Arc::clone(&backend), Arc::clone(&queue), AclConfig::default()),
            engine: MaintenanceEngine::new(backend),
            queue,
        }
    }

    /// Apply every queued operation, in order, until the queue is empty.
    async fn drain(&self) {
        while let Some(job) = self.queue.try_pull() {
            let op = MaintenanceOp::from_json_bytes(&job.payload).unwrap();
            self.engine.apply(&op).await.unwrap();
        }
    }

    fn backend(&self) -> &Arc<MemoryBackend> {
        self.service.backend()
    }
}

#[tokio::test]
async fn owner_row_materializes_on_creation() {
    let h = Harness::new();
    let owner = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    h.drain().await;

    let row = h.backend().get_row(root, Some(owner)).await.unwrap().unwrap();
    assert_eq!(row.level, PermissionLevel::Admin);
    assert!(row.is_ownership());
}

#[tokio::test]
async fn grant_covers_existing_descendants() {
    let h = Harness::new();
    let owner = UserId::generate();
    let reader = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    let child = h.service.create_node(root, owner, owner).await.unwrap();
    let grandchild = h.service.create_node(child, owner, owner).await.unwrap();

    let grant = h
        .service
        .create_grant(root, Some(reader), PermissionLevel::Read, owner)
        .await
        .unwrap();
    h.drain().await;

    for node in [root, child, grandchild] {
        let row = h.backend().get_row(node, Some(reader)).await.unwrap().unwrap();
        assert_eq!(row.level, PermissionLevel::Read);
        assert_eq!(row.source, Some(grant));
        assert!(h
            .service
            .allowed(node, Some(reader), PermissionLevel::Read)
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn nearer_grant_wins_even_when_stronger_sits_farther() {
    let h = Harness::new();
    let owner = UserId::generate();
    let user = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    let child = h.service.create_node(root, owner, owner).await.unwrap();
    let grandchild = h.service.create_node(child, owner, owner).await.unwrap();

    let far = h
        .service
        .create_grant(root, Some(user), PermissionLevel::Read, owner)
        .await
        .unwrap();
    // The nearer grant is *stronger*; the win is positional, not by level.
    let near = h
        .service
        .create_grant(child, Some(user), PermissionLevel::Write, owner)
        .await
        .unwrap();
    h.drain().await;

    let row = h.backend().get_row(grandchild, Some(user)).await.unwrap().unwrap();
    assert_eq!(row.level, PermissionLevel::Write);
    assert_eq!(row.source, Some(near));

    // Destroying the nearer grant restores the farther one everywhere.
    h.service.destroy_grant(near, owner).await.unwrap();
    h.drain().await;

    let row = h.backend().get_row(grandchild, Some(user)).await.unwrap().unwrap();
    assert_eq!(row.level, PermissionLevel::Read);
    assert_eq!(row.source, Some(far));
    assert!(!h
        .service
        .allowed(grandchild, Some(user), PermissionLevel::Write)
        .await
        .unwrap());
}

#[tokio::test]
async fn move_picks_up_grants_on_the_new_path() {
    let h = Harness::new();
    let owner = UserId::generate();
    let user = UserId::generate();

    let plain_root = h.service.create_root(owner).await.unwrap();
    let shared_root = h.service.create_root(owner).await.unwrap();
    let node = h.service.create_node(plain_root, owner, owner).await.unwrap();

    h.service
        .create_grant(shared_root, Some(user), PermissionLevel::Admin, owner)
        .await
        .unwrap();
    h.drain().await;
    assert!(!h
        .service
        .allowed(node, Some(user), PermissionLevel::Admin)
        .await
        .unwrap());

    h.service.move_node(node, shared_root, owner).await.unwrap();
    h.drain().await;

    let row = h.backend().get_row(node, Some(user)).await.unwrap().unwrap();
    assert_eq!(row.level, PermissionLevel::Admin);
    assert!(h
        .service
        .allowed(node, Some(user), PermissionLevel::Admin)
        .await
        .unwrap());
}

#[tokio::test]
async fn move_away_revokes_inherited_access() {
    let h = Harness::new();
    let owner = UserId::generate();
    let user = UserId::generate();

    let shared_root = h.service.create_root(owner).await.unwrap();
    let plain_root = h.service.create_root(owner).await.unwrap();
    let node = h.service.create_node(shared_root, owner, owner).await.unwrap();
    let leaf = h.service.create_node(node, owner, owner).await.unwrap();

    h.service
        .create_grant(shared_root, Some(user), PermissionLevel::Write, owner)
        .await
        .unwrap();
    h.drain().await;
    assert!(h
        .service
        .allowed(leaf, Some(user), PermissionLevel::Write)
        .await
        .unwrap());

    h.service.move_node(node, plain_root, owner).await.unwrap();
    h.drain().await;

    // The whole moved subtree lost the inherited rows.
    for target in [node, leaf] {
        assert!(h.backend().get_row(target, Some(user)).await.unwrap().is_none());
        assert!(!h
            .service
            .allowed(target, Some(user), PermissionLevel::Read)
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn ownership_swap_leaves_exactly_one_ownership_row() {
    let h = Harness::new();
    let old_owner = UserId::generate();
    let new_owner = UserId::generate();

    let root = h.service.create_root(old_owner).await.unwrap();
    h.drain().await;

    h.service
        .reassign_owner(root, new_owner, old_owner)
        .await
        .unwrap();
    h.drain().await;

    assert!(h.backend().get_row(root, Some(old_owner)).await.unwrap().is_none());
    let row = h.backend().get_row(root, Some(new_owner)).await.unwrap().unwrap();
    assert!(row.is_ownership());
    assert_eq!(row.level, PermissionLevel::Admin);

    let ownership_rows = h
        .backend()
        .rows_for_node(root)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.is_ownership())
        .count();
    assert_eq!(ownership_rows, 1);
}

#[tokio::test]
async fn old_owner_falls_back_to_their_ancestor_grant() {
    let h = Harness::new();
    let owner = UserId::generate();
    let successor = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    let child = h.service.create_node(root, owner, owner).await.unwrap();
    h.drain().await;

    // The outgoing owner keeps a read grant at the root.
    h.service
        .create_grant(root, Some(owner), PermissionLevel::Read, owner)
        .await
        .unwrap();
    h.service.reassign_owner(child, successor, owner).await.unwrap();
    h.drain().await;

    // Ownership swapped; the old owner's access degraded to the grant.
    let row = h.backend().get_row(child, Some(owner)).await.unwrap().unwrap();
    assert!(!row.is_ownership());
    assert_eq!(row.level, PermissionLevel::Read);
}

#[tokio::test]
async fn operations_on_deleted_targets_are_silent() {
    let h = Harness::new();
    let owner = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    let ghost = NodeId::generate();

    // Jobs referencing missing entities complete without rows or errors.
    for op in [
        MaintenanceOp::CacheOwner { node: ghost },
        MaintenanceOp::RebuildForNode { node: ghost },
        MaintenanceOp::RebuildUserCacheForSubtree {
            node: ghost,
            user: Some(owner),
        },
    ] {
        assert_eq!(h.engine.apply(&op).await.unwrap(), OpOutcome::Skipped);
    }

    h.service.delete_node(root, owner).await.unwrap();
    h.drain().await;
    assert!(h.backend().all_rows().await.unwrap().is_empty());
}

#[tokio::test]
async fn replaying_the_backlog_is_byte_identical() {
    let h = Harness::new();
    let owner = UserId::generate();
    let user = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    let child = h.service.create_node(root, owner, owner).await.unwrap();
    h.service
        .create_grant(root, Some(user), PermissionLevel::Feedback, owner)
        .await
        .unwrap();
    h.service
        .create_grant(child, None, PermissionLevel::Read, owner)
        .await
        .unwrap();

    // Capture the backlog, run it once, snapshot, run it all again.
    let mut ops = Vec::new();
    while let Some(job) = h.queue.try_pull() {
        ops.push(MaintenanceOp::from_json_bytes(&job.payload).unwrap());
    }
    for op in &ops {
        h.engine.apply(op).await.unwrap();
    }
    let converged = h.backend().all_rows().await.unwrap();
    assert!(!converged.is_empty());

    for op in &ops {
        h.engine.apply(op).await.unwrap();
    }
    assert_eq!(h.backend().all_rows().await.unwrap(), converged);

    // Out-of-order replay converges to the same state too.
    for op in ops.iter().rev() {
        h.engine.apply(op).await.unwrap();
    }
    assert_eq!(h.backend().all_rows().await.unwrap(), converged);
}

#[tokio::test]
async fn public_grant_floors_everyone_until_shadowed() {
    let h = Harness::new();
    let owner = UserId::generate();
    let user = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    h.service
        .create_grant(root, None, PermissionLevel::Read, owner)
        .await
        .unwrap();
    h.drain().await;

    // Anonymous and signed-in subjects read through the public row.
    assert!(h.service.allowed(root, None, PermissionLevel::Read).await.unwrap());
    assert!(h
        .service
        .allowed(root, Some(user), PermissionLevel::Read)
        .await
        .unwrap());

    // An explicit grant for the user shadows the public one.
    h.service
        .create_grant(root, Some(user), PermissionLevel::Write, owner)
        .await
        .unwrap();
    h.drain().await;
    assert!(h
        .service
        .allowed(root, Some(user), PermissionLevel::Write)
        .await
        .unwrap());
    assert!(!h.service.allowed(root, None, PermissionLevel::Write).await.unwrap());
}

#[tokio::test]
async fn listing_never_walks_ancestors() {
    let h = Harness::new();
    let owner = UserId::generate();
    let user = UserId::generate();

    let root = h.service.create_root(owner).await.unwrap();
    let child = h.service.create_node(root, owner, owner).await.unwrap();
    let private = h.service.create_root(owner).await.unwrap();

    h.service
        .create_grant(root, Some(user), PermissionLevel::Feedback, owner)
        .await
        .unwrap();
    h.drain().await;

    let mut listed = h
        .service
        .accessible_nodes(Some(user), PermissionLevel::Feedback)
        .await
        .unwrap();
    listed.sort();
    let mut expected = vec![root, child];
    expected.sort();
    assert_eq!(listed, expected);
    assert!(!listed.contains(&private));
}
