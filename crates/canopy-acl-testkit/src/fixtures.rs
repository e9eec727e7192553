//! Test fixtures and helpers.
//!
//! Common setup code for integration and property tests: an in-memory
//! backend, an engine, a queue, and deterministic identifiers.

use std::sync::Arc;

use uuid::Uuid;

use canopy_acl::{AclConfig, AclService};
use canopy_acl_core::{GrantId, MaintenanceOp, Node, NodeId, PermissionLevel, ShareGrant, UserId};
use canopy_acl_engine::{MaintenanceEngine, MemoryQueue};
use canopy_acl_store::{GrantStore, MemoryBackend, TreeStore};

/// A test fixture bundling a memory backend, an engine over it, and an
/// in-process queue.
pub struct TestFixture {
    pub backend: Arc<MemoryBackend>,
    pub engine: MaintenanceEngine<MemoryBackend>,
    pub queue: Arc<MemoryQueue>,
}

impl TestFixture {
    /// Create a fresh fixture.
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let engine = MaintenanceEngine::new(Arc::clone(&backend));
        Self {
            backend,
            engine,
            queue: Arc::new(MemoryQueue::new()),
        }
    }

    /// An ACL service sharing this fixture's backend and queue.
    pub fn service(&self) -> AclService<MemoryBackend, MemoryQueue> {
        AclService::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.queue),
            AclConfig::default(),
        )
    }

    /// Insert a root node and materialize its ownership row.
    pub async fn make_root(&self, owner: UserId) -> NodeId {
        let node = Node::new(NodeId::generate(), owner, None);
        self.backend.insert_node(&node).await.expect("insert root");
        self.engine
            .apply(&MaintenanceOp::CacheOwner { node: node.id })
            .await
            .expect("cache owner");
        node.id
    }

    /// Insert a child node and materialize its ownership row.
    pub async fn make_child(&self, parent: NodeId, owner: UserId) -> NodeId {
        let node = Node::new(NodeId::generate(), owner, Some(parent));
        self.backend.insert_node(&node).await.expect("insert child");
        self.engine
            .apply(&MaintenanceOp::CacheOwner { node: node.id })
            .await
            .expect("cache owner");
        node.id
    }

    /// Create a grant and propagate it.
    pub async fn make_grant(
        &self,
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
        self.backend.create_grant(&grant).await.expect("create grant");
        self.engine
            .apply(&MaintenanceOp::PropagateShare { grant: grant.id })
            .await
            .expect("propagate");
        grant.id
    }

    /// Apply every queued operation, in order, until the queue is empty.
    pub async fn drain(&self) {
        while let Some(job) = self.queue.try_pull() {
            let op = MaintenanceOp::from_json_bytes(&job.payload).expect("decode job");
            self.engine.apply(&op).await.expect("apply job");
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// The nth deterministic user id (1-based internally; never the nil
/// UUID, which is the storage sentinel for the public subject).
pub fn nth_user(n: u32) -> UserId {
    UserId::from_uuid(Uuid::from_u128(0x5eed_0000_0000_0000_0000_0000_0000 + n as u128 + 1))
}

/// The nth deterministic node id.
pub fn nth_node(n: u32) -> NodeId {
    NodeId::from_uuid(Uuid::from_u128(0x0de0_0000_0000_0000_0000_0000_0000 + n as u128 + 1))
}
