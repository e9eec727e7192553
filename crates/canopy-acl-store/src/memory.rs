//! In-memory implementation of the store traits.
//!
//! Primarily for tests. Same semantics as the SQLite backend, no
//! persistence. Thread-safe via RwLock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use canopy_acl_core::{GrantId, Node, NodeId, PermissionLevel, PermissionRow, ShareGrant, UserId};

use crate::error::{Result, StoreError};
use crate::traits::{CacheStore, GrantStore, TreeStore, UpsertResult};

/// Guard against pathological link chains; mirrors the SQLite backend.
const MAX_LINK_DEPTH: usize = 64;

/// In-memory store backing all three store traits.
pub struct MemoryBackend {
    inner: RwLock<MemoryBackendInner>,
}

struct MemoryBackendInner {
    /// Node records by id.
    nodes: HashMap<NodeId, Node>,

    /// Child sets, for descendant enumeration.
    children: HashMap<NodeId, BTreeSet<NodeId>>,

    /// Grants by id.
    grants: HashMap<GrantId, ShareGrant>,

    /// Unique-key index: (node, subject) -> grant id.
    grants_by_key: HashMap<(NodeId, Option<UserId>), GrantId>,

    /// Cache rows keyed by (node, subject). BTreeMap keeps dumps
    /// deterministic for idempotence comparisons.
    rows: BTreeMap<(NodeId, Option<UserId>), PermissionRow>,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryBackendInner {
                nodes: HashMap::new(),
                children: HashMap::new(),
                grants: HashMap::new(),
                grants_by_key: HashMap::new(),
                rows: BTreeMap::new(),
            }),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryBackendInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryBackendInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackendInner {
    /// Node ids of the subtree rooted at `node`, root included.
    /// Empty when the node does not exist.
    fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        if !self.nodes.contains_key(&node) {
            return Vec::new();
        }
        let mut out = vec![node];
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.children.get(&current) {
                for &child in children {
                    out.push(child);
                    stack.push(child);
                }
            }
        }
        out
    }

    fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = Some(node);
        let mut seen = HashSet::new();
        while let Some(id) = current {
            let Some(record) = self.nodes.get(&id) else {
                // Broken parent pointer or missing start node: stop with
                // whatever prefix is valid.
                break;
            };
            if !seen.insert(id) {
                break;
            }
            out.push(id);
            current = record.parent;
        }
        out
    }
}

#[async_trait]
impl TreeStore for MemoryBackend {
    async fn insert_node(&self, node: &Node) -> Result<()> {
        let mut inner = self.write()?;

        if inner.nodes.contains_key(&node.id) {
            return Err(StoreError::DuplicateNode(node.id));
        }
        if let Some(parent) = node.parent {
            if !inner.nodes.contains_key(&parent) {
                return Err(StoreError::NodeNotFound(parent));
            }
            inner.children.entry(parent).or_default().insert(node.id);
        }
        inner.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn get_node(&self, node: NodeId) -> Result<Option<Node>> {
        let inner = self.read()?;
        Ok(inner.nodes.get(&node).cloned())
    }

    async fn canonical(&self, node: NodeId) -> Result<Option<NodeId>> {
        let inner = self.read()?;

        let mut current = node;
        for _ in 0..MAX_LINK_DEPTH {
            match inner.nodes.get(&current) {
                None => return Ok(None),
                Some(record) => match record.origin {
                    None => return Ok(Some(current)),
                    Some(origin) => current = origin,
                },
            }
        }
        Err(StoreError::InvalidData(format!(
            "link chain exceeds {} hops at node {}",
            MAX_LINK_DEPTH, node
        )))
    }

    async fn ancestors(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let inner = self.read()?;
        Ok(inner.ancestors(node))
    }

    async fn descendants(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let inner = self.read()?;
        let mut subtree = inner.subtree(node);
        if !subtree.is_empty() {
            subtree.remove(0);
        }
        Ok(subtree)
    }

    async fn owner(&self, node: NodeId) -> Result<Option<UserId>> {
        let inner = self.read()?;
        Ok(inner.nodes.get(&node).and_then(|n| n.owner))
    }

    async fn set_owner(&self, node: NodeId, owner: UserId) -> Result<()> {
        let mut inner = self.write()?;
        match inner.nodes.get_mut(&node) {
            Some(record) => {
                record.owner = Some(owner);
                Ok(())
            }
            None => Err(StoreError::NodeNotFound(node)),
        }
    }

    async fn move_node(&self, node: NodeId, new_parent: NodeId) -> Result<()> {
        let mut inner = self.write()?;

        if !inner.nodes.contains_key(&node) {
            return Err(StoreError::NodeNotFound(node));
        }
        if !inner.nodes.contains_key(&new_parent) {
            return Err(StoreError::NodeNotFound(new_parent));
        }
        if inner.subtree(node).contains(&new_parent) {
            return Err(StoreError::MoveIntoSubtree { node, new_parent });
        }

        let old_parent = inner.nodes.get(&node).and_then(|n| n.parent);
        if let Some(old) = old_parent {
            if let Some(children) = inner.children.get_mut(&old) {
                children.remove(&node);
            }
        }
        inner.children.entry(new_parent).or_default().insert(node);
        if let Some(record) = inner.nodes.get_mut(&node) {
            record.parent = Some(new_parent);
        }
        Ok(())
    }

    async fn delete_node(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut inner = self.write()?;

        let subtree = inner.subtree(node);
        if subtree.is_empty() {
            return Ok(Vec::new());
        }

        let doomed: HashSet<NodeId> = subtree.iter().copied().collect();

        if let Some(parent) = inner.nodes.get(&node).and_then(|n| n.parent) {
            if let Some(children) = inner.children.get_mut(&parent) {
                children.remove(&node);
            }
        }
        for id in &subtree {
            inner.nodes.remove(id);
            inner.children.remove(id);
        }
        inner.grants.retain(|_, g| !doomed.contains(&g.node));
        inner.grants_by_key.retain(|(n, _), _| !doomed.contains(n));
        inner.rows.retain(|(n, _), _| !doomed.contains(n));

        Ok(subtree)
    }

    async fn nodes_owned_by(&self, user: UserId) -> Result<Vec<NodeId>> {
        let inner = self.read()?;
        Ok(inner
            .nodes
            .values()
            .filter(|n| n.owner == Some(user))
            .map(|n| n.id)
            .collect())
    }
}

#[async_trait]
impl GrantStore for MemoryBackend {
    async fn create_grant(&self, grant: &ShareGrant) -> Result<()> {
        let mut inner = self.write()?;

        let key = (grant.node, grant.user);
        if inner.grants_by_key.contains_key(&key) {
            return Err(StoreError::DuplicateGrant {
                node: grant.node,
                subject: StoreError::subject_label(grant.user),
            });
        }
        inner.grants_by_key.insert(key, grant.id);
        inner.grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn destroy_grant(&self, grant: GrantId) -> Result<bool> {
        let mut inner = self.write()?;

        match inner.grants.remove(&grant) {
            Some(record) => {
                inner.grants_by_key.remove(&(record.node, record.user));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_grant(&self, grant: GrantId) -> Result<Option<ShareGrant>> {
        let inner = self.read()?;
        Ok(inner.grants.get(&grant).cloned())
    }

    async fn grant_for(&self, node: NodeId, user: Option<UserId>) -> Result<Option<ShareGrant>> {
        let inner = self.read()?;
        Ok(inner
            .grants_by_key
            .get(&(node, user))
            .and_then(|id| inner.grants.get(id))
            .cloned())
    }

    async fn grants_on_any(&self, nodes: &[NodeId]) -> Result<Vec<ShareGrant>> {
        let inner = self.read()?;
        let wanted: HashSet<NodeId> = nodes.iter().copied().collect();
        Ok(inner
            .grants
            .values()
            .filter(|g| wanted.contains(&g.node))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CacheStore for MemoryBackend {
    async fn upsert_owner_row(&self, node: NodeId, user: UserId) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .rows
            .insert((node, Some(user)), PermissionRow::owner(node, user));
        Ok(())
    }

    async fn upsert_grant_row(&self, row: &PermissionRow) -> Result<UpsertResult> {
        let mut inner = self.write()?;

        let key = (row.node, row.user);
        if let Some(existing) = inner.rows.get(&key) {
            if existing.is_ownership() {
                return Ok(UpsertResult::SkippedOwnerRow);
            }
        }
        inner.rows.insert(key, row.clone());
        Ok(UpsertResult::Applied)
    }

    async fn get_row(&self, node: NodeId, user: Option<UserId>) -> Result<Option<PermissionRow>> {
        let inner = self.read()?;
        Ok(inner.rows.get(&(node, user)).cloned())
    }

    async fn delete_owner_row(&self, node: NodeId, user: UserId) -> Result<()> {
        let mut inner = self.write()?;

        let key = (node, Some(user));
        if inner.rows.get(&key).is_some_and(|r| r.is_ownership()) {
            inner.rows.remove(&key);
        }
        Ok(())
    }

    async fn delete_grant_row(&self, node: NodeId, user: Option<UserId>) -> Result<()> {
        let mut inner = self.write()?;

        let key = (node, user);
        if inner.rows.get(&key).is_some_and(|r| !r.is_ownership()) {
            inner.rows.remove(&key);
        }
        Ok(())
    }

    async fn delete_rows_by_source(&self, grant: GrantId) -> Result<u64> {
        let mut inner = self.write()?;

        let before = inner.rows.len();
        inner.rows.retain(|_, row| row.source != Some(grant));
        Ok((before - inner.rows.len()) as u64)
    }

    async fn subjects_for_source(&self, grant: GrantId) -> Result<Vec<Option<UserId>>> {
        let inner = self.read()?;
        let subjects: BTreeSet<Option<UserId>> = inner
            .rows
            .values()
            .filter(|r| r.source == Some(grant))
            .map(|r| r.user)
            .collect();
        Ok(subjects.into_iter().collect())
    }

    async fn rows_for_node(&self, node: NodeId) -> Result<Vec<PermissionRow>> {
        let inner = self.read()?;
        Ok(inner
            .rows
            .values()
            .filter(|r| r.node == node)
            .cloned()
            .collect())
    }

    async fn nodes_for_user(
        &self,
        user: Option<UserId>,
        min_level: PermissionLevel,
    ) -> Result<Vec<NodeId>> {
        let inner = self.read()?;
        Ok(inner
            .rows
            .values()
            .filter(|r| r.user == user && r.level >= min_level)
            .map(|r| r.node)
            .collect())
    }

    async fn all_rows(&self) -> Result<Vec<PermissionRow>> {
        let inner = self.read()?;
        Ok(inner.rows.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(owner: UserId, parent: Option<NodeId>) -> Node {
        Node::new(NodeId::generate(), owner, parent)
    }

    #[tokio::test]
    async fn test_ancestor_order_is_nearest_first() {
        let backend = MemoryBackend::new();
        let owner = UserId::generate();

        let root = node(owner, None);
        let child = node(owner, Some(root.id));
        let grandchild = node(owner, Some(child.id));
        backend.insert_node(&root).await.unwrap();
        backend.insert_node(&child).await.unwrap();
        backend.insert_node(&grandchild).await.unwrap();

        let path = backend.ancestors(grandchild.id).await.unwrap();
        assert_eq!(path, vec![grandchild.id, child.id, root.id]);
    }

    #[tokio::test]
    async fn test_move_into_subtree_rejected() {
        let backend = MemoryBackend::new();
        let owner = UserId::generate();

        let root = node(owner, None);
        let child = node(owner, Some(root.id));
        backend.insert_node(&root).await.unwrap();
        backend.insert_node(&child).await.unwrap();

        let err = backend.move_node(root.id, child.id).await.unwrap_err();
        assert!(matches!(err, StoreError::MoveIntoSubtree { .. }));
    }

    #[tokio::test]
    async fn test_link_canonicalization() {
        let backend = MemoryBackend::new();
        let owner = UserId::generate();

        let origin = node(owner, None);
        let link = Node::link(NodeId::generate(), origin.id, None);
        backend.insert_node(&origin).await.unwrap();
        backend.insert_node(&link).await.unwrap();

        assert_eq!(
            backend.canonical(link.id).await.unwrap(),
            Some(origin.id)
        );
        // A link to a deleted origin resolves to nothing.
        backend.delete_node(origin.id).await.unwrap();
        assert_eq!(backend.canonical(link.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_grant_rejected() {
        let backend = MemoryBackend::new();
        let owner = UserId::generate();
        let reader = UserId::generate();

        let root = node(owner, None);
        backend.insert_node(&root).await.unwrap();

        let grant = ShareGrant::for_user(
            GrantId::generate(),
            root.id,
            reader,
            PermissionLevel::Read,
        );
        backend.create_grant(&grant).await.unwrap();

        let dup = ShareGrant::for_user(
            GrantId::generate(),
            root.id,
            reader,
            PermissionLevel::Write,
        );
        let err = backend.create_grant(&dup).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateGrant { .. }));
    }

    #[tokio::test]
    async fn test_owner_row_not_overwritten_by_grant_row() {
        let backend = MemoryBackend::new();
        let owner = UserId::generate();

        let root = node(owner, None);
        backend.insert_node(&root).await.unwrap();
        backend.upsert_owner_row(root.id, owner).await.unwrap();

        let row = PermissionRow::derived(
            root.id,
            Some(owner),
            PermissionLevel::Read,
            GrantId::generate(),
        );
        let result = backend.upsert_grant_row(&row).await.unwrap();
        assert_eq!(result, UpsertResult::SkippedOwnerRow);

        let stored = backend.get_row(root.id, Some(owner)).await.unwrap().unwrap();
        assert!(stored.is_ownership());
        assert_eq!(stored.level, PermissionLevel::Admin);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let backend = MemoryBackend::new();
        let owner = UserId::generate();
        let reader = UserId::generate();

        let root = node(owner, None);
        let child = node(owner, Some(root.id));
        backend.insert_node(&root).await.unwrap();
        backend.insert_node(&child).await.unwrap();

        let grant =
            ShareGrant::for_user(GrantId::generate(), child.id, reader, PermissionLevel::Read);
        backend.create_grant(&grant).await.unwrap();
        backend
            .upsert_grant_row(&PermissionRow::derived(
                child.id,
                Some(reader),
                PermissionLevel::Read,
                grant.id,
            ))
            .await
            .unwrap();

        let deleted = backend.delete_node(root.id).await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(backend.get_grant(grant.id).await.unwrap().is_none());
        assert!(backend.all_rows().await.unwrap().is_empty());
        // Deleting again is a no-op.
        assert!(backend.delete_node(root.id).await.unwrap().is_empty());
    }
}
