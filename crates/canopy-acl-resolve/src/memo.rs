//! The permission memo: a short-lived decision cache on the synchronous
//! read path.
//!
//! Entries may be evicted at any time without correctness impact - the
//! worst case is a recompute against the materialized cache. What *is*
//! load-bearing is synchronous invalidation: structural mutations evict
//! affected entries before they return, so the memo never serves a
//! stale-permissive answer past the mutating call.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use canopy_acl_core::{NodeId, PermissionLevel, UserId};

/// Configuration for the memo.
#[derive(Debug, Clone)]
pub struct MemoConfig {
    /// How long an entry is served before it expires.
    pub ttl: Duration,
    /// Entry cap; reaching it clears the memo (a valid eviction).
    pub max_entries: usize,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_entries: 16_384,
        }
    }
}

/// Key of one memoized decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoKey {
    /// Canonical node id.
    pub node: NodeId,
    /// The asking subject; `None` is anonymous.
    pub user: Option<UserId>,
    /// The required level the decision was computed for.
    pub level: PermissionLevel,
}

struct MemoEntry {
    allowed: bool,
    stored_at: Instant,
}

/// The ephemeral decision cache.
pub struct PermissionMemo {
    config: MemoConfig,
    entries: RwLock<HashMap<MemoKey, MemoEntry>>,
}

impl PermissionMemo {
    /// Create an empty memo.
    pub fn new(config: MemoConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A memo with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MemoConfig::default())
    }

    // A panicking reader/writer must not wedge the read path or abort a
    // mutation; recover the map and log.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<MemoKey, MemoEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("permission memo lock poisoned on read; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<MemoKey, MemoEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("permission memo lock poisoned on write; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Look up a memoized decision; expired entries miss.
    pub fn get(&self, key: &MemoKey) -> Option<bool> {
        let entries = self.read();
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() > self.config.ttl {
            return None;
        }
        Some(entry.allowed)
    }

    /// Store a decision.
    pub fn insert(&self, key: MemoKey, allowed: bool) {
        let mut entries = self.write();
        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            entries.clear();
        }
        entries.insert(
            key,
            MemoEntry {
                allowed,
                stored_at: Instant::now(),
            },
        );
    }

    /// Evict every entry for the given nodes and subjects, across all
    /// required levels.
    ///
    /// A public subject in the set means anyone's answer may have flowed
    /// through the public row, so those nodes are evicted for all users.
    pub fn evict_subjects(&self, nodes: &[NodeId], subjects: &[Option<UserId>]) {
        if subjects.iter().any(|s| s.is_none()) {
            self.evict_nodes(nodes);
            return;
        }
        let mut entries = self.write();
        entries.retain(|key, _| {
            !(nodes.contains(&key.node) && subjects.contains(&key.user))
        });
    }

    /// Evict every entry for the given nodes, for all subjects.
    pub fn evict_nodes(&self, nodes: &[NodeId]) {
        let mut entries = self.write();
        entries.retain(|key, _| !nodes.contains(&key.node));
    }

    /// Number of live entries (including not-yet-collected expired ones).
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the memo holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(node: NodeId, user: Option<UserId>) -> MemoKey {
        MemoKey {
            node,
            user,
            level: PermissionLevel::Read,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let memo = PermissionMemo::with_defaults();
        let k = key(NodeId::generate(), Some(UserId::generate()));

        assert_eq!(memo.get(&k), None);
        memo.insert(k, true);
        assert_eq!(memo.get(&k), Some(true));
    }

    #[test]
    fn test_expired_entries_miss() {
        let memo = PermissionMemo::new(MemoConfig {
            ttl: Duration::from_millis(0),
            ..MemoConfig::default()
        });
        let k = key(NodeId::generate(), None);
        memo.insert(k, true);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(memo.get(&k), None);
    }

    #[test]
    fn test_evict_subjects_is_exact() {
        let memo = PermissionMemo::with_defaults();
        let node = NodeId::generate();
        let other_node = NodeId::generate();
        let user = UserId::generate();
        let bystander = UserId::generate();

        memo.insert(key(node, Some(user)), true);
        memo.insert(key(node, Some(bystander)), true);
        memo.insert(key(other_node, Some(user)), true);

        memo.evict_subjects(&[node], &[Some(user)]);

        assert_eq!(memo.get(&key(node, Some(user))), None);
        assert_eq!(memo.get(&key(node, Some(bystander))), Some(true));
        assert_eq!(memo.get(&key(other_node, Some(user))), Some(true));
    }

    #[test]
    fn test_public_subject_evicts_all_users_on_node() {
        let memo = PermissionMemo::with_defaults();
        let node = NodeId::generate();
        let user = UserId::generate();

        memo.insert(key(node, Some(user)), true);
        memo.insert(key(node, None), false);

        memo.evict_subjects(&[node], &[None]);

        assert!(memo.is_empty());
    }

    #[test]
    fn test_capacity_clear_is_safe() {
        let memo = PermissionMemo::new(MemoConfig {
            ttl: Duration::from_secs(30),
            max_entries: 2,
        });
        memo.insert(key(NodeId::generate(), None), true);
        memo.insert(key(NodeId::generate(), None), true);
        // Third insert trips the cap and clears.
        let k = key(NodeId::generate(), None);
        memo.insert(k, false);
        assert_eq!(memo.len(), 1);
        assert_eq!(memo.get(&k), Some(false));
    }
}
