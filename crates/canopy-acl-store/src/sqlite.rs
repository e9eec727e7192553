//! SQLite implementation of the store traits.
//!
//! The primary backend. Uses rusqlite with bundled SQLite behind an
//! `Arc<Mutex<Connection>>`; every operation runs under
//! `tokio::task::spawn_blocking` so the async runtime is never blocked.
//!
//! Subject encoding: the public (anonymous) subject is stored as the nil
//! UUID so that `UNIQUE(node_id, user_id)` and the cache PRIMARY KEY
//! apply to public rows.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use canopy_acl_core::{
    GrantId, Node, NodeId, PermissionLevel, PermissionRow, ShareGrant, UserId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{CacheStore, GrantStore, TreeStore, UpsertResult};

/// Guard against pathological link chains.
const MAX_LINK_DEPTH: usize = 64;

/// SQLite-based store backing all three store traits.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Encoding helpers
// ─────────────────────────────────────────────────────────────────────────

fn uuid_from_blob(bytes: &[u8], what: &str) -> Result<Uuid> {
    Uuid::from_slice(bytes)
        .map_err(|_| StoreError::InvalidData(format!("{} is not a 16-byte UUID", what)))
}

/// Storage form of a grant/cache subject: nil UUID = public.
fn encode_subject(user: Option<UserId>) -> Uuid {
    user.map(|u| u.0).unwrap_or_else(Uuid::nil)
}

fn decode_subject(uuid: Uuid) -> Option<UserId> {
    if uuid.is_nil() {
        None
    } else {
        Some(UserId(uuid))
    }
}

fn decode_level(value: i64) -> Result<PermissionLevel> {
    u8::try_from(value)
        .ok()
        .and_then(PermissionLevel::from_u8)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid permission level: {}", value)))
}

fn node_exists(conn: &Connection, node: NodeId) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM nodes WHERE node_id = ?1)",
        params![node.0.as_bytes().as_slice()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>, Option<Vec<u8>>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_node(
    (id, owner, parent, origin): (Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>, Option<Vec<u8>>),
) -> Result<Node> {
    Ok(Node {
        id: NodeId(uuid_from_blob(&id, "node_id")?),
        owner: owner
            .map(|b| uuid_from_blob(&b, "owner_id").map(UserId))
            .transpose()?,
        parent: parent
            .map(|b| uuid_from_blob(&b, "parent_id").map(NodeId))
            .transpose()?,
        origin: origin
            .map(|b| uuid_from_blob(&b, "origin_id").map(NodeId))
            .transpose()?,
    })
}

fn row_to_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Vec<u8>, Vec<u8>, i64, Option<Vec<u8>>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_permission(
    (node, user, level, source): (Vec<u8>, Vec<u8>, i64, Option<Vec<u8>>),
) -> Result<PermissionRow> {
    Ok(PermissionRow {
        node: NodeId(uuid_from_blob(&node, "node_id")?),
        user: decode_subject(uuid_from_blob(&user, "user_id")?),
        level: decode_level(level)?,
        source: source
            .map(|b| uuid_from_blob(&b, "source_grant_id").map(GrantId))
            .transpose()?,
    })
}

fn decode_grant(
    (id, node, user, level): (Vec<u8>, Vec<u8>, Vec<u8>, i64),
) -> Result<ShareGrant> {
    Ok(ShareGrant {
        id: GrantId(uuid_from_blob(&id, "grant_id")?),
        node: NodeId(uuid_from_blob(&node, "node_id")?),
        user: decode_subject(uuid_from_blob(&user, "user_id")?),
        level: decode_level(level)?,
    })
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}

// ─────────────────────────────────────────────────────────────────────────
// TreeStore
// ─────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TreeStore for SqliteBackend {
    async fn insert_node(&self, node: &Node) -> Result<()> {
        let node = node.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            if node_exists(&tx, node.id)? {
                return Err(StoreError::DuplicateNode(node.id));
            }
            if let Some(parent) = node.parent {
                if !node_exists(&tx, parent)? {
                    return Err(StoreError::NodeNotFound(parent));
                }
            }

            tx.execute(
                "INSERT INTO nodes (node_id, owner_id, parent_id, origin_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    node.id.0.as_bytes().as_slice(),
                    node.owner.map(|u| u.0.as_bytes().to_vec()),
                    node.parent.map(|p| p.0.as_bytes().to_vec()),
                    node.origin.map(|o| o.0.as_bytes().to_vec()),
                    now_millis(),
                ],
            )?;

            // Self row at depth 0, then the parent's closure shifted by 1.
            tx.execute(
                "INSERT INTO node_ancestors (node_id, ancestor_id, depth) VALUES (?1, ?1, 0)",
                params![node.id.0.as_bytes().as_slice()],
            )?;
            if let Some(parent) = node.parent {
                tx.execute(
                    "INSERT INTO node_ancestors (node_id, ancestor_id, depth)
                     SELECT ?1, ancestor_id, depth + 1
                       FROM node_ancestors WHERE node_id = ?2",
                    params![
                        node.id.0.as_bytes().as_slice(),
                        parent.0.as_bytes().as_slice()
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_node(&self, node: NodeId) -> Result<Option<Node>> {
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT node_id, owner_id, parent_id, origin_id FROM nodes WHERE node_id = ?1",
                    params![node.0.as_bytes().as_slice()],
                    row_to_node,
                )
                .optional()?;
            raw.map(decode_node).transpose()
        })
        .await
    }

    async fn canonical(&self, node: NodeId) -> Result<Option<NodeId>> {
        self.with_conn(move |conn| {
            let mut current = node;
            for _ in 0..MAX_LINK_DEPTH {
                let origin: Option<Option<Vec<u8>>> = conn
                    .query_row(
                        "SELECT origin_id FROM nodes WHERE node_id = ?1",
                        params![current.0.as_bytes().as_slice()],
                        |row| row.get(0),
                    )
                    .optional()?;
                match origin {
                    None => return Ok(None),
                    Some(None) => return Ok(Some(current)),
                    Some(Some(bytes)) => current = NodeId(uuid_from_blob(&bytes, "origin_id")?),
                }
            }
            Err(StoreError::InvalidData(format!(
                "link chain exceeds {} hops at node {}",
                MAX_LINK_DEPTH, node
            )))
        })
        .await
    }

    async fn ancestors(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ancestor_id FROM node_ancestors WHERE node_id = ?1 ORDER BY depth",
            )?;
            let raw: Vec<Vec<u8>> = stmt
                .query_map(params![node.0.as_bytes().as_slice()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|b| uuid_from_blob(&b, "ancestor_id").map(NodeId))
                .collect()
        })
        .await
    }

    async fn descendants(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id FROM node_ancestors WHERE ancestor_id = ?1 AND depth > 0",
            )?;
            let raw: Vec<Vec<u8>> = stmt
                .query_map(params![node.0.as_bytes().as_slice()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|b| uuid_from_blob(&b, "node_id").map(NodeId))
                .collect()
        })
        .await
    }

    async fn owner(&self, node: NodeId) -> Result<Option<UserId>> {
        self.with_conn(move |conn| {
            let raw: Option<Option<Vec<u8>>> = conn
                .query_row(
                    "SELECT owner_id FROM nodes WHERE node_id = ?1",
                    params![node.0.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            match raw.flatten() {
                Some(bytes) => Ok(Some(UserId(uuid_from_blob(&bytes, "owner_id")?))),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set_owner(&self, node: NodeId, owner: UserId) -> Result<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE nodes SET owner_id = ?2 WHERE node_id = ?1",
                params![
                    node.0.as_bytes().as_slice(),
                    owner.0.as_bytes().as_slice()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NodeNotFound(node));
            }
            Ok(())
        })
        .await
    }

    async fn move_node(&self, node: NodeId, new_parent: NodeId) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            if !node_exists(&tx, node)? {
                return Err(StoreError::NodeNotFound(node));
            }
            if !node_exists(&tx, new_parent)? {
                return Err(StoreError::NodeNotFound(new_parent));
            }
            let inside: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM node_ancestors
                   WHERE node_id = ?1 AND ancestor_id = ?2)",
                params![
                    new_parent.0.as_bytes().as_slice(),
                    node.0.as_bytes().as_slice()
                ],
                |row| row.get(0),
            )?;
            if inside {
                return Err(StoreError::MoveIntoSubtree { node, new_parent });
            }

            // Subtree of the moved node, with each member's depth below it.
            let subtree: Vec<(Uuid, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT node_id, depth FROM node_ancestors WHERE ancestor_id = ?1",
                )?;
                let raw: Vec<(Vec<u8>, i64)> = stmt
                    .query_map(params![node.0.as_bytes().as_slice()], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                raw.into_iter()
                    .map(|(b, d)| uuid_from_blob(&b, "node_id").map(|u| (u, d)))
                    .collect::<Result<Vec<_>>>()?
            };
            let subtree_set: HashSet<Uuid> = subtree.iter().map(|(u, _)| *u).collect();

            // The new parent's own ancestor path (self at depth 0).
            let new_path: Vec<(Uuid, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT ancestor_id, depth FROM node_ancestors WHERE node_id = ?1",
                )?;
                let raw: Vec<(Vec<u8>, i64)> = stmt
                    .query_map(params![new_parent.0.as_bytes().as_slice()], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                raw.into_iter()
                    .map(|(b, d)| uuid_from_blob(&b, "ancestor_id").map(|u| (u, d)))
                    .collect::<Result<Vec<_>>>()?
            };

            // Drop closure rows that leave the subtree, keep internal ones.
            for (member, _) in &subtree {
                let ancs: Vec<Vec<u8>> = {
                    let mut stmt = tx.prepare(
                        "SELECT ancestor_id FROM node_ancestors WHERE node_id = ?1",
                    )?;
                    let x = stmt.query_map(params![member.as_bytes().as_slice()], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    x
                };
                for anc in ancs {
                    let anc_uuid = uuid_from_blob(&anc, "ancestor_id")?;
                    if !subtree_set.contains(&anc_uuid) {
                        tx.execute(
                            "DELETE FROM node_ancestors WHERE node_id = ?1 AND ancestor_id = ?2",
                            params![member.as_bytes().as_slice(), anc_uuid.as_bytes().as_slice()],
                        )?;
                    }
                }
            }

            // Graft the subtree onto the new parent's path.
            for (member, member_depth) in &subtree {
                for (anc, anc_depth) in &new_path {
                    tx.execute(
                        "INSERT INTO node_ancestors (node_id, ancestor_id, depth)
                         VALUES (?1, ?2, ?3)",
                        params![
                            member.as_bytes().as_slice(),
                            anc.as_bytes().as_slice(),
                            member_depth + 1 + anc_depth
                        ],
                    )?;
                }
            }

            tx.execute(
                "UPDATE nodes SET parent_id = ?2 WHERE node_id = ?1",
                params![
                    node.0.as_bytes().as_slice(),
                    new_parent.0.as_bytes().as_slice()
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_node(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let subtree: Vec<NodeId> = {
                let mut stmt = tx.prepare(
                    "SELECT node_id FROM node_ancestors WHERE ancestor_id = ?1",
                )?;
                let raw: Vec<Vec<u8>> = stmt
                    .query_map(params![node.0.as_bytes().as_slice()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                raw.into_iter()
                    .map(|b| uuid_from_blob(&b, "node_id").map(NodeId))
                    .collect::<Result<Vec<_>>>()?
            };

            for id in &subtree {
                let blob = id.0.as_bytes().as_slice();
                tx.execute("DELETE FROM permission_cache WHERE node_id = ?1", params![blob])?;
                tx.execute("DELETE FROM share_grants WHERE node_id = ?1", params![blob])?;
                tx.execute("DELETE FROM node_ancestors WHERE node_id = ?1", params![blob])?;
                tx.execute("DELETE FROM nodes WHERE node_id = ?1", params![blob])?;
            }

            tx.commit()?;
            Ok(subtree)
        })
        .await
    }

    async fn nodes_owned_by(&self, user: UserId) -> Result<Vec<NodeId>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT node_id FROM nodes WHERE owner_id = ?1")?;
            let raw: Vec<Vec<u8>> = stmt
                .query_map(params![user.0.as_bytes().as_slice()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|b| uuid_from_blob(&b, "node_id").map(NodeId))
                .collect()
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────
// GrantStore
// ─────────────────────────────────────────────────────────────────────────

#[async_trait]
impl GrantStore for SqliteBackend {
    async fn create_grant(&self, grant: &ShareGrant) -> Result<()> {
        let grant = grant.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            if !node_exists(&tx, grant.node)? {
                return Err(StoreError::NodeNotFound(grant.node));
            }
            let subject = encode_subject(grant.user);
            let existing: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT grant_id FROM share_grants WHERE node_id = ?1 AND user_id = ?2",
                    params![
                        grant.node.0.as_bytes().as_slice(),
                        subject.as_bytes().as_slice()
                    ],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::DuplicateGrant {
                    node: grant.node,
                    subject: StoreError::subject_label(grant.user),
                });
            }

            tx.execute(
                "INSERT INTO share_grants (grant_id, node_id, user_id, level, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    grant.id.0.as_bytes().as_slice(),
                    grant.node.0.as_bytes().as_slice(),
                    subject.as_bytes().as_slice(),
                    grant.level.as_u8() as i64,
                    now_millis(),
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn destroy_grant(&self, grant: GrantId) -> Result<bool> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM share_grants WHERE grant_id = ?1",
                params![grant.0.as_bytes().as_slice()],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn get_grant(&self, grant: GrantId) -> Result<Option<ShareGrant>> {
        self.with_conn(move |conn| {
            let raw: Option<(Vec<u8>, Vec<u8>, Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT grant_id, node_id, user_id, level FROM share_grants
                     WHERE grant_id = ?1",
                    params![grant.0.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            raw.map(decode_grant).transpose()
        })
        .await
    }

    async fn grant_for(&self, node: NodeId, user: Option<UserId>) -> Result<Option<ShareGrant>> {
        self.with_conn(move |conn| {
            let subject = encode_subject(user);
            let raw: Option<(Vec<u8>, Vec<u8>, Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT grant_id, node_id, user_id, level FROM share_grants
                     WHERE node_id = ?1 AND user_id = ?2",
                    params![
                        node.0.as_bytes().as_slice(),
                        subject.as_bytes().as_slice()
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            raw.map(decode_grant).transpose()
        })
        .await
    }

    async fn grants_on_any(&self, nodes: &[NodeId]) -> Result<Vec<ShareGrant>> {
        let nodes = nodes.to_vec();
        self.with_conn(move |conn| {
            let mut out = Vec::new();
            let mut stmt = conn.prepare(
                "SELECT grant_id, node_id, user_id, level FROM share_grants WHERE node_id = ?1",
            )?;
            for node in nodes {
                let raw: Vec<(Vec<u8>, Vec<u8>, Vec<u8>, i64)> = stmt
                    .query_map(params![node.0.as_bytes().as_slice()], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for item in raw {
                    out.push(decode_grant(item)?);
                }
            }
            Ok(out)
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────
// CacheStore
// ─────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CacheStore for SqliteBackend {
    async fn upsert_owner_row(&self, node: NodeId, user: UserId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO permission_cache (node_id, user_id, level, source_grant_id, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?4)
                 ON CONFLICT(node_id, user_id) DO UPDATE SET
                     level = excluded.level,
                     source_grant_id = NULL,
                     updated_at = excluded.updated_at",
                params![
                    node.0.as_bytes().as_slice(),
                    user.0.as_bytes().as_slice(),
                    PermissionLevel::Admin.as_u8() as i64,
                    now_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_grant_row(&self, row: &PermissionRow) -> Result<UpsertResult> {
        let row = row.clone();
        self.with_conn(move |conn| {
            let subject = encode_subject(row.user);
            let source = row
                .source
                .map(|g| g.0.as_bytes().to_vec())
                .ok_or_else(|| {
                    StoreError::InvalidData("grant-derived row without a source grant".into())
                })?;

            // The conditional DO UPDATE leaves ownership rows untouched:
            // a conflict against source_grant_id IS NULL changes nothing.
            let changed = conn.execute(
                "INSERT INTO permission_cache (node_id, user_id, level, source_grant_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(node_id, user_id) DO UPDATE SET
                     level = excluded.level,
                     source_grant_id = excluded.source_grant_id,
                     updated_at = excluded.updated_at
                 WHERE permission_cache.source_grant_id IS NOT NULL",
                params![
                    row.node.0.as_bytes().as_slice(),
                    subject.as_bytes().as_slice(),
                    row.level.as_u8() as i64,
                    source,
                    now_millis(),
                ],
            )?;

            if changed == 0 {
                Ok(UpsertResult::SkippedOwnerRow)
            } else {
                Ok(UpsertResult::Applied)
            }
        })
        .await
    }

    async fn get_row(&self, node: NodeId, user: Option<UserId>) -> Result<Option<PermissionRow>> {
        self.with_conn(move |conn| {
            let subject = encode_subject(user);
            let raw = conn
                .query_row(
                    "SELECT node_id, user_id, level, source_grant_id FROM permission_cache
                     WHERE node_id = ?1 AND user_id = ?2",
                    params![
                        node.0.as_bytes().as_slice(),
                        subject.as_bytes().as_slice()
                    ],
                    row_to_permission,
                )
                .optional()?;
            raw.map(decode_permission).transpose()
        })
        .await
    }

    async fn delete_owner_row(&self, node: NodeId, user: UserId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM permission_cache
                 WHERE node_id = ?1 AND user_id = ?2 AND source_grant_id IS NULL",
                params![
                    node.0.as_bytes().as_slice(),
                    user.0.as_bytes().as_slice()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_grant_row(&self, node: NodeId, user: Option<UserId>) -> Result<()> {
        self.with_conn(move |conn| {
            let subject = encode_subject(user);
            conn.execute(
                "DELETE FROM permission_cache
                 WHERE node_id = ?1 AND user_id = ?2 AND source_grant_id IS NOT NULL",
                params![
                    node.0.as_bytes().as_slice(),
                    subject.as_bytes().as_slice()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_rows_by_source(&self, grant: GrantId) -> Result<u64> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM permission_cache WHERE source_grant_id = ?1",
                params![grant.0.as_bytes().as_slice()],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn subjects_for_source(&self, grant: GrantId) -> Result<Vec<Option<UserId>>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT user_id FROM permission_cache WHERE source_grant_id = ?1",
            )?;
            let raw: Vec<Vec<u8>> = stmt
                .query_map(params![grant.0.as_bytes().as_slice()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|b| uuid_from_blob(&b, "user_id").map(decode_subject))
                .collect()
        })
        .await
    }

    async fn rows_for_node(&self, node: NodeId) -> Result<Vec<PermissionRow>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id, user_id, level, source_grant_id FROM permission_cache
                 WHERE node_id = ?1",
            )?;
            let raw: Vec<_> = stmt
                .query_map(params![node.0.as_bytes().as_slice()], row_to_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(decode_permission).collect()
        })
        .await
    }

    async fn nodes_for_user(
        &self,
        user: Option<UserId>,
        min_level: PermissionLevel,
    ) -> Result<Vec<NodeId>> {
        self.with_conn(move |conn| {
            let subject = encode_subject(user);
            let mut stmt = conn.prepare(
                "SELECT node_id FROM permission_cache WHERE user_id = ?1 AND level >= ?2",
            )?;
            let raw: Vec<Vec<u8>> = stmt
                .query_map(
                    params![subject.as_bytes().as_slice(), min_level.as_u8() as i64],
                    |row| row.get(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|b| uuid_from_blob(&b, "node_id").map(NodeId))
                .collect()
        })
        .await
    }

    async fn all_rows(&self) -> Result<Vec<PermissionRow>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT node_id, user_id, level, source_grant_id FROM permission_cache
                 ORDER BY node_id, user_id",
            )?;
            let raw: Vec<_> = stmt
                .query_map([], row_to_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(decode_permission).collect()
        })
        .await
    }
}
