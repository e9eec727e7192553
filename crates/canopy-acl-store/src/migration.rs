//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system: each migration transforms the
//! schema from version N to N+1, recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// The public subject is stored as the nil UUID rather than NULL so that
/// the grant UNIQUE constraint and the cache PRIMARY KEY apply to public
/// rows (SQLite treats NULLs as distinct in unique indexes).
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Nodes: the access-control slice of the workspace tree
        CREATE TABLE nodes (
            node_id BLOB PRIMARY KEY,        -- 16 bytes, UUID
            owner_id BLOB,                   -- 16 bytes, nullable transiently
            parent_id BLOB,                  -- NULL for roots
            origin_id BLOB,                  -- set => this node is a link
            created_at INTEGER NOT NULL
        );

        -- Ancestor closure: one row per (node, ancestor), self at depth 0
        CREATE TABLE node_ancestors (
            node_id BLOB NOT NULL,
            ancestor_id BLOB NOT NULL,
            depth INTEGER NOT NULL,
            PRIMARY KEY (node_id, ancestor_id)
        );

        -- Explicit share grants, unique per (node, subject)
        CREATE TABLE share_grants (
            grant_id BLOB PRIMARY KEY,
            node_id BLOB NOT NULL,
            user_id BLOB NOT NULL,           -- nil UUID = public subject
            level INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (node_id, user_id)
        );

        -- Materialized permission cache: one resolved row per (node, subject)
        CREATE TABLE permission_cache (
            node_id BLOB NOT NULL,
            user_id BLOB NOT NULL,           -- nil UUID = public subject
            level INTEGER NOT NULL,
            source_grant_id BLOB,            -- NULL = ownership-derived
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (node_id, user_id)
        );

        -- Indexes for common queries
        CREATE INDEX idx_nodes_owner ON nodes(owner_id);
        CREATE INDEX idx_ancestors_ancestor ON node_ancestors(ancestor_id);
        CREATE INDEX idx_grants_node ON share_grants(node_id);
        CREATE INDEX idx_cache_user_level ON permission_cache(user_id, level);
        CREATE INDEX idx_cache_source ON permission_cache(source_grant_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
