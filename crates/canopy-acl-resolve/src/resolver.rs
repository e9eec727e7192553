//! The runtime permission resolver: `allowed(node, user, level)`.
//!
//! The read path is cheap and bounded: canonicalize, owner check, memo,
//! one cache row (two with the public fallback). A missing row is a
//! denial, never an inline recompute - the price is a staleness window
//! equal to queue drain latency, which listing features tolerate.
//! High-stakes callers use [`PermissionResolver::allowed_strict`], which
//! resolves live from grants and ancestors and bypasses both caches.

use std::collections::BTreeSet;
use std::sync::Arc;

use canopy_acl_core::{NodeId, PermissionLevel, ShareGrant, UserId};
use canopy_acl_store::Backend;

use crate::error::Result;
use crate::memo::{MemoConfig, MemoKey, PermissionMemo};

/// The synchronous entry point every permission-sensitive feature calls.
pub struct PermissionResolver<B> {
    backend: Arc<B>,
    memo: PermissionMemo,
}

impl<B: Backend> PermissionResolver<B> {
    /// Create a resolver over the given backend.
    pub fn new(backend: Arc<B>, memo_config: MemoConfig) -> Self {
        Self {
            backend,
            memo: PermissionMemo::new(memo_config),
        }
    }

    /// The memo, for synchronous invalidation by mutation paths.
    pub fn memo(&self) -> &PermissionMemo {
        &self.memo
    }

    /// Whether `user` holds at least `level` on `node`, per the
    /// materialized cache.
    ///
    /// Ownership implies admin and short-circuits before any cache is
    /// consulted. An explicit row for the user shadows the public row;
    /// with neither, the answer is deny.
    pub async fn allowed(
        &self,
        node: NodeId,
        user: Option<UserId>,
        level: PermissionLevel,
    ) -> Result<bool> {
        let Some(canon) = self.backend.canonical(node).await? else {
            return Ok(false);
        };

        if let Some(u) = user {
            if self.backend.owner(canon).await? == Some(u) {
                return Ok(true);
            }
        }

        let key = MemoKey {
            node: canon,
            user,
            level,
        };
        if let Some(memoized) = self.memo.get(&key) {
            return Ok(memoized);
        }

        let mut row = self.backend.get_row(canon, user).await?;
        if row.is_none() && user.is_some() {
            row = self.backend.get_row(canon, None).await?;
        }
        let allowed = row.map(|r| r.level.satisfies(level)).unwrap_or(false);

        self.memo.insert(key, allowed);
        Ok(allowed)
    }

    /// Strict resolution: ownership, then a live walk of the ancestor
    /// path over the grant store. Bypasses the memo and the materialized
    /// cache entirely; for destructive/admin-gated decisions that cannot
    /// tolerate the convergence window.
    pub async fn allowed_strict(
        &self,
        node: NodeId,
        user: Option<UserId>,
        level: PermissionLevel,
    ) -> Result<bool> {
        let Some(canon) = self.backend.canonical(node).await? else {
            return Ok(false);
        };

        if let Some(u) = user {
            if self.backend.owner(canon).await? == Some(u) {
                return Ok(true);
            }
        }

        let path = self.backend.ancestors(canon).await?;
        let grant = nearest_grant(self.backend.as_ref(), &path, user).await?;
        Ok(grant.map(|g| g.level.satisfies(level)).unwrap_or(false))
    }

    /// Every node where `user` holds at least `min_level`: a scan of the
    /// materialized cache (user rows plus public rows) joined with
    /// ownership. Never an ancestor walk per row.
    pub async fn accessible_nodes(
        &self,
        user: Option<UserId>,
        min_level: PermissionLevel,
    ) -> Result<Vec<NodeId>> {
        let mut nodes: BTreeSet<NodeId> = self
            .backend
            .nodes_for_user(user, min_level)
            .await?
            .into_iter()
            .collect();

        if let Some(u) = user {
            nodes.extend(self.backend.nodes_for_user(None, min_level).await?);
            nodes.extend(self.backend.nodes_owned_by(u).await?);
        }

        Ok(nodes.into_iter().collect())
    }
}

/// The effective grant for `user` along a nearest-first ancestor path.
///
/// A user's explicit grants shadow public grants along the whole path;
/// the nearest public grant applies only when the user holds no explicit
/// grant on any ancestor. This mirrors the cached path, where a user row
/// shadows the public row.
async fn nearest_grant<B: Backend>(
    backend: &B,
    path: &[NodeId],
    user: Option<UserId>,
) -> Result<Option<ShareGrant>> {
    if user.is_some() {
        for &ancestor in path {
            if let Some(grant) = backend.grant_for(ancestor, user).await? {
                return Ok(Some(grant));
            }
        }
    }
    for &ancestor in path {
        if let Some(grant) = backend.grant_for(ancestor, None).await? {
            return Ok(Some(grant));
        }
    }
    Ok(None)
}
