//! Proptest strategies for property-based testing.
//!
//! Trees are generated as parent-index vectors (node `i + 1` attaches to
//! some earlier node), which makes every generated shape a valid tree by
//! construction. Grants pick a node, a subject (index 0 is the public
//! subject), and a level.

use proptest::prelude::*;
use proptest::sample::Index;

use canopy_acl_core::PermissionLevel;

/// A generated tree shape: `parents[i]` is the parent (by node index)
/// of node `i + 1`; node 0 is the root.
#[derive(Debug, Clone)]
pub struct TreePlan {
    pub parents: Vec<usize>,
}

impl TreePlan {
    /// Total number of nodes, root included.
    pub fn node_count(&self) -> usize {
        self.parents.len() + 1
    }
}

/// A generated grant: node and subject are indices into the generated
/// tree and user pool; subject index 0 means the public subject.
#[derive(Debug, Clone)]
pub struct GrantPlan {
    pub node: usize,
    pub subject: usize,
    pub level: PermissionLevel,
}

/// Strategy for tree shapes with 2..=max_nodes nodes.
pub fn tree_plan(max_nodes: usize) -> impl Strategy<Value = TreePlan> {
    prop::collection::vec(any::<Index>(), 1..max_nodes)
        .prop_map(|indices| TreePlan {
            parents: indices
                .into_iter()
                .enumerate()
                // Node i+1 may attach to any node in 0..=i.
                .map(|(i, index)| index.index(i + 1))
                .collect(),
        })
}

/// Strategy for shareable (non-none) permission levels.
pub fn grant_level() -> impl Strategy<Value = PermissionLevel> {
    prop_oneof![
        Just(PermissionLevel::Read),
        Just(PermissionLevel::Feedback),
        Just(PermissionLevel::Write),
        Just(PermissionLevel::Admin),
    ]
}

/// Strategy for up to `max_grants` grants over a tree of `node_count`
/// nodes and `user_count` signed-in users (subject 0 is public).
///
/// Duplicate `(node, subject)` pairs may be generated; callers skip the
/// duplicates the way the grant store would reject them.
pub fn grant_plans(
    node_count: usize,
    user_count: usize,
    max_grants: usize,
) -> impl Strategy<Value = Vec<GrantPlan>> {
    prop::collection::vec(
        (0..node_count, 0..=user_count, grant_level()),
        0..=max_grants,
    )
    .prop_map(|triples| {
        triples
            .into_iter()
            .map(|(node, subject, level)| GrantPlan {
                node,
                subject,
                level,
            })
            .collect()
    })
}
