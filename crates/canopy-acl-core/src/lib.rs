//! # Canopy ACL Core
//!
//! Pure primitives for the Canopy permission engine: identifiers, graded
//! permission levels, share grants, materialized cache rows, and the
//! maintenance-operation envelope.
//!
//! This crate contains no I/O, no storage, no async. It is pure data.
//!
//! ## Key Types
//!
//! - [`NodeId`] / [`UserId`] / [`GrantId`] - UUID newtype identifiers
//! - [`PermissionLevel`] - the total order `none < read < feedback < write < admin`
//! - [`ShareGrant`] - an explicit permission edge on the tree
//! - [`PermissionRow`] - one materialized `(node, subject) -> level` answer
//! - [`MaintenanceOp`] - the tagged union of cache maintenance jobs
//!
//! ## Resolution rule
//!
//! Effective permission is *closest-ancestor-wins*: the nearest
//! self-or-ancestor grant for a subject decides, regardless of whether a
//! farther grant carries a higher level. Ownership implies admin and takes
//! precedence over any grant for the same subject.

pub mod error;
pub mod grant;
pub mod level;
pub mod op;
pub mod row;
pub mod types;

pub use error::{CoreError, Result};
pub use grant::ShareGrant;
pub use level::PermissionLevel;
pub use op::MaintenanceOp;
pub use row::PermissionRow;
pub use types::{GrantId, Node, NodeId, UserId};
