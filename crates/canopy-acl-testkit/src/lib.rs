//! # Canopy ACL Testkit
//!
//! Testing utilities for the Canopy permission engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a bundled backend/engine/queue with helpers for
//!   building trees, grants, and draining queued maintenance work
//! - **Generators**: proptest strategies for random tree shapes and
//!   grant sets
//! - **Deterministic ids**: stable node/user ids for readable failures
//!
//! ## Fixtures
//!
//! ```rust
//! use canopy_acl_testkit::fixtures::{nth_user, TestFixture};
//! use canopy_acl_core::PermissionLevel;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let fixture = TestFixture::new();
//! let root = fixture.make_root(nth_user(0)).await;
//! fixture
//!     .make_grant(root, Some(nth_user(1)), PermissionLevel::Read)
//!     .await;
//! # });
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use canopy_acl_testkit::generators::{grant_plans, tree_plan};
//!
//! proptest! {
//!     #[test]
//!     fn cache_matches_live_resolution(
//!         tree in tree_plan(12),
//!         grants in grant_plans(12, 4, 16),
//!     ) {
//!         // build, converge, compare against the strict path
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{nth_node, nth_user, TestFixture};
pub use generators::{grant_level, grant_plans, tree_plan, GrantPlan, TreePlan};
