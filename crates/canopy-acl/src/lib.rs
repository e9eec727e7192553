//! # Canopy ACL
//!
//! The permission engine of the Canopy collaborative workspace: a
//! materialized `(node, subject) -> level` cache kept consistent with an
//! evolving tree, explicit share grants, and node ownership - under
//! asynchronous, concurrent mutation.
//!
//! ## Architecture
//!
//! - **Mutations** ([`AclService`]) authorize against live grants, commit
//!   transactionally, evict the decision memo synchronously, then enqueue
//!   a maintenance operation.
//! - **Convergence** (`canopy-acl-engine`) happens on worker tasks
//!   executing idempotent recomputations against current state; no
//!   ordering is guaranteed and none is needed.
//! - **Reads** (`canopy-acl-resolve`) never walk ancestors: ownership
//!   check, memo, one cache row. Listings scan the cache joined with
//!   ownership. High-stakes checks use the strict live path.
//!
//! ## Resolution rule
//!
//! Closest-ancestor-wins: the nearest self-or-ancestor grant for a
//! subject decides, regardless of whether a farther grant carries a
//! higher level. Ownership implies admin and precedes everything.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use canopy_acl::{AclConfig, AclService};
//! use canopy_acl::core::{PermissionLevel, UserId};
//! use canopy_acl::engine::{MaintenanceEngine, MemoryQueue, WorkerConfig, WorkerPool};
//! use canopy_acl::store::SqliteBackend;
//!
//! async fn example() {
//!     let backend = Arc::new(SqliteBackend::open("acl.db").unwrap());
//!     let queue = Arc::new(MemoryQueue::new());
//!
//!     // Workers converge the materialized cache in the background.
//!     let engine = Arc::new(MaintenanceEngine::new(Arc::clone(&backend)));
//!     let pool = WorkerPool::spawn(engine, Arc::clone(&queue), WorkerConfig::default());
//!
//!     let service = AclService::new(backend, queue, AclConfig::default());
//!     let owner = UserId::generate();
//!     let root = service.create_root(owner).await.unwrap();
//!     assert!(service
//!         .allowed(root, Some(owner), PermissionLevel::Admin)
//!         .await
//!         .unwrap());
//!
//!     drop(pool);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `canopy_acl::core` - ids, levels, grants, rows, operations
//! - `canopy_acl::store` - store traits, SQLite and memory backends
//! - `canopy_acl::engine` - maintenance engine, queue, workers
//! - `canopy_acl::resolve` - resolver and memo

pub mod error;
pub mod service;

// Re-export component crates
pub use canopy_acl_core as core;
pub use canopy_acl_engine as engine;
pub use canopy_acl_resolve as resolve;
pub use canopy_acl_store as store;

pub use error::{AclError, Result};
pub use service::{AclConfig, AclService};
