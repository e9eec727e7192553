//! # Canopy ACL Store
//!
//! Storage abstraction for the Canopy permission engine. Provides
//! trait-based interfaces for the workspace tree (with its ancestor
//! closure), explicit share grants, and the materialized permission
//! cache, with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`TreeStore`] / [`GrantStore`] / [`CacheStore`] - the async store traits
//! - [`Backend`] - blanket supertrait bundling all three
//! - [`SqliteBackend`] - SQLite-based persistent storage
//! - [`MemoryBackend`] - in-memory storage for tests
//! - [`UpsertResult`] - outcome of a grant-derived cache write
//!
//! ## Design Notes
//!
//! - **Ancestor closure**: `ancestors` is nearest→farthest with self at
//!   distance 0; moves rewrite the closure for the whole subtree in one
//!   transaction.
//! - **Ownership precedence**: `upsert_grant_row` never overwrites an
//!   ownership-derived row; `upsert_owner_row` is unconditional.
//! - **Benign absence**: enumeration over a missing node returns empty
//!   rather than erroring, so maintenance operations can treat deleted
//!   targets as no-ops.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use traits::{Backend, CacheStore, GrantStore, TreeStore, UpsertResult};
