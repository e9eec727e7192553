//! # Canopy ACL Resolve
//!
//! The synchronous half of the permission system: the `allowed` entry
//! point and the short-lived decision memo behind it.
//!
//! ## Key Types
//!
//! - [`PermissionResolver`] - `allowed`, `allowed_strict`, and listing
//! - [`PermissionMemo`] - the TTL decision cache, synchronously
//!   invalidated by mutation paths
//! - [`MemoConfig`] / [`MemoKey`]
//!
//! ## Consistency contract
//!
//! The memo is the one strongly consistent piece: mutations evict
//! affected entries before returning. The materialized cache underneath
//! is allowed to lag by the queue drain latency; callers that cannot
//! tolerate that window use the strict path, which resolves live from
//! grants and the ancestor closure.

pub mod error;
pub mod memo;
pub mod resolver;

pub use error::{ResolveError, Result};
pub use memo::{MemoConfig, MemoKey, PermissionMemo};
pub use resolver::PermissionResolver;
