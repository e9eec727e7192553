//! Error types for the resolution module.

use canopy_acl_store::StoreError;
use thiserror::Error;

/// Errors that can occur during permission resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Storage error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for resolution operations.
pub type Result<T> = std::result::Result<T, ResolveError>;
