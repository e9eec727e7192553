//! Error types for the Canopy ACL core.

use thiserror::Error;

/// Core errors: wire encoding and invalid stored values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("invalid permission level: {0}")]
    InvalidLevel(u8),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
