//! Routing error types
//!
//! ROA document problems get their own kind so an import can be aborted
//! without being mistaken for a storage failure.

use thiserror::Error;

use irr_storage::StorageError;

/// Errors in a ROA export document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoaParseError {
    /// Not JSON, or a required key is missing or mistyped
    #[error("Malformed ROA document: {0}")]
    Malformed(String),

    #[error("Invalid ROA prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("Invalid ROA asn {0:?}")]
    InvalidAsn(String),

    #[error("Invalid max length {max_length} for ROA prefix {prefix}: {reason}")]
    InvalidMaxLength {
        prefix: String,
        max_length: u32,
        reason: String,
    },
}

/// Extended routing errors for the routing crate
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Storage operation failed
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    RoaParse(#[from] RoaParseError),
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;
