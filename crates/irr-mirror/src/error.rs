//! Mirror error types
//!
//! The variants follow how a failed run is handled: protocol and I/O
//! failures are recorded as the source's mirror error and the run ends,
//! storage and integrity failures roll the run back.

use thiserror::Error;

use irr_core::ParseError;
use irr_routing::{RoaParseError, RoutingError};
use irr_storage::StorageError;

/// Errors that can occur while mirroring
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Malformed, truncated or out-of-order NRTM data
    #[error("NRTM protocol error: {0}")]
    Protocol(String),

    /// Network or filesystem failure; retried on the next run
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// A consistency guarantee would be violated
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error(transparent)]
    Roa(#[from] RoaParseError),

    /// A single object could not be parsed
    #[error("Record error: {0}")]
    Record(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MirrorError {
    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Expected, transient failures that are logged without detail
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

impl From<StorageError> for MirrorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Integrity(message) => Self::Integrity(message),
            other => Self::Storage(other),
        }
    }
}

impl From<RoutingError> for MirrorError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::Storage(err) => err.into(),
            RoutingError::RoaParse(err) => Self::Roa(err),
        }
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for mirror operations
pub type MirrorResult<T> = Result<T, MirrorError>;
