//! Error taxonomy shared by every hotchpotch operation

use crate::object::{RevId, StoreId};

/// Result type for hotchpotch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the store, writer and connector APIs
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown document, revision or part on the queried store(s)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal transaction-lifecycle operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Heads could not be collapsed by ancestry
    #[error("Conflict between {} divergent heads", .0.len())]
    Conflict(Vec<RevId>),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(StoreId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl Error {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Database(e.to_string())
    }
}
