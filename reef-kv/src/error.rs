//! Error types for reef-kv

use thiserror::Error;

/// Shorthand for results of key-value operations
pub type Result<T> = std::result::Result<T, Error>;

/// Key-value layer error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The underlying store failed wholesale (connection loss, auth, ...)
    #[error("store error: {0}")]
    Store(String),

    /// A single key's read failed inside an otherwise successful multi-get
    #[error("read error: {0}")]
    Read(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Create a per-key read error
    pub fn read(msg: impl Into<String>) -> Self {
        Error::Read(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}
