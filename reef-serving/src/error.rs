//! Fetch error taxonomy
//!
//! Every failure a Response can carry is one of these kinds. Failures are
//! values: they travel inside `Response.values`, never as panics, and a
//! failed Response never poisons its siblings in a batch.

use std::time::Duration;
use thiserror::Error;

/// Per-request fetch failure
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// No serving metadata exists for the requested feature set
    #[error("no serving metadata for '{0}'")]
    MetadataMissing(String),

    /// Key encoding failed even after the coercion fallback.
    ///
    /// Carries both failures: the strict encode error and the error from
    /// the coerce-and-retry pass.
    #[error("key encoding failed for '{name}': {primary} (coercion fallback: {fallback})")]
    EncodeKeys {
        /// Feature set name
        name: String,
        /// Strict-encode failure
        primary: String,
        /// Fallback failure
        fallback: String,
    },

    /// Batch response absent for a request that required it
    #[error("batch response missing for '{0}'")]
    BatchMissing(String),

    /// Bytes→row/IR conversion failed
    #[error("decode failed for '{name}': {message}")]
    Decode {
        /// Feature set or join name
        name: String,
        /// Underlying codec failure
        message: String,
    },

    /// Aggregator failed during folding or finalize
    #[error("aggregation failed for '{name}': {message}")]
    Aggregate {
        /// Feature set name
        name: String,
        /// Underlying aggregation failure
        message: String,
    },

    /// Overall fetch deadline exceeded
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying multi-get failed wholesale
    #[error("key-value store failure: {0}")]
    KvStore(String),
}

impl FetchError {
    /// Create a decode failure
    pub fn decode(name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        FetchError::Decode {
            name: name.into(),
            message: err.to_string(),
        }
    }

    /// Create an aggregation failure
    pub fn aggregate(name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        FetchError::Aggregate {
            name: name.into(),
            message: err.to_string(),
        }
    }

    /// Create a key-value store failure
    pub fn kv(err: impl std::fmt::Display) -> Self {
        FetchError::KvStore(err.to_string())
    }
}
