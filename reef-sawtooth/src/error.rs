//! Error types for reef-sawtooth

use thiserror::Error;

/// Shorthand for aggregation results
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregation error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Aggregation references a column absent from the input schema
    #[error("unknown input column '{0}'")]
    UnknownColumn(String),

    /// Operation cannot run over the input column's declared type
    #[error("operation '{operation}' does not support input type '{input_type}' (column '{column}')")]
    UnsupportedInput {
        operation: String,
        column: String,
        input_type: String,
    },

    /// `last_k` declared without a k
    #[error("aggregation on '{0}' is last_k but has no k")]
    MissingK(String),

    /// Batch IR shape disagrees with the aggregation plan
    #[error("batch IR mismatch: {0}")]
    IrMismatch(String),

    /// A partial's shape disagrees with its operation
    #[error("corrupt partial for column '{column}': {message}")]
    CorruptPartial { column: String, message: String },

    /// A streaming row failed to decode during the fold
    #[error("row decode failed during fold: {0}")]
    Decode(#[from] reef_codec::Error),
}

impl Error {
    /// Create an IR mismatch error
    pub fn ir_mismatch(msg: impl Into<String>) -> Self {
        Error::IrMismatch(msg.into())
    }

    /// Create a corrupt-partial error
    pub fn corrupt(column: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::CorruptPartial {
            column: column.into(),
            message: msg.into(),
        }
    }
}
