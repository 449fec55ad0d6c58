//! Error types for reef-codec

use thiserror::Error;

/// Shorthand for encode/decode results
pub type Result<T> = std::result::Result<T, Error>;

/// Codec error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The payload ends mid-value. Rows and IRs are stored whole, so a
    /// short read means corruption, not a partial frame; the value is the
    /// minimum length the encoding claims.
    #[error("truncated payload: need at least {0} bytes")]
    Truncated(usize),

    /// The row header names a format version this build does not read.
    #[error("unsupported row version: {0}")]
    UnsupportedVersion(u8),

    /// IR payload has wrong magic bytes.
    #[error("invalid IR magic bytes")]
    InvalidMagic,

    /// Unknown tag byte in a tagged value or partial encoding.
    #[error("invalid tag: 0x{0:02x}")]
    InvalidTag(u8),

    /// Payload field count disagrees with the bound schema.
    #[error("field count mismatch: schema has {expected}, payload has {actual}")]
    FieldCountMismatch { expected: usize, actual: usize },

    /// A value's shape disagrees with the declared field type.
    #[error("type mismatch for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// String payload is not valid UTF-8.
    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    /// Decoded fewer/more bytes than the payload holds.
    #[error("trailing garbage: {0} bytes past end of payload")]
    TrailingBytes(usize),

    /// Coercion fallback failed.
    #[error("coercion error: {0}")]
    Coercion(#[from] crate::coerce::CoercionError),
}

impl Error {
    /// Create a type mismatch error
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Error::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
