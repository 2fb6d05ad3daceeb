//! Error types for the core data model.

use thiserror::Error;

/// Errors raised while decoding or validating core types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Malformed packed key ({reason}): {raw:02x?}")]
    KeyDecode { reason: String, raw: Vec<u8> },

    #[error("Cannot pack key: {reason}")]
    KeyEncode { reason: String },

    #[error("Packed key for {table} has {found} components, expected {expected}: {raw:02x?}")]
    KeyArity {
        table: String,
        expected: usize,
        found: usize,
        raw: Vec<u8>,
    },

    #[error("Site id must be 16 bytes, got {len}")]
    InvalidSiteId { len: usize },

    #[error("Empty column identifier")]
    EmptyColumnId,
}

pub type Result<T> = std::result::Result<T, CoreError>;
