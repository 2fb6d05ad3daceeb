//! Error types for the sync engine.

use crrow_core::CoreError;
use crrow_store::StoreError;
use thiserror::Error;

/// Errors surfaced by tracking, extraction and merge.
///
/// A remote write that loses to local state is not an error; see
/// [`crate::MergeOutcome::Discarded`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Table not found or not tracked: {table}")]
    NotFound { table: String },

    #[error("Unsupported on {table}: {reason}")]
    Unsupported { table: String, reason: String },

    /// A clock entry or record names a column the local table lacks. After
    /// dropping columns locally, [`crate::Replica::compact_after_alter`]
    /// removes the stale entries.
    #[error("Column {column} of {table} does not exist locally")]
    SchemaDrift { table: String, column: String },

    #[error("Corrupt primary key in {table} ({raw_pk:02x?}): {source}")]
    Corruption {
        table: String,
        raw_pk: Vec<u8>,
        source: CoreError,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
