//! Error types for the storage layer.

use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    #[error("Table has no clock table: {0}")]
    NotTracked(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("No transaction is open")]
    NoTransaction,

    #[error("No savepoint named {0}")]
    NoSavepoint(String),

    #[error("Constraint violation on {table}: {reason}")]
    ConstraintViolation { table: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
