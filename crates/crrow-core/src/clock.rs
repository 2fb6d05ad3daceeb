//! Per-(row, column) clock entries.

use crate::error::CoreError;
use crate::key::PackedKey;
use crate::site::SiteId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical clock of a replica.
pub type DbVersion = i64;

/// Version of a fresh database with no tracked writes.
pub const MIN_DB_VERSION: DbVersion = 0;

/// Column identifier marking a deleted row.
pub const DELETE_SENTINEL: &str = "__crrow_del";

/// Column identifier marking a row that exists only through its primary key.
pub const PK_ONLY_SENTINEL: &str = "__crrow_pko";

/// Which part of a row a clock entry or change refers to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ColumnId {
    /// A real non-primary-key column, by name.
    Column(String),
    /// The row was deleted.
    Delete,
    /// Only the row's primary key was written.
    PkOnly,
}

impl ColumnId {
    pub fn column(name: impl Into<String>) -> Self {
        ColumnId::Column(name.into())
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, ColumnId::Column(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ColumnId::Column(name) => name,
            ColumnId::Delete => DELETE_SENTINEL,
            ColumnId::PkOnly => PK_ONLY_SENTINEL,
        }
    }

    /// Whether a user column name would be mistaken for a sentinel.
    pub fn is_reserved_name(name: &str) -> bool {
        name == DELETE_SENTINEL || name == PK_ONLY_SENTINEL
    }
}

impl From<ColumnId> for String {
    fn from(id: ColumnId) -> Self {
        match id {
            ColumnId::Column(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl TryFrom<String> for ColumnId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "" => Err(CoreError::EmptyColumnId),
            DELETE_SENTINEL => Ok(ColumnId::Delete),
            PK_ONLY_SENTINEL => Ok(ColumnId::PkOnly),
            _ => Ok(ColumnId::Column(s)),
        }
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnId::Column(name) => write!(f, "Column({:?})", name),
            ColumnId::Delete => write!(f, "Delete"),
            ColumnId::PkOnly => write!(f, "PkOnly"),
        }
    }
}

/// The last write recorded for one (row, column) pair.
///
/// At most one entry exists per `(pk, column)`; a newer write replaces it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEntry {
    pub pk: PackedKey,
    pub column: ColumnId,
    /// db version at the time this column was last written.
    pub column_version: DbVersion,
    /// Version of the transaction that produced the entry.
    pub db_version: DbVersion,
    /// Writer of the entry; `None` means this replica.
    pub site_id: Option<SiteId>,
    /// Position of the write within its transaction.
    pub seq: i64,
}

impl ClockEntry {
    pub fn is_tombstone(&self) -> bool {
        self.column == ColumnId::Delete
    }

    /// The writer, resolving local attribution to `local`.
    pub fn writer(&self, local: SiteId) -> SiteId {
        self.site_id.unwrap_or(local)
    }
}
