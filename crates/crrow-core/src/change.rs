//! The unit of replication.

use crate::clock::{ColumnId, DbVersion};
use crate::key::PackedKey;
use crate::site::SiteId;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One (row, column) change, as produced by extraction and consumed by merge.
///
/// `pk` components are in the table's primary-key order. `value` is `None`
/// for delete and pk-only records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: String,
    pub pk: PackedKey,
    pub column: ColumnId,
    pub value: Option<Value>,
    pub column_version: DbVersion,
    pub db_version: DbVersion,
    pub site_id: SiteId,
}

impl ChangeRecord {
    /// A change to a regular column.
    pub fn column(
        table: impl Into<String>,
        pk: PackedKey,
        column: impl Into<String>,
        value: Value,
        column_version: DbVersion,
        db_version: DbVersion,
        site_id: SiteId,
    ) -> Self {
        ChangeRecord {
            table: table.into(),
            pk,
            column: ColumnId::Column(column.into()),
            value: Some(value),
            column_version,
            db_version,
            site_id,
        }
    }

    /// A row deletion.
    pub fn delete(
        table: impl Into<String>,
        pk: PackedKey,
        column_version: DbVersion,
        db_version: DbVersion,
        site_id: SiteId,
    ) -> Self {
        ChangeRecord {
            table: table.into(),
            pk,
            column: ColumnId::Delete,
            value: None,
            column_version,
            db_version,
            site_id,
        }
    }

    /// A row that carries nothing but its primary key.
    pub fn pk_only(
        table: impl Into<String>,
        pk: PackedKey,
        column_version: DbVersion,
        db_version: DbVersion,
        site_id: SiteId,
    ) -> Self {
        ChangeRecord {
            table: table.into(),
            pk,
            column: ColumnId::PkOnly,
            value: None,
            column_version,
            db_version,
            site_id,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.column == ColumnId::Delete
    }
}
