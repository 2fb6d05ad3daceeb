//! Table and column metadata.
//!
//! `TableDescription` is the raw shape a storage backend reports when asked to
//! describe a table. `TableInfo` is the validated view the engine works with:
//! primary-key columns ordered by their position in the key, non-key columns in
//! declaration order.

use serde::{Deserialize, Serialize};

/// A column as reported by schema introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub cid: i64,
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    /// 1-based position within the primary key, 0 when not part of it.
    pub pk_position: u32,
}

/// A table as reported by schema introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

impl TableDescription {
    pub fn primary_key_exists(&self) -> bool {
        self.columns.iter().any(|c| c.pk_position > 0)
    }
}

/// A column of a tracked table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub is_primary_key: bool,
}

impl From<&ColumnDescription> for ColumnInfo {
    fn from(desc: &ColumnDescription) -> Self {
        ColumnInfo {
            cid: desc.cid,
            name: desc.name.clone(),
            decl_type: desc.decl_type.clone(),
            not_null: desc.not_null,
            is_primary_key: desc.pk_position > 0,
        }
    }
}

/// Metadata of a tracked table for one schema epoch.
///
/// The order of `pks` is load-bearing: it is the component order of every
/// packed primary key produced or consumed for this table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub pks: Vec<ColumnInfo>,
    pub non_pks: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Whether the table consists solely of primary-key columns.
    pub fn is_pk_only(&self) -> bool {
        self.non_pks.is_empty()
    }

    pub fn pk_names(&self) -> Vec<&str> {
        self.pks.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn non_pk(&self, name: &str) -> Option<&ColumnInfo> {
        self.non_pks.iter().find(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.pks.iter().chain(self.non_pks.iter()).find(|c| c.name == name)
    }

    pub fn is_pk_column(&self, name: &str) -> bool {
        self.pks.iter().any(|c| c.name == name)
    }
}
