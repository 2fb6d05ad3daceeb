//! Table metadata loading and caching.
//!
//! [`load_table_info`] turns the store's raw description of a table into a
//! validated [`TableInfo`]. [`MetadataCache`] keeps the results for one schema
//! epoch and drops everything as soon as the store reports a different schema
//! version.

use crate::error::{EngineError, Result};
use crrow_core::{ColumnId, ColumnInfo, TableInfo};
use crrow_store::SchemaSource;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Packed keys carry their component count in a single byte.
pub const MAX_PK_COLUMNS: usize = u8::MAX as usize;

/// Introspect `table` and build its metadata.
///
/// Key columns are ordered by key position, other columns keep declaration
/// order. Tables without a primary key, with too many key columns, or with a
/// column named like a clock sentinel are rejected.
pub fn load_table_info<S: SchemaSource + ?Sized>(store: &S, table: &str) -> Result<TableInfo> {
    let desc = store
        .describe_table(table)?
        .ok_or_else(|| EngineError::NotFound {
            table: table.to_string(),
        })?;

    if !desc.primary_key_exists() {
        return Err(EngineError::Unsupported {
            table: table.to_string(),
            reason: "table has no primary key".to_string(),
        });
    }
    if let Some(column) = desc.columns.iter().find(|c| ColumnId::is_reserved_name(&c.name)) {
        return Err(EngineError::Unsupported {
            table: table.to_string(),
            reason: format!("column name {} is reserved", column.name),
        });
    }

    let mut keyed: Vec<_> = desc.columns.iter().filter(|c| c.pk_position > 0).collect();
    if keyed.len() > MAX_PK_COLUMNS {
        return Err(EngineError::Unsupported {
            table: table.to_string(),
            reason: format!("{} primary-key columns exceed {}", keyed.len(), MAX_PK_COLUMNS),
        });
    }
    keyed.sort_by_key(|c| c.pk_position);

    Ok(TableInfo {
        name: desc.name.clone(),
        pks: keyed.into_iter().map(ColumnInfo::from).collect(),
        non_pks: desc
            .columns
            .iter()
            .filter(|c| c.pk_position == 0)
            .map(ColumnInfo::from)
            .collect(),
    })
}

/// Metadata of tracked tables for a single schema version.
#[derive(Debug, Default)]
pub struct MetadataCache {
    schema_version: Option<u64>,
    tables: BTreeMap<String, Arc<TableInfo>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached metadata for `table`, loading it on a miss.
    pub fn get_or_load<S: SchemaSource + ?Sized>(
        &mut self,
        store: &S,
        table: &str,
    ) -> Result<Arc<TableInfo>> {
        let version = store.schema_version();
        if self.schema_version != Some(version) {
            if !self.tables.is_empty() {
                debug!(
                    from = ?self.schema_version,
                    to = version,
                    "schema changed, dropping cached table metadata"
                );
            }
            self.tables.clear();
            self.schema_version = Some(version);
        }

        if let Some(info) = self.tables.get(table) {
            return Ok(Arc::clone(info));
        }
        let info = Arc::new(load_table_info(store, table)?);
        self.tables.insert(table.to_string(), Arc::clone(&info));
        Ok(info)
    }

    pub fn clear(&mut self) {
        self.schema_version = None;
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
