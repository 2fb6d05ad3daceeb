//! Change extraction.
//!
//! [`ChangeCursor::open`] selects the qualifying clock entries of every tracked
//! table up front and orders them by `(db_version, seq, table, pk, column)`.
//! Column values are read from the base tables one record at a time as the
//! cursor advances. Re-opening with the same bounds yields the same records
//! as long as nothing was written in between.

use crate::context::SyncContext;
use crate::error::{EngineError, Result};
use crrow_core::{ChangeRecord, ClockEntry, ColumnId, DbVersion, SiteId, TableInfo};
use crrow_store::Store;
use std::sync::Arc;
use tracing::trace;

/// Finite, ordered iterator over the changes selected at open time.
///
/// The first error ends the iteration.
pub struct ChangeCursor<'a, S: Store + ?Sized> {
    store: &'a S,
    local_site: SiteId,
    pending: std::vec::IntoIter<(Arc<TableInfo>, ClockEntry)>,
}

impl<'a, S: Store + ?Sized> ChangeCursor<'a, S> {
    /// Select entries with `db_version > since` whose writer is not `exclude`.
    ///
    /// Must be called with the context already holding the site id.
    pub fn open(
        store: &'a S,
        ctx: &mut SyncContext,
        since: DbVersion,
        exclude: Option<SiteId>,
    ) -> Result<Self> {
        let local_site = ctx
            .cached_site_id()
            .ok_or_else(|| EngineError::Internal("site id not loaded".to_string()))?;

        let mut selected = Vec::new();
        for table in store.tracked_tables() {
            let info = ctx.table_info(store, &table).map_err(|err| {
                EngineError::Internal(format!("metadata for {} unavailable: {}", table, err))
            })?;
            for entry in store.scan_clocks(&table, since)? {
                if Some(entry.writer(local_site)) == exclude {
                    continue;
                }
                selected.push((Arc::clone(&info), entry));
            }
        }

        selected.sort_by(|(ta, a), (tb, b)| {
            (a.db_version, a.seq, &ta.name, &a.pk, &a.column)
                .cmp(&(b.db_version, b.seq, &tb.name, &b.pk, &b.column))
        });
        trace!(since, selected = selected.len(), "opened change cursor");

        Ok(ChangeCursor {
            store,
            local_site,
            pending: selected.into_iter(),
        })
    }

    /// Number of records not yet produced.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    fn resolve(&self, info: &TableInfo, entry: ClockEntry) -> Result<ChangeRecord> {
        let value = match &entry.column {
            ColumnId::Delete | ColumnId::PkOnly => None,
            ColumnId::Column(name) => {
                if info.non_pk(name).is_none() {
                    return Err(EngineError::SchemaDrift {
                        table: info.name.clone(),
                        column: name.clone(),
                    });
                }
                let pk = entry.pk.unpack_for(&info.name, info.pks.len()).map_err(|source| {
                    EngineError::Corruption {
                        table: info.name.clone(),
                        raw_pk: entry.pk.as_bytes().to_vec(),
                        source,
                    }
                })?;
                let value = self.store.read_column(&info.name, &pk, name)?.ok_or_else(|| {
                    EngineError::Internal(format!(
                        "clock entry {}.{} at {} has no base row",
                        info.name, name, entry.pk
                    ))
                })?;
                Some(value)
            }
        };

        let record = ChangeRecord {
            table: info.name.clone(),
            site_id: entry.writer(self.local_site),
            pk: entry.pk,
            column: entry.column,
            value,
            column_version: entry.column_version,
            db_version: entry.db_version,
        };
        trace!(table = %record.table, pk = %record.pk, column = %record.column, "extracted");
        Ok(record)
    }
}

impl<S: Store + ?Sized> Iterator for ChangeCursor<'_, S> {
    type Item = Result<ChangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let (info, entry) = self.pending.next()?;
        let result = self.resolve(&info, entry);
        if result.is_err() {
            self.pending = Vec::new().into_iter();
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

/// Split records into batches of about `max` records without separating
/// records that share a db version.
pub fn batch_by_version(records: Vec<ChangeRecord>, max: usize) -> Vec<Vec<ChangeRecord>> {
    let max = max.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<ChangeRecord> = Vec::new();

    for record in records {
        let boundary = current
            .last()
            .map_or(false, |last| last.db_version != record.db_version);
        if current.len() >= max && boundary {
            batches.push(std::mem::take(&mut current));
        }
        current.push(record);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crrow_core::{PackedKey, Value};

    fn record(db_version: DbVersion) -> ChangeRecord {
        ChangeRecord::column(
            "foo",
            PackedKey::pack(&[Value::Integer(db_version)]).unwrap(),
            "b",
            Value::Integer(db_version),
            db_version,
            db_version,
            SiteId::from_bytes([1; 16]),
        )
    }

    #[test]
    fn test_batches_do_not_split_versions() {
        let records = vec![record(1), record(1), record(1), record(2), record(3)];
        let batches = batch_by_version(records, 2);
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[test]
    fn test_empty_input_has_no_batches() {
        assert!(batch_by_version(Vec::new(), 10).is_empty());
    }
}
