//! Clock maintenance after a tracked table's schema changes.
//!
//! Dropping a column leaves clock entries that name it, and extraction would
//! refuse to ship them. Adding a column leaves existing rows without a clock
//! entry for it. [`compact_after_alter`] brings the clock table back in line
//! with the current schema:
//!
//! - entries for columns that no longer exist are removed
//! - entries whose base row is gone are removed, tombstones are kept
//! - if the primary key changed shape, every entry is removed and the table is
//!   stamped again from scratch
//! - rows that lack an entry for a live column are backfilled
//!
//! Backfilled entries get a fresh local version, so peers receive the values
//! of added columns on their next pull.

use crate::context::SyncContext;
use crate::error::Result;
use crate::triggers;
use crrow_core::{ClockEntry, ColumnId, DbVersion, TableInfo, Value};
use crrow_store::Store;
use tracing::{debug, trace};

/// What a compaction pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Entries naming a column the table no longer has.
    pub stale_columns: usize,
    /// Entries for rows that no longer exist in the base table.
    pub orphaned: usize,
    /// Whether the key shape changed and the clock table was rebuilt.
    pub rekeyed: bool,
    /// Entries created for rows that were missing one.
    pub backfilled: usize,
}

impl CompactionReport {
    pub fn removed(&self) -> usize {
        self.stale_columns + self.orphaned
    }

    pub fn is_noop(&self) -> bool {
        self.removed() == 0 && !self.rekeyed && self.backfilled == 0
    }
}

/// Reconcile the clock table of `info.name` with its current schema.
///
/// Must run inside a transaction; [`crate::Replica::compact_after_alter`]
/// takes care of that.
pub fn compact_after_alter<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
) -> Result<CompactionReport> {
    let table = info.name.as_str();
    let entries = store.scan_clocks(table, DbVersion::MIN)?;
    let mut report = CompactionReport::default();

    let arity = info.pks.len();
    let rekeyed = entries
        .iter()
        .any(|entry| !matches!(entry.pk.unpack(), Ok(values) if values.len() == arity));

    if rekeyed {
        debug!(table, entries = entries.len(), "primary key changed, rebuilding clock table");
        for entry in &entries {
            store.delete_clock(table, &entry.pk, &entry.column)?;
        }
        report.rekeyed = true;
    } else {
        for entry in &entries {
            match stale_reason(&*store, info, entry)? {
                Some(Stale::Column) => report.stale_columns += 1,
                Some(Stale::Orphan) => report.orphaned += 1,
                None => continue,
            }
            trace!(table, pk = %entry.pk, column = %entry.column, "dropping stale clock entry");
            store.delete_clock(table, &entry.pk, &entry.column)?;
        }
    }

    report.backfilled = triggers::backfill(store, ctx, info)?;
    debug!(
        table,
        stale_columns = report.stale_columns,
        orphaned = report.orphaned,
        rekeyed = report.rekeyed,
        backfilled = report.backfilled,
        "compacted clock table"
    );
    Ok(report)
}

enum Stale {
    Column,
    Orphan,
}

fn stale_reason<S: Store + ?Sized>(
    store: &S,
    info: &TableInfo,
    entry: &ClockEntry,
) -> Result<Option<Stale>> {
    match &entry.column {
        ColumnId::Delete => return Ok(None),
        ColumnId::Column(name) if info.non_pk(name).is_none() => return Ok(Some(Stale::Column)),
        ColumnId::PkOnly if !info.is_pk_only() => return Ok(Some(Stale::Column)),
        _ => {}
    }

    let pk: Vec<Value> = entry.pk.unpack()?;
    if store.read_row(&info.name, &pk)?.is_none() {
        return Ok(Some(Stale::Orphan));
    }
    Ok(None)
}
