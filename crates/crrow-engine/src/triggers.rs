//! Trigger bridge: turns local row writes into clock entries.
//!
//! Each hook runs after the base-table write it describes and stamps the
//! affected (row, column) pairs with the transaction's next version. Every
//! hook is a no-op while the store's sync bit is set, which is how merged
//! writes avoid being recorded as local changes.

use crate::context::SyncContext;
use crate::error::{EngineError, Result};
use crrow_core::{ClockEntry, ColumnId, PackedKey, TableInfo, Value};
use crrow_store::{Row, RowUpdate, Store};
use tracing::{debug, trace};

/// Primary-key values of `row`, in key order.
pub fn pk_values(info: &TableInfo, row: &Row) -> Result<Vec<Value>> {
    info.pks
        .iter()
        .map(|column| {
            row.get(&column.name).cloned().ok_or_else(|| {
                EngineError::Internal(format!(
                    "row of {} is missing key column {}",
                    info.name, column.name
                ))
            })
        })
        .collect()
}

pub fn after_insert<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
    row: &Row,
) -> Result<()> {
    if store.sync_bit() {
        return Ok(());
    }
    let key = PackedKey::pack(&pk_values(info, row)?)?;
    stamp_created(store, ctx, info, &key)
}

/// Stamp the columns whose value changed. A rewritten primary key deletes the
/// old key and creates the new one.
pub fn after_update<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
    update: &RowUpdate,
) -> Result<()> {
    if store.sync_bit() {
        return Ok(());
    }

    let old_pk = pk_values(info, &update.old)?;
    let new_pk = pk_values(info, &update.new)?;
    if old_pk != new_pk {
        let old_key = PackedKey::pack(&old_pk)?;
        let new_key = PackedKey::pack(&new_pk)?;
        trace!(table = %info.name, old = %old_key, new = %new_key, "primary key rewritten");
        stamp_deleted(store, ctx, info, &old_key)?;
        return stamp_created(store, ctx, info, &new_key);
    }

    let key = PackedKey::pack(&new_pk)?;
    for column in &info.non_pks {
        if update.old.get(&column.name) != update.new.get(&column.name) {
            stamp(store, ctx, info, &key, ColumnId::column(column.name.as_str()))?;
        }
    }
    Ok(())
}

pub fn after_delete<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
    old: &Row,
) -> Result<()> {
    if store.sync_bit() {
        return Ok(());
    }
    let key = PackedKey::pack(&pk_values(info, old)?)?;
    stamp_deleted(store, ctx, info, &key)
}

/// Stamp rows that existed before the table was tracked. Pairs that already
/// have a clock entry are left alone, so running it twice is harmless.
pub fn backfill<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
) -> Result<usize> {
    let mut stamped = 0;
    for row in store.scan_rows(&info.name)? {
        let key = PackedKey::pack(&pk_values(info, &row)?)?;
        if store.get_clock(&info.name, &key, &ColumnId::Delete)?.is_some() {
            continue;
        }

        let columns: Vec<ColumnId> = if info.is_pk_only() {
            vec![ColumnId::PkOnly]
        } else {
            info.non_pks
                .iter()
                .map(|c| ColumnId::column(c.name.as_str()))
                .collect()
        };
        for column in columns {
            if store.get_clock(&info.name, &key, &column)?.is_none() {
                stamp(store, ctx, info, &key, column)?;
                stamped += 1;
            }
        }
    }

    if stamped > 0 {
        debug!(table = %info.name, entries = stamped, "backfilled clock entries");
    }
    Ok(stamped)
}

fn stamp_created<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
    key: &PackedKey,
) -> Result<()> {
    if store.get_clock(&info.name, key, &ColumnId::Delete)?.is_some() {
        return Err(EngineError::Unsupported {
            table: info.name.clone(),
            reason: format!("key {} was deleted and cannot be reused", key),
        });
    }

    if info.is_pk_only() {
        return stamp(store, ctx, info, key, ColumnId::PkOnly);
    }
    for column in &info.non_pks {
        stamp(store, ctx, info, key, ColumnId::column(column.name.as_str()))?;
    }
    Ok(())
}

fn stamp_deleted<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
    key: &PackedKey,
) -> Result<()> {
    stamp(store, ctx, info, key, ColumnId::Delete)?;
    store.clear_row_clocks(&info.name, key)?;
    Ok(())
}

fn stamp<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    info: &TableInfo,
    key: &PackedKey,
    column: ColumnId,
) -> Result<()> {
    let version = ctx.next_version(store)?;
    let entry = ClockEntry {
        pk: key.clone(),
        column,
        column_version: version,
        db_version: version,
        site_id: None,
        seq: ctx.next_seq(),
    };
    trace!(table = %info.name, pk = %key, column = %entry.column, version, "stamp");
    store.put_clock(&info.name, entry)?;
    Ok(())
}
