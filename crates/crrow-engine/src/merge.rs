//! Merge of remote change records.
//!
//! Per record:
//! 1. Resolve the table's metadata and decode the primary key
//! 2. A local tombstone discards every non-delete record for the row
//! 3. Deletes remove the row and install the remote tombstone
//! 4. PK-only records insert the bare key
//! 5. Column records go through winner determination and, if the remote
//!    write wins, are upserted into the base table
//!
//! Base-table writes run with the sync bit set. Winning records leave the
//! remote `column_version`, `db_version` and site id in the clock entry.
//! Atomicity of a record is the caller's concern; [`crate::Replica`] wraps each
//! record in a savepoint.

use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::error::{EngineError, Result};
use crrow_core::winner::{remote_wins, LocalState, Verdict};
use crrow_core::{ChangeRecord, ClockEntry, ColumnId, Value};
use crrow_store::{Result as StoreResult, Store};
use tracing::trace;

/// Why a record left local state untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    /// The row carries a local tombstone.
    RowDeleted,
    /// The local write has a higher version, or wins the value tie-break.
    LocalWins,
    /// Same version and value on both sides.
    Converged,
    /// A tombstone or PK-only marker at least as new is already present.
    NotNewer,
}

/// Result of merging one record. Neither variant is an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    Discarded(DiscardReason),
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied)
    }
}

/// Summary of a batch merge. Failed records are reported by their index in
/// the batch and did not stop the records after them.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub applied: usize,
    pub discarded: usize,
    pub failed: Vec<(usize, EngineError)>,
}

impl MergeReport {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Applied => self.applied += 1,
            MergeOutcome::Discarded(_) => self.discarded += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.discarded + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `f` with the sync bit set, restoring its previous value afterwards.
pub fn with_sync_bit<S, T, F>(store: &mut S, f: F) -> StoreResult<T>
where
    S: Store + ?Sized,
    F: FnOnce(&mut S) -> StoreResult<T>,
{
    let previous = store.sync_bit();
    store.set_sync_bit(true);
    let result = f(store);
    store.set_sync_bit(previous);
    result
}

/// Merge one record into local state.
pub fn merge_record<S: Store + ?Sized>(
    store: &mut S,
    ctx: &mut SyncContext,
    config: &EngineConfig,
    record: &ChangeRecord,
) -> Result<MergeOutcome> {
    let table = record.table.as_str();
    let info = ctx.table_info(store, table)?;
    let pk = record
        .pk
        .unpack_for(table, info.pks.len())
        .map_err(|source| EngineError::Corruption {
            table: table.to_string(),
            raw_pk: record.pk.as_bytes().to_vec(),
            source,
        })?;

    let local_site = ctx.site_id(store)?;
    let remote_clock = ClockEntry {
        pk: record.pk.clone(),
        column: record.column.clone(),
        column_version: record.column_version,
        db_version: record.db_version,
        site_id: (record.site_id != local_site).then_some(record.site_id),
        seq: 0,
    };

    let tombstone = store.get_clock(table, &record.pk, &ColumnId::Delete)?;
    let outcome = match &record.column {
        ColumnId::Delete => {
            if let Some(local) = tombstone {
                if local.column_version >= record.column_version {
                    return Ok(discard(record, DiscardReason::NotNewer));
                }
            }
            with_sync_bit(store, |s| s.delete_row(table, &pk))?;
            store.put_clock(table, ClockEntry { seq: ctx.next_seq(), ..remote_clock })?;
            store.clear_row_clocks(table, &record.pk)?;
            MergeOutcome::Applied
        }
        _ if tombstone.is_some() => return Ok(discard(record, DiscardReason::RowDeleted)),
        ColumnId::PkOnly => {
            if let Some(local) = store.get_clock(table, &record.pk, &ColumnId::PkOnly)? {
                if local.column_version >= record.column_version {
                    return Ok(discard(record, DiscardReason::NotNewer));
                }
            }
            with_sync_bit(store, |s| s.insert_pk_only(table, &pk))?;
            store.put_clock(table, ClockEntry { seq: ctx.next_seq(), ..remote_clock })?;
            MergeOutcome::Applied
        }
        ColumnId::Column(name) => {
            if info.non_pk(name).is_none() {
                return Err(EngineError::SchemaDrift {
                    table: table.to_string(),
                    column: name.clone(),
                });
            }

            let remote_value = record.value.clone().unwrap_or(Value::Null);
            let local_entry = store.get_clock(table, &record.pk, &record.column)?;
            let local_value = match &local_entry {
                Some(_) => Some(store.read_column(table, &pk, name)?.ok_or_else(|| {
                    EngineError::Internal(format!(
                        "clock entry {}.{} at {} has no base row",
                        table, name, record.pk
                    ))
                })?),
                None => None,
            };
            let local = local_entry.as_ref().zip(local_value.as_ref()).map(|(entry, value)| {
                LocalState {
                    column_version: entry.column_version,
                    value,
                }
            });

            let verdict = remote_wins(record.column_version, &remote_value, local);
            if !verdict.should_apply(config.merge_equal_values) {
                let reason = match verdict {
                    Verdict::Converged => DiscardReason::Converged,
                    _ => DiscardReason::LocalWins,
                };
                return Ok(discard(record, reason));
            }

            with_sync_bit(store, |s| s.upsert_column(table, &pk, name, &remote_value))?;
            store.put_clock(table, ClockEntry { seq: ctx.next_seq(), ..remote_clock })?;
            MergeOutcome::Applied
        }
    };

    ctx.observe_merge(record.site_id, record.db_version, config.track_seen_peers);
    trace!(
        table,
        pk = %record.pk,
        column = %record.column,
        version = record.column_version,
        "applied"
    );
    Ok(outcome)
}

fn discard(record: &ChangeRecord, reason: DiscardReason) -> MergeOutcome {
    trace!(
        table = %record.table,
        pk = %record.pk,
        column = %record.column,
        ?reason,
        "discarded"
    );
    MergeOutcome::Discarded(reason)
}
