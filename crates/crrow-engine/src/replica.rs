//! A store bound to its sync context.
//!
//! `Replica` is the entry point for applications: it tracks tables, performs
//! local writes through the trigger bridge, extracts changes for peers and
//! merges theirs. Every operation issued outside an explicit transaction runs
//! in its own implicit one, and every write or merged record runs inside a
//! savepoint so a failure leaves no partial base or clock write behind.

use crate::alter::{self, CompactionReport};
use crate::config::EngineConfig;
use crate::context::SyncContext;
use crate::error::{EngineError, Result};
use crate::extract::{batch_by_version, ChangeCursor};
use crate::merge::{merge_record, MergeOutcome, MergeReport};
use crate::metadata::load_table_info;
use crate::triggers;
use crrow_core::{ChangeRecord, ClockEntry, DbVersion, SiteId, Value, MIN_DB_VERSION};
use crrow_store::{Row, Store};
use tracing::{debug, warn};

const STATEMENT_SAVEPOINT: &str = "crrow_statement";

pub struct Replica<S: Store> {
    store: S,
    ctx: SyncContext,
    config: EngineConfig,
    site_id: SiteId,
}

impl<S: Store> Replica<S> {
    /// Open a replica with the default configuration.
    pub fn open(store: S) -> Result<Self> {
        Self::with_config(store, EngineConfig::default())
    }

    /// Open a replica, loading or minting its site id.
    pub fn with_config(mut store: S, config: EngineConfig) -> Result<Self> {
        let mut ctx = SyncContext::new();
        let site_id = ctx.site_id(&mut store)?;
        Ok(Replica {
            store,
            ctx,
            config,
            site_id,
        })
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct access to the store, bypassing change tracking.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn begin(&mut self) -> Result<()> {
        self.store.begin()?;
        Ok(())
    }

    /// Commit the open transaction, persisting the peers seen while merging.
    pub fn commit(&mut self) -> Result<()> {
        if let Err(err) = self.ctx.flush_seen_peers(&mut self.store) {
            self.rollback()?;
            return Err(err);
        }
        let result = self.store.commit();
        self.ctx.on_commit();
        Ok(result?)
    }

    pub fn rollback(&mut self) -> Result<()> {
        let result = self.store.rollback();
        self.ctx.on_rollback();
        Ok(result?)
    }

    pub fn in_transaction(&self) -> bool {
        self.store.in_transaction()
    }

    fn autocommit<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.store.in_transaction() {
            return f(self);
        }
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback()?;
                Err(err)
            }
        }
    }

    fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.autocommit(|this| {
            this.store.savepoint(STATEMENT_SAVEPOINT)?;
            match f(this) {
                Ok(value) => {
                    this.store.release(STATEMENT_SAVEPOINT)?;
                    Ok(value)
                }
                Err(err) => {
                    this.store.rollback_to(STATEMENT_SAVEPOINT)?;
                    this.store.release(STATEMENT_SAVEPOINT)?;
                    Err(err)
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Tracking and local writes
    // ------------------------------------------------------------------

    /// Start tracking changes to `table`.
    ///
    /// Tracking an already tracked table only stamps rows that have no clock
    /// entries yet.
    pub fn track_table(&mut self, table: &str) -> Result<()> {
        self.atomically(|this| {
            let info = load_table_info(&this.store, table)?;
            let created = this.store.create_clock_table(table)?;
            debug!(table, created, pks = info.pks.len(), "tracking table");
            if this.config.backfill_on_track {
                triggers::backfill(&mut this.store, &mut this.ctx, &info)?;
            }
            Ok(())
        })
    }

    /// Bring the clock table of `table` in line with its current schema after
    /// columns were added or dropped outside [`Replica::alter_table`].
    pub fn compact_after_alter(&mut self, table: &str) -> Result<CompactionReport> {
        self.atomically(|this| {
            let info = this.ctx.table_info(&this.store, table)?;
            alter::compact_after_alter(&mut this.store, &mut this.ctx, &info)
        })
    }

    /// Run a schema change on a tracked table and compact its clock table in
    /// the same transaction. If either step fails, neither is applied.
    pub fn alter_table(
        &mut self,
        table: &str,
        change: impl FnOnce(&mut S) -> crrow_store::Result<()>,
    ) -> Result<CompactionReport> {
        self.atomically(|this| {
            if !this.store.is_tracked(table) {
                return Err(EngineError::NotFound {
                    table: table.to_string(),
                });
            }
            change(&mut this.store)?;
            let info = this.ctx.table_info(&this.store, table)?;
            alter::compact_after_alter(&mut this.store, &mut this.ctx, &info)
        })
    }

    pub fn is_tracked(&self, table: &str) -> bool {
        self.store.is_tracked(table)
    }

    pub fn insert(&mut self, table: &str, row: Row) -> Result<()> {
        self.atomically(|this| {
            let info = this.ctx.table_info(&this.store, table)?;
            this.store.insert_row(table, &row)?;
            triggers::after_insert(&mut this.store, &mut this.ctx, &info, &row)
        })
    }

    /// Update the row with key `pk`. Returns `false` if there is no such row.
    pub fn update(&mut self, table: &str, pk: &[Value], changes: Row) -> Result<bool> {
        self.atomically(|this| {
            let info = this.ctx.table_info(&this.store, table)?;
            match this.store.update_row(table, pk, &changes)? {
                Some(update) => {
                    triggers::after_update(&mut this.store, &mut this.ctx, &info, &update)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Delete the row with key `pk`. Returns `false` if there is no such row.
    pub fn delete(&mut self, table: &str, pk: &[Value]) -> Result<bool> {
        self.atomically(|this| {
            let info = this.ctx.table_info(&this.store, table)?;
            match this.store.delete_row(table, pk)? {
                Some(old) => {
                    triggers::after_delete(&mut this.store, &mut this.ctx, &info, &old)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    pub fn read_row(&self, table: &str, pk: &[Value]) -> Result<Option<Row>> {
        Ok(self.store.read_row(table, pk)?)
    }

    // ------------------------------------------------------------------
    // Versions and extraction
    // ------------------------------------------------------------------

    /// Last db version written to any clock table.
    pub fn db_version(&mut self) -> Result<DbVersion> {
        self.ctx.current_version(&self.store)
    }

    /// Every clock entry of a tracked table.
    pub fn clock_entries(&self, table: &str) -> Result<Vec<ClockEntry>> {
        if !self.store.is_tracked(table) {
            return Err(EngineError::NotFound {
                table: table.to_string(),
            });
        }
        Ok(self.store.scan_clocks(table, MIN_DB_VERSION)?)
    }

    /// Changes with `db_version > since` not written by `exclude`.
    pub fn changes_since(
        &mut self,
        since: DbVersion,
        exclude: Option<SiteId>,
    ) -> Result<ChangeCursor<'_, S>> {
        ChangeCursor::open(&self.store, &mut self.ctx, since, exclude)
    }

    /// Extracted changes split into batches of about `max_batch_size`
    /// records. A db version is never split across batches.
    pub fn changes_since_batched(
        &mut self,
        since: DbVersion,
        exclude: Option<SiteId>,
    ) -> Result<Vec<Vec<ChangeRecord>>> {
        let max = self.config.max_batch_size;
        let records = self
            .changes_since(since, exclude)?
            .collect::<Result<Vec<_>>>()?;
        Ok(batch_by_version(records, max))
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    /// Merge one remote record.
    pub fn merge(&mut self, record: &ChangeRecord) -> Result<MergeOutcome> {
        self.atomically(|this| merge_record(&mut this.store, &mut this.ctx, &this.config, record))
    }

    /// Merge records in order within one transaction. A failing record is
    /// rolled back on its own and reported; the rest of the batch continues.
    pub fn merge_batch(&mut self, records: &[ChangeRecord]) -> Result<MergeReport> {
        self.autocommit(|this| {
            let mut report = MergeReport::default();
            for (index, record) in records.iter().enumerate() {
                match this.merge(record) {
                    Ok(outcome) => report.record(outcome),
                    Err(err) => {
                        warn!(
                            index,
                            table = %record.table,
                            pk = %record.pk,
                            column = %record.column,
                            error = %err,
                            "failed to merge change"
                        );
                        report.failed.push((index, err));
                    }
                }
            }
            debug!(
                applied = report.applied,
                discarded = report.discarded,
                failed = report.failed.len(),
                "merged batch"
            );
            Ok(report)
        })
    }

    /// Highest db version merged from `peer` in a committed transaction.
    pub fn peer_version(&self, peer: &SiteId) -> Result<Option<DbVersion>> {
        Ok(self.store.peer_version(peer)?)
    }
}
