//! In-memory relational store.
//!
//! `MemoryStore` keeps base tables, clock tables and replica metadata in
//! ordered maps. Inside a transaction every write first appends the prior
//! state of what it touches to an undo log: a row, a clock entry, a metadata
//! field, or for DDL the whole table. Transactions and savepoints are marks
//! into that log; rolling back pops entries past the mark and restores them
//! in reverse order. The schema version counter is not logged and never goes
//! backwards.

use crate::error::{Result, StoreError};
use crate::store::{ClockStore, Connection, MetaStore, Row, RowStore, RowUpdate, SchemaSource};
use crrow_core::{
    ClockEntry, ColumnDescription, ColumnId, DbVersion, PackedKey, SiteId, TableDescription, Value,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

type ClockTable = BTreeMap<(PackedKey, ColumnId), ClockEntry>;
type ClockKey = (PackedKey, ColumnId);

#[derive(Clone, Debug)]
struct Table {
    columns: Vec<ColumnDescription>,
    /// Declaration indices of the key columns, in key position order.
    key: Vec<usize>,
    rows: BTreeMap<Vec<Value>, Vec<Value>>,
    /// Hidden row ids for tables without a primary key.
    next_rowid: i64,
}

impl Table {
    fn new(columns: Vec<ColumnDescription>) -> Self {
        let mut key: Vec<usize> = (0..columns.len())
            .filter(|&i| columns[i].pk_position > 0)
            .collect();
        key.sort_by_key(|&i| columns[i].pk_position);
        Table {
            columns,
            key,
            rows: BTreeMap::new(),
            next_rowid: 0,
        }
    }

    fn describe(&self, name: &str) -> TableDescription {
        TableDescription {
            name: name.to_string(),
            columns: self.columns.clone(),
        }
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    fn key_of(&self, values: &[Value]) -> Vec<Value> {
        self.key.iter().map(|&i| values[i].clone()).collect()
    }

    fn to_row(&self, values: &[Value]) -> Row {
        self.columns
            .iter()
            .zip(values)
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect()
    }

    fn blank_row(&self, pk: &[Value]) -> Vec<Value> {
        let mut values = vec![Value::Null; self.columns.len()];
        for (&i, v) in self.key.iter().zip(pk) {
            values[i] = v.clone();
        }
        values
    }
}

fn check_key(name: &str, table: &Table, pk: &[Value]) -> Result<()> {
    if pk.len() != table.key.len() {
        return Err(StoreError::ConstraintViolation {
            table: name.to_string(),
            reason: format!("expected {} key components, got {}", table.key.len(), pk.len()),
        });
    }
    if pk.iter().any(Value::is_null) {
        return Err(StoreError::ConstraintViolation {
            table: name.to_string(),
            reason: "NULL in primary key".to_string(),
        });
    }
    Ok(())
}

fn column_not_found(table: &str, column: &str) -> StoreError {
    StoreError::ColumnNotFound {
        table: table.to_string(),
        column: column.to_string(),
    }
}

fn duplicate_key(table: &str, key: &[Value]) -> StoreError {
    StoreError::ConstraintViolation {
        table: table.to_string(),
        reason: format!("duplicate primary key {:?}", key),
    }
}

fn row_entries<'a>(
    clock: &'a ClockTable,
    pk: &'a PackedKey,
) -> impl Iterator<Item = &'a ClockEntry> + 'a {
    clock
        .range((pk.clone(), ColumnId::Column(String::new()))..)
        .take_while(move |(key, _)| &key.0 == pk)
        .map(|(_, entry)| entry)
}

#[derive(Debug, Default)]
struct Data {
    tables: BTreeMap<String, Table>,
    clocks: BTreeMap<String, ClockTable>,
    site_id: Option<SiteId>,
    peers: BTreeMap<SiteId, DbVersion>,
}

/// Prior state of one item, recorded before a write inside a transaction.
/// `None` means the item did not exist.
#[derive(Debug)]
enum Undo {
    Row {
        table: String,
        key: Vec<Value>,
        prior: Option<Vec<Value>>,
    },
    RowId {
        table: String,
        prior: i64,
    },
    Clock {
        table: String,
        key: ClockKey,
        prior: Option<ClockEntry>,
    },
    Table {
        name: String,
        prior: Option<Table>,
    },
    ClockTable {
        name: String,
        prior: Option<ClockTable>,
    },
    SiteId(Option<SiteId>),
    Peer {
        site_id: SiteId,
        prior: Option<DbVersion>,
    },
}

#[derive(Debug)]
struct Frame {
    /// `None` for the transaction itself, the savepoint name otherwise.
    name: Option<String>,
    /// Length of the undo log when the frame was opened.
    mark: usize,
}

/// An in-memory implementation of [`crate::Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Data,
    schema_version: u64,
    frames: Vec<Frame>,
    undo: Vec<Undo>,
    sync_bit: bool,
    failing_clock_writes: BTreeSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, desc: TableDescription) -> Result<()> {
        if self.data.tables.contains_key(&desc.name) {
            return Err(StoreError::AlreadyExists(desc.name));
        }
        let mut seen = BTreeSet::new();
        for column in &desc.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(StoreError::ConstraintViolation {
                    table: desc.name.clone(),
                    reason: format!("duplicate column {}", column.name),
                });
            }
        }

        debug!(table = %desc.name, columns = desc.columns.len(), "create table");
        self.save_table(&desc.name);
        self.data.tables.insert(desc.name, Table::new(desc.columns));
        self.schema_version += 1;
        Ok(())
    }

    /// Drop a table together with its clock table.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.table(name)?;
        self.save_table(name);
        self.save_clock_table(name);
        self.data.tables.remove(name);
        self.data.clocks.remove(name);
        self.schema_version += 1;
        Ok(())
    }

    /// Append a nullable column; existing rows get NULL.
    pub fn add_column(&mut self, table: &str, name: &str, decl_type: &str) -> Result<()> {
        if self.table(table)?.index_of(name).is_some() {
            return Err(StoreError::AlreadyExists(format!("{}.{}", table, name)));
        }
        self.save_table(table);

        let t = self.table_mut(table)?;
        t.columns.push(ColumnDescription {
            cid: t.columns.len() as i64,
            name: name.to_string(),
            decl_type: decl_type.to_string(),
            not_null: false,
            pk_position: 0,
        });
        for values in t.rows.values_mut() {
            values.push(Value::Null);
        }
        self.schema_version += 1;
        Ok(())
    }

    /// Remove a non-key column.
    pub fn drop_column(&mut self, table: &str, name: &str) -> Result<()> {
        let t = self.table(table)?;
        let idx = t.index_of(name).ok_or_else(|| column_not_found(table, name))?;
        if t.columns[idx].pk_position > 0 {
            return Err(StoreError::ConstraintViolation {
                table: table.to_string(),
                reason: format!("cannot drop key column {}", name),
            });
        }
        self.save_table(table);

        let t = self.table_mut(table)?;
        let mut columns = t.columns.clone();
        columns.remove(idx);
        for (cid, column) in columns.iter_mut().enumerate() {
            column.cid = cid as i64;
        }
        let mut rebuilt = Table::new(columns);
        rebuilt.next_rowid = t.next_rowid;
        rebuilt.rows = std::mem::take(&mut t.rows)
            .into_iter()
            .map(|(key, mut values)| {
                values.remove(idx);
                (key, values)
            })
            .collect();
        *t = rebuilt;
        self.schema_version += 1;
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.rows.len())
    }

    /// Number of undo records held by the open transaction.
    pub fn undo_log_len(&self) -> usize {
        self.undo.len()
    }

    /// Make every clock write to `table` fail with an I/O error.
    pub fn fail_clock_writes(&mut self, table: &str) {
        self.failing_clock_writes.insert(table.to_string());
    }

    pub fn clear_faults(&mut self) {
        self.failing_clock_writes.clear();
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.data
            .tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.data
            .tables
            .get_mut(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    fn clock(&self, table: &str) -> Result<&ClockTable> {
        self.data
            .clocks
            .get(table)
            .ok_or_else(|| StoreError::NotTracked(table.to_string()))
    }

    fn clock_mut(&mut self, table: &str) -> Result<&mut ClockTable> {
        if self.failing_clock_writes.contains(table) {
            return Err(StoreError::Io(format!("clock write to {} failed", table)));
        }
        self.data
            .clocks
            .get_mut(table)
            .ok_or_else(|| StoreError::NotTracked(table.to_string()))
    }

    fn savepoint_index(&self, name: &str) -> Result<usize> {
        self.frames
            .iter()
            .rposition(|f| f.name.as_deref() == Some(name))
            .ok_or_else(|| StoreError::NoSavepoint(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Undo log
    // ------------------------------------------------------------------

    fn recording(&self) -> bool {
        !self.frames.is_empty()
    }

    fn save_table(&mut self, name: &str) {
        if self.recording() {
            let prior = self.data.tables.get(name).cloned();
            self.undo.push(Undo::Table {
                name: name.to_string(),
                prior,
            });
        }
    }

    fn save_clock_table(&mut self, name: &str) {
        if self.recording() {
            let prior = self.data.clocks.get(name).cloned();
            self.undo.push(Undo::ClockTable {
                name: name.to_string(),
                prior,
            });
        }
    }

    /// Store or remove one row, logging what was there before.
    fn write_row(
        &mut self,
        table: &str,
        key: Vec<Value>,
        values: Option<Vec<Value>>,
    ) -> Result<Option<Vec<Value>>> {
        let t = self.table_mut(table)?;
        let prior = match values {
            Some(values) => t.rows.insert(key.clone(), values),
            None => t.rows.remove(&key),
        };
        if self.recording() {
            self.undo.push(Undo::Row {
                table: table.to_string(),
                key,
                prior: prior.clone(),
            });
        }
        Ok(prior)
    }

    fn advance_rowid(&mut self, table: &str) -> Result<i64> {
        let t = self.table_mut(table)?;
        let prior = t.next_rowid;
        t.next_rowid += 1;
        let rowid = t.next_rowid;
        if self.recording() {
            self.undo.push(Undo::RowId {
                table: table.to_string(),
                prior,
            });
        }
        Ok(rowid)
    }

    /// Store or remove one clock entry, logging what was there before.
    fn write_clock(
        &mut self,
        table: &str,
        key: ClockKey,
        entry: Option<ClockEntry>,
    ) -> Result<Option<ClockEntry>> {
        let clock = self.clock_mut(table)?;
        let prior = match entry {
            Some(entry) => clock.insert(key.clone(), entry),
            None => clock.remove(&key),
        };
        if self.recording() {
            self.undo.push(Undo::Clock {
                table: table.to_string(),
                key,
                prior: prior.clone(),
            });
        }
        Ok(prior)
    }

    /// Restore everything logged after `mark`, newest first.
    fn unwind(&mut self, mark: usize) {
        let undone = self.undo.split_off(mark);
        trace!(records = undone.len(), "unwinding undo log");
        for undo in undone.into_iter().rev() {
            self.revert(undo);
        }
    }

    fn revert(&mut self, undo: Undo) {
        let data = &mut self.data;
        match undo {
            Undo::Row { table, key, prior } => {
                if let Some(t) = data.tables.get_mut(&table) {
                    match prior {
                        Some(values) => t.rows.insert(key, values),
                        None => t.rows.remove(&key),
                    };
                }
            }
            Undo::RowId { table, prior } => {
                if let Some(t) = data.tables.get_mut(&table) {
                    t.next_rowid = prior;
                }
            }
            Undo::Clock { table, key, prior } => {
                if let Some(clock) = data.clocks.get_mut(&table) {
                    match prior {
                        Some(entry) => clock.insert(key, entry),
                        None => clock.remove(&key),
                    };
                }
            }
            Undo::Table { name, prior } => {
                match prior {
                    Some(t) => data.tables.insert(name, t),
                    None => data.tables.remove(&name),
                };
            }
            Undo::ClockTable { name, prior } => {
                match prior {
                    Some(clock) => data.clocks.insert(name, clock),
                    None => data.clocks.remove(&name),
                };
            }
            Undo::SiteId(prior) => data.site_id = prior,
            Undo::Peer { site_id, prior } => {
                match prior {
                    Some(version) => data.peers.insert(site_id, version),
                    None => data.peers.remove(&site_id),
                };
            }
        }
    }
}

impl SchemaSource for MemoryStore {
    fn schema_version(&self) -> u64 {
        self.schema_version
    }

    fn describe_table(&self, name: &str) -> Result<Option<TableDescription>> {
        Ok(self.data.tables.get(name).map(|t| t.describe(name)))
    }

    fn table_names(&self) -> Vec<String> {
        self.data.tables.keys().cloned().collect()
    }
}

impl RowStore for MemoryStore {
    fn read_row(&self, table: &str, pk: &[Value]) -> Result<Option<Row>> {
        let t = self.table(table)?;
        check_key(table, t, pk)?;
        Ok(t.rows.get(pk).map(|values| t.to_row(values)))
    }

    fn read_column(&self, table: &str, pk: &[Value], column: &str) -> Result<Option<Value>> {
        let t = self.table(table)?;
        check_key(table, t, pk)?;
        let idx = t.index_of(column).ok_or_else(|| column_not_found(table, column))?;
        Ok(t.rows.get(pk).map(|values| values[idx].clone()))
    }

    fn scan_rows(&self, table: &str) -> Result<Vec<Row>> {
        let t = self.table(table)?;
        Ok(t.rows.values().map(|values| t.to_row(values)).collect())
    }

    fn insert_row(&mut self, table: &str, row: &Row) -> Result<()> {
        let t = self.table(table)?;
        let mut values = vec![Value::Null; t.columns.len()];
        for (name, value) in row {
            let idx = t.index_of(name).ok_or_else(|| column_not_found(table, name))?;
            values[idx] = value.clone();
        }

        let key = if t.key.is_empty() {
            vec![Value::Integer(self.advance_rowid(table)?)]
        } else {
            let key = t.key_of(&values);
            check_key(table, t, &key)?;
            key
        };
        if self.table(table)?.rows.contains_key(&key) {
            return Err(duplicate_key(table, &key));
        }

        trace!(table, ?key, "insert row");
        self.write_row(table, key, Some(values))?;
        Ok(())
    }

    fn update_row(&mut self, table: &str, pk: &[Value], changes: &Row) -> Result<Option<RowUpdate>> {
        let t = self.table(table)?;
        check_key(table, t, pk)?;
        let old = match t.rows.get(pk) {
            Some(values) => values.clone(),
            None => return Ok(None),
        };

        let mut new = old.clone();
        for (name, value) in changes {
            let idx = t.index_of(name).ok_or_else(|| column_not_found(table, name))?;
            new[idx] = value.clone();
        }

        let new_key = t.key_of(&new);
        let rekeyed = new_key.as_slice() != pk;
        if rekeyed {
            check_key(table, t, &new_key)?;
            if t.rows.contains_key(&new_key) {
                return Err(duplicate_key(table, &new_key));
            }
        }
        let update = RowUpdate {
            old: t.to_row(&old),
            new: t.to_row(&new),
        };

        if rekeyed {
            self.write_row(table, pk.to_vec(), None)?;
        }
        trace!(table, ?new_key, "update row");
        self.write_row(table, new_key, Some(new))?;
        Ok(Some(update))
    }

    fn upsert_column(&mut self, table: &str, pk: &[Value], column: &str, value: &Value) -> Result<()> {
        let t = self.table(table)?;
        check_key(table, t, pk)?;
        let idx = t.index_of(column).ok_or_else(|| column_not_found(table, column))?;
        if t.key.contains(&idx) {
            return Err(StoreError::ConstraintViolation {
                table: table.to_string(),
                reason: format!("cannot upsert key column {}", column),
            });
        }

        let mut values = t.rows.get(pk).cloned().unwrap_or_else(|| t.blank_row(pk));
        values[idx] = value.clone();
        self.write_row(table, pk.to_vec(), Some(values))?;
        Ok(())
    }

    fn delete_row(&mut self, table: &str, pk: &[Value]) -> Result<Option<Row>> {
        let t = self.table(table)?;
        check_key(table, t, pk)?;
        if !t.rows.contains_key(pk) {
            return Ok(None);
        }
        let removed = self.write_row(table, pk.to_vec(), None)?;
        let t = self.table(table)?;
        Ok(removed.map(|values| t.to_row(&values)))
    }

    fn insert_pk_only(&mut self, table: &str, pk: &[Value]) -> Result<bool> {
        let t = self.table(table)?;
        check_key(table, t, pk)?;
        if t.rows.contains_key(pk) {
            return Ok(false);
        }
        let blank = t.blank_row(pk);
        self.write_row(table, pk.to_vec(), Some(blank))?;
        Ok(true)
    }
}

impl ClockStore for MemoryStore {
    fn create_clock_table(&mut self, table: &str) -> Result<bool> {
        if !self.data.tables.contains_key(table) {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        if self.data.clocks.contains_key(table) {
            return Ok(false);
        }

        debug!(table, "create clock table");
        self.save_clock_table(table);
        self.data.clocks.insert(table.to_string(), ClockTable::new());
        self.schema_version += 1;
        Ok(true)
    }

    fn is_tracked(&self, table: &str) -> bool {
        self.data.clocks.contains_key(table)
    }

    fn tracked_tables(&self) -> Vec<String> {
        self.data.clocks.keys().cloned().collect()
    }

    fn get_clock(&self, table: &str, pk: &PackedKey, column: &ColumnId) -> Result<Option<ClockEntry>> {
        let clock = self.clock(table)?;
        Ok(clock.get(&(pk.clone(), column.clone())).cloned())
    }

    fn put_clock(&mut self, table: &str, entry: ClockEntry) -> Result<()> {
        let key = (entry.pk.clone(), entry.column.clone());
        self.write_clock(table, key, Some(entry))?;
        Ok(())
    }

    fn delete_clock(&mut self, table: &str, pk: &PackedKey, column: &ColumnId) -> Result<bool> {
        let key = (pk.clone(), column.clone());
        if !self.clock(table)?.contains_key(&key) {
            return Ok(false);
        }
        Ok(self.write_clock(table, key, None)?.is_some())
    }

    fn clear_row_clocks(&mut self, table: &str, pk: &PackedKey) -> Result<usize> {
        let clock = self.clock_mut(table)?;
        let doomed: Vec<ClockKey> = row_entries(clock, pk)
            .filter(|entry| !entry.is_tombstone())
            .map(|entry| (entry.pk.clone(), entry.column.clone()))
            .collect();
        for key in &doomed {
            self.write_clock(table, key.clone(), None)?;
        }
        Ok(doomed.len())
    }

    fn row_clocks(&self, table: &str, pk: &PackedKey) -> Result<Vec<ClockEntry>> {
        let clock = self.clock(table)?;
        Ok(row_entries(clock, pk).cloned().collect())
    }

    fn scan_clocks(&self, table: &str, since: DbVersion) -> Result<Vec<ClockEntry>> {
        let clock = self.clock(table)?;
        Ok(clock
            .values()
            .filter(|entry| entry.db_version > since)
            .cloned()
            .collect())
    }

    fn max_db_version(&self, table: &str) -> Result<Option<DbVersion>> {
        let clock = self.clock(table)?;
        Ok(clock.values().map(|entry| entry.db_version).max())
    }
}

impl MetaStore for MemoryStore {
    fn load_site_id(&self) -> Result<Option<SiteId>> {
        Ok(self.data.site_id)
    }

    fn save_site_id(&mut self, site_id: SiteId) -> Result<()> {
        match self.data.site_id {
            Some(existing) if existing != site_id => {
                Err(StoreError::AlreadyExists(format!("site id {}", existing)))
            }
            Some(_) => Ok(()),
            None => {
                if self.recording() {
                    self.undo.push(Undo::SiteId(None));
                }
                self.data.site_id = Some(site_id);
                Ok(())
            }
        }
    }

    fn peer_version(&self, site_id: &SiteId) -> Result<Option<DbVersion>> {
        Ok(self.data.peers.get(site_id).copied())
    }

    fn record_peer_version(&mut self, site_id: SiteId, version: DbVersion) -> Result<()> {
        let prior = self.data.peers.get(&site_id).copied();
        if prior.map_or(false, |mark| mark >= version) {
            return Ok(());
        }
        if self.recording() {
            self.undo.push(Undo::Peer { site_id, prior });
        }
        self.data.peers.insert(site_id, version);
        Ok(())
    }
}

impl Connection for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(StoreError::AlreadyExists("transaction".to_string()));
        }
        self.undo.clear();
        self.frames.push(Frame { name: None, mark: 0 });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.frames.is_empty() {
            return Err(StoreError::NoTransaction);
        }
        self.frames.clear();
        self.undo.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.frames.is_empty() {
            return Err(StoreError::NoTransaction);
        }
        self.unwind(0);
        self.frames.clear();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        if self.frames.is_empty() {
            return Err(StoreError::NoTransaction);
        }
        self.frames.push(Frame {
            name: Some(name.to_string()),
            mark: self.undo.len(),
        });
        Ok(())
    }

    /// Close the savepoint and every one opened after it. Their undo records
    /// stay in the log and now belong to the enclosing frame.
    fn release(&mut self, name: &str) -> Result<()> {
        let idx = self.savepoint_index(name)?;
        self.frames.truncate(idx);
        Ok(())
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        let idx = self.savepoint_index(name)?;
        let mark = self.frames[idx].mark;
        self.unwind(mark);
        self.frames.truncate(idx + 1);
        Ok(())
    }

    fn sync_bit(&self) -> bool {
        self.sync_bit
    }

    fn set_sync_bit(&mut self, on: bool) {
        self.sync_bit = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TableBuilder;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn store_with_foo() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .create_table(TableBuilder::new("foo").pk("a", "INTEGER").column("b", "TEXT").build())
            .unwrap();
        store
    }

    fn entry(pk: i64, column: ColumnId, version: DbVersion) -> ClockEntry {
        ClockEntry {
            pk: PackedKey::pack(&[Value::Integer(pk)]).unwrap(),
            column,
            column_version: version,
            db_version: version,
            site_id: None,
            seq: 0,
        }
    }

    #[test]
    fn test_insert_and_read() {
        let mut store = store_with_foo();
        store
            .insert_row("foo", &row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
            .unwrap();

        let pk = [Value::Integer(1)];
        assert_eq!(store.read_column("foo", &pk, "b").unwrap(), Some(Value::text("x")));
        assert_eq!(store.read_column("foo", &[Value::Integer(2)], "b").unwrap(), None);
        assert!(matches!(
            store.read_column("foo", &pk, "zz"),
            Err(StoreError::ColumnNotFound { .. })
        ));
        assert!(matches!(
            store.insert_row("foo", &row(&[("a", Value::Integer(1))])),
            Err(StoreError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn test_update_can_rewrite_key() {
        let mut store = store_with_foo();
        store
            .insert_row("foo", &row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
            .unwrap();

        let update = store
            .update_row("foo", &[Value::Integer(1)], &row(&[("a", Value::Integer(5))]))
            .unwrap()
            .unwrap();
        assert_eq!(update.old["a"], Value::Integer(1));
        assert_eq!(update.new["a"], Value::Integer(5));
        assert_eq!(update.new["b"], Value::text("x"));
        assert!(store.read_row("foo", &[Value::Integer(1)]).unwrap().is_none());
        assert!(store.read_row("foo", &[Value::Integer(5)]).unwrap().is_some());

        let missing = store.update_row("foo", &[Value::Integer(9)], &Row::new()).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_upsert_and_pk_only() {
        let mut store = store_with_foo();
        let pk = [Value::Integer(3)];

        store.upsert_column("foo", &pk, "b", &Value::text("y")).unwrap();
        assert_eq!(store.read_column("foo", &pk, "b").unwrap(), Some(Value::text("y")));

        assert!(!store.insert_pk_only("foo", &pk).unwrap());
        assert_eq!(store.read_column("foo", &pk, "b").unwrap(), Some(Value::text("y")));
        assert!(store.insert_pk_only("foo", &[Value::Integer(4)]).unwrap());
        assert_eq!(
            store.read_column("foo", &[Value::Integer(4)], "b").unwrap(),
            Some(Value::Null)
        );
        assert!(store.upsert_column("foo", &pk, "a", &Value::Integer(1)).is_err());
    }

    #[test]
    fn test_key_arity_checked() {
        let store = store_with_foo();
        assert!(matches!(
            store.read_row("foo", &[]),
            Err(StoreError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn test_clock_table_lifecycle() {
        let mut store = store_with_foo();
        assert!(matches!(
            store.put_clock("foo", entry(1, ColumnId::column("b"), 1)),
            Err(StoreError::NotTracked(_))
        ));
        assert!(store.create_clock_table("foo").unwrap());
        assert!(!store.create_clock_table("foo").unwrap());
        assert_eq!(store.tracked_tables(), vec!["foo".to_string()]);
        assert!(matches!(
            store.create_clock_table("nope"),
            Err(StoreError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_clear_row_clocks_keeps_tombstone() {
        let mut store = store_with_foo();
        store.create_clock_table("foo").unwrap();
        store.put_clock("foo", entry(1, ColumnId::column("b"), 1)).unwrap();
        store.put_clock("foo", entry(1, ColumnId::PkOnly, 1)).unwrap();
        store.put_clock("foo", entry(1, ColumnId::Delete, 2)).unwrap();
        store.put_clock("foo", entry(2, ColumnId::column("b"), 1)).unwrap();

        let pk = PackedKey::pack(&[Value::Integer(1)]).unwrap();
        assert_eq!(store.clear_row_clocks("foo", &pk).unwrap(), 2);
        let remaining = store.row_clocks("foo", &pk).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_tombstone());
        assert_eq!(store.scan_clocks("foo", 0).unwrap().len(), 2);
    }

    #[test]
    fn test_scan_and_max_version() {
        let mut store = store_with_foo();
        store.create_clock_table("foo").unwrap();
        assert_eq!(store.max_db_version("foo").unwrap(), None);

        store.put_clock("foo", entry(1, ColumnId::column("b"), 1)).unwrap();
        store.put_clock("foo", entry(2, ColumnId::column("b"), 3)).unwrap();
        assert_eq!(store.max_db_version("foo").unwrap(), Some(3));
        assert_eq!(store.scan_clocks("foo", 1).unwrap().len(), 1);
        assert!(store.scan_clocks("foo", 3).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_restores_data_but_not_schema_version() {
        let mut store = store_with_foo();
        let before = store.schema_version();

        store.begin().unwrap();
        store.upsert_column("foo", &[Value::Integer(1)], "b", &Value::text("x")).unwrap();
        store.add_column("foo", "c", "TEXT").unwrap();
        store.rollback().unwrap();

        assert!(!store.in_transaction());
        assert_eq!(store.row_count("foo").unwrap(), 0);
        assert!(store
            .describe_table("foo")
            .unwrap()
            .unwrap()
            .columns
            .iter()
            .all(|c| c.name != "c"));
        assert!(store.schema_version() > before);
    }

    #[test]
    fn test_savepoints() {
        let mut store = store_with_foo();
        assert!(matches!(store.savepoint("s"), Err(StoreError::NoTransaction)));

        store.begin().unwrap();
        store.upsert_column("foo", &[Value::Integer(1)], "b", &Value::text("x")).unwrap();
        store.savepoint("s").unwrap();
        store.upsert_column("foo", &[Value::Integer(2)], "b", &Value::text("y")).unwrap();
        store.rollback_to("s").unwrap();
        assert_eq!(store.row_count("foo").unwrap(), 1);

        store.upsert_column("foo", &[Value::Integer(3)], "b", &Value::text("z")).unwrap();
        store.release("s").unwrap();
        assert!(matches!(store.release("s"), Err(StoreError::NoSavepoint(_))));
        store.commit().unwrap();
        assert_eq!(store.row_count("foo").unwrap(), 2);
        assert!(matches!(store.commit(), Err(StoreError::NoTransaction)));
    }

    #[test]
    fn test_savepoint_logs_only_what_it_touches() {
        let mut store = store_with_foo();
        store
            .create_table(TableBuilder::new("bar").pk("k", "INTEGER").column("v", "TEXT").build())
            .unwrap();
        for i in 0..100 {
            store.upsert_column("foo", &[Value::Integer(i)], "b", &Value::text("x")).unwrap();
            store.upsert_column("bar", &[Value::Integer(i)], "v", &Value::text("x")).unwrap();
        }

        store.begin().unwrap();
        assert_eq!(store.undo_log_len(), 0);
        store.savepoint("s").unwrap();
        store.upsert_column("foo", &[Value::Integer(7)], "b", &Value::text("y")).unwrap();
        assert_eq!(store.undo_log_len(), 1);

        store.rollback_to("s").unwrap();
        assert_eq!(store.undo_log_len(), 0);
        assert_eq!(
            store.read_column("foo", &[Value::Integer(7)], "b").unwrap(),
            Some(Value::text("x"))
        );
        store.commit().unwrap();
        assert_eq!(store.undo_log_len(), 0);
    }

    #[test]
    fn test_nested_savepoints_unwind_in_order() {
        let mut store = store_with_foo();
        store.create_clock_table("foo").unwrap();
        let pk = [Value::Integer(1)];

        store.begin().unwrap();
        store.upsert_column("foo", &pk, "b", &Value::text("outer")).unwrap();
        store.savepoint("a").unwrap();
        store.upsert_column("foo", &pk, "b", &Value::text("a")).unwrap();
        store.put_clock("foo", entry(1, ColumnId::column("b"), 1)).unwrap();
        store.savepoint("b").unwrap();
        store.delete_row("foo", &pk).unwrap();
        store.clear_row_clocks("foo", &PackedKey::pack(&pk).unwrap()).unwrap();
        store.release("b").unwrap();
        assert!(store.read_row("foo", &pk).unwrap().is_none());

        store.rollback_to("a").unwrap();
        assert_eq!(store.read_column("foo", &pk, "b").unwrap(), Some(Value::text("outer")));
        assert!(store.scan_clocks("foo", 0).unwrap().is_empty());
        assert!(matches!(store.release("b"), Err(StoreError::NoSavepoint(_))));
        store.release("a").unwrap();
        store.commit().unwrap();
        assert_eq!(store.read_column("foo", &pk, "b").unwrap(), Some(Value::text("outer")));
    }

    #[test]
    fn test_rollback_restores_ddl_and_metadata() {
        let mut store = store_with_foo();
        store
            .insert_row("foo", &row(&[("a", Value::Integer(1)), ("b", Value::text("x"))]))
            .unwrap();
        store.create_table(TableBuilder::new("log").column("msg", "TEXT").build()).unwrap();
        store.insert_row("log", &row(&[("msg", Value::text("one"))])).unwrap();
        let peer = SiteId::from_bytes([3; 16]);
        store.record_peer_version(peer, 2).unwrap();

        store.begin().unwrap();
        store.insert_row("log", &row(&[("msg", Value::text("two"))])).unwrap();
        store.drop_column("foo", "b").unwrap();
        store.drop_table("log").unwrap();
        store.create_clock_table("foo").unwrap();
        store.record_peer_version(peer, 9).unwrap();
        store.save_site_id(SiteId::from_bytes([4; 16])).unwrap();
        store.rollback().unwrap();

        assert_eq!(
            store.read_column("foo", &[Value::Integer(1)], "b").unwrap(),
            Some(Value::text("x"))
        );
        assert!(!store.is_tracked("foo"));
        assert_eq!(store.peer_version(&peer).unwrap(), Some(2));
        assert_eq!(store.load_site_id().unwrap(), None);
        let log = store.scan_rows("log").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["msg"], Value::text("one"));
    }

    #[test]
    fn test_site_id_is_write_once() {
        let mut store = MemoryStore::new();
        let a = SiteId::from_bytes([1; 16]);
        store.save_site_id(a).unwrap();
        store.save_site_id(a).unwrap();
        assert!(store.save_site_id(SiteId::from_bytes([2; 16])).is_err());
        assert_eq!(store.load_site_id().unwrap(), Some(a));
    }

    #[test]
    fn test_peer_versions_only_rise() {
        let mut store = MemoryStore::new();
        let peer = SiteId::from_bytes([9; 16]);
        store.record_peer_version(peer, 5).unwrap();
        store.record_peer_version(peer, 3).unwrap();
        assert_eq!(store.peer_version(&peer).unwrap(), Some(5));
    }

    #[test]
    fn test_drop_column() {
        let mut store = store_with_foo();
        store.add_column("foo", "c", "TEXT").unwrap();
        store
            .insert_row("foo", &row(&[("a", Value::Integer(1)), ("c", Value::text("z"))]))
            .unwrap();
        store.drop_column("foo", "b").unwrap();

        let r = store.read_row("foo", &[Value::Integer(1)]).unwrap().unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r["c"], Value::text("z"));
        assert!(store.drop_column("foo", "a").is_err());
    }

    #[test]
    fn test_injected_clock_failure() {
        let mut store = store_with_foo();
        store.create_clock_table("foo").unwrap();
        store.fail_clock_writes("foo");
        assert!(matches!(
            store.put_clock("foo", entry(1, ColumnId::column("b"), 1)),
            Err(StoreError::Io(_))
        ));
        store.clear_faults();
        store.put_clock("foo", entry(1, ColumnId::column("b"), 1)).unwrap();
    }
}
