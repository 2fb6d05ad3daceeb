//! Storage contracts consumed by the sync engine.
//!
//! A backend is split along the concerns the engine relies on: schema
//! introspection, row access by primary key, the per-table clock tables,
//! replica metadata (site id and peer high-water marks) and the connection
//! itself (transactions, savepoints and the sync bit). [`Store`] bundles all of
//! them and is implemented automatically.
//!
//! Primary keys are passed as value slices in primary-key position order,
//! which is the order the metadata loader sorts key columns into.

use crate::error::Result;
use crrow_core::{ClockEntry, ColumnId, DbVersion, PackedKey, SiteId, TableDescription, Value};
use std::collections::BTreeMap;

/// A full row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Before and after images of an updated row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowUpdate {
    pub old: Row,
    pub new: Row,
}

/// Schema introspection.
pub trait SchemaSource {
    /// Counter bumped by every structural schema change.
    fn schema_version(&self) -> u64;

    /// Describe a table, `None` when it does not exist.
    fn describe_table(&self, name: &str) -> Result<Option<TableDescription>>;

    /// Names of all base tables.
    fn table_names(&self) -> Vec<String>;
}

/// Row reads and writes addressed by primary key.
pub trait RowStore {
    fn read_row(&self, table: &str, pk: &[Value]) -> Result<Option<Row>>;

    /// Current value of one column, `None` when the row does not exist.
    fn read_column(&self, table: &str, pk: &[Value], column: &str) -> Result<Option<Value>>;

    /// Every row of a table, in primary-key order.
    fn scan_rows(&self, table: &str) -> Result<Vec<Row>>;

    /// Insert a new row. Columns absent from `row` are NULL.
    fn insert_row(&mut self, table: &str, row: &Row) -> Result<()>;

    /// Apply `changes` to an existing row, possibly rewriting its key.
    /// Returns `None` when no row has the given key.
    fn update_row(&mut self, table: &str, pk: &[Value], changes: &Row) -> Result<Option<RowUpdate>>;

    /// Set one column, inserting the row first if it is absent.
    fn upsert_column(&mut self, table: &str, pk: &[Value], column: &str, value: &Value) -> Result<()>;

    /// Delete a row, returning its last image.
    fn delete_row(&mut self, table: &str, pk: &[Value]) -> Result<Option<Row>>;

    /// Insert a row holding only its key. A conflicting row is left untouched
    /// and `false` is returned.
    fn insert_pk_only(&mut self, table: &str, pk: &[Value]) -> Result<bool>;
}

/// Per-table clock tables.
pub trait ClockStore {
    /// Create the clock table for `table`. Returns `false` if it already existed.
    fn create_clock_table(&mut self, table: &str) -> Result<bool>;

    fn is_tracked(&self, table: &str) -> bool;

    /// Names of all tables that have a clock table, sorted.
    fn tracked_tables(&self) -> Vec<String>;

    fn get_clock(&self, table: &str, pk: &PackedKey, column: &ColumnId) -> Result<Option<ClockEntry>>;

    /// Write or replace the entry for `(entry.pk, entry.column)`.
    fn put_clock(&mut self, table: &str, entry: ClockEntry) -> Result<()>;

    fn delete_clock(&mut self, table: &str, pk: &PackedKey, column: &ColumnId) -> Result<bool>;

    /// Drop every entry of a row except its delete sentinel.
    fn clear_row_clocks(&mut self, table: &str, pk: &PackedKey) -> Result<usize>;

    fn row_clocks(&self, table: &str, pk: &PackedKey) -> Result<Vec<ClockEntry>>;

    /// Entries with `db_version > since`.
    fn scan_clocks(&self, table: &str, since: DbVersion) -> Result<Vec<ClockEntry>>;

    /// Highest `db_version` recorded in the table, `None` when it is empty.
    fn max_db_version(&self, table: &str) -> Result<Option<DbVersion>>;
}

/// Replica-level metadata.
pub trait MetaStore {
    fn load_site_id(&self) -> Result<Option<SiteId>>;

    /// Persist the site id. Fails if a different id is already stored.
    fn save_site_id(&mut self, site_id: SiteId) -> Result<()>;

    fn peer_version(&self, site_id: &SiteId) -> Result<Option<DbVersion>>;

    /// Raise the stored high-water mark for a peer; lower values are ignored.
    fn record_peer_version(&mut self, site_id: SiteId, version: DbVersion) -> Result<()>;
}

/// Connection-scoped state: transactions, savepoints and the sync bit.
pub trait Connection {
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    fn savepoint(&mut self, name: &str) -> Result<()>;

    /// Forget the savepoint and everything nested inside it, keeping its writes.
    fn release(&mut self, name: &str) -> Result<()>;

    /// Undo all writes since the savepoint. The savepoint stays open.
    fn rollback_to(&mut self, name: &str) -> Result<()>;

    /// When set, local writes are not recorded as changes.
    fn sync_bit(&self) -> bool;

    fn set_sync_bit(&mut self, on: bool);
}

/// Everything the sync engine needs from a backend.
pub trait Store: SchemaSource + RowStore + ClockStore + MetaStore + Connection {}

impl<T> Store for T where T: SchemaSource + RowStore + ClockStore + MetaStore + Connection {}
