//! # crrow-store
//!
//! Storage contracts consumed by the crrow sync engine, plus an in-memory
//! relational store that implements them.
//!
//! This crate provides:
//! - `SchemaSource`, `RowStore`, `ClockStore`, `MetaStore`, `Connection`: the
//!   narrow interfaces the engine needs from a backend, bundled as `Store`
//! - `MemoryStore`: ordered-map tables with undo-log transactions and savepoints
//! - `TableBuilder`: declarative table definitions
//!
//! ## Example
//!
//! ```rust
//! use crrow_core::Value;
//! use crrow_store::{Connection, MemoryStore, RowStore, TableBuilder};
//!
//! let mut store = MemoryStore::new();
//! store
//!     .create_table(TableBuilder::new("foo").pk("a", "INTEGER").column("b", "TEXT").build())
//!     .unwrap();
//!
//! store.begin().unwrap();
//! store.upsert_column("foo", &[Value::Integer(1)], "b", &Value::text("x")).unwrap();
//! store.rollback().unwrap();
//!
//! assert!(store.read_row("foo", &[Value::Integer(1)]).unwrap().is_none());
//! ```

pub mod builder;
pub mod error;
pub mod memory;
pub mod store;

pub use builder::TableBuilder;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use store::{ClockStore, Connection, MetaStore, Row, RowStore, RowUpdate, SchemaSource, Store};
