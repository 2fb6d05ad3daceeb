//! # crrow-engine
//!
//! Column-wise last-writer-wins replication for relational tables.
//!
//! This crate provides:
//! - `SyncContext`: per-connection site id, logical clock and metadata cache
//! - `metadata`: validated table metadata, rebuilt whenever the schema changes
//! - `triggers`: the bridge that stamps local writes into clock tables
//! - `ChangeCursor`: ordered extraction of changes since a db version
//! - `merge`: winner determination and application of remote changes
//! - `alter`: clock-table compaction after a tracked table's schema changes
//! - `Replica`: a store bound to its context, with implicit transactions
//!
//! ## Architecture
//!
//! Every tracked table has a clock table holding, per (row, column), the
//! version and writer of the last write. Local writes are stamped with the
//! transaction's next db version. Extraction reads clock entries newer than a
//! cursor and joins them with current base-table values; merge compares each
//! incoming record against the local clock entry and keeps the winner.
//!
//! ## Example
//!
//! ```rust
//! use crrow_core::Value;
//! use crrow_engine::Replica;
//! use crrow_store::{MemoryStore, Row, TableBuilder};
//!
//! fn replica() -> Replica<MemoryStore> {
//!     let mut store = MemoryStore::new();
//!     store
//!         .create_table(TableBuilder::new("foo").pk("a", "INTEGER").column("b", "TEXT").build())
//!         .unwrap();
//!     let mut replica = Replica::open(store).unwrap();
//!     replica.track_table("foo").unwrap();
//!     replica
//! }
//!
//! let mut a = replica();
//! let mut b = replica();
//!
//! let row: Row = [("a", Value::Integer(1)), ("b", Value::text("x"))]
//!     .into_iter()
//!     .map(|(k, v)| (k.to_string(), v))
//!     .collect();
//! a.insert("foo", row).unwrap();
//!
//! let changes: Vec<_> = a
//!     .changes_since(0, Some(b.site_id()))
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! let report = b.merge_batch(&changes).unwrap();
//! assert_eq!(report.applied, 1);
//!
//! let merged = b.read_row("foo", &[Value::Integer(1)]).unwrap().unwrap();
//! assert_eq!(merged["b"], Value::text("x"));
//! ```

pub mod alter;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod merge;
pub mod metadata;
pub mod peers;
pub mod replica;
pub mod triggers;

pub use alter::{compact_after_alter, CompactionReport};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use context::SyncContext;
pub use error::{EngineError, Result};
pub use extract::ChangeCursor;
pub use merge::{merge_record, DiscardReason, MergeOutcome, MergeReport};
pub use metadata::{load_table_info, MetadataCache};
pub use peers::SeenPeers;
pub use replica::Replica;
