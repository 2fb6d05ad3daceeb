//! # crrow-core
//!
//! Data model shared by every crrow crate.
//!
//! This crate provides:
//! - `Value`: a dynamically typed column value with a fixed total order
//! - `PackedKey`: unambiguous, length-prefixed encoding of composite primary keys
//! - `ColumnInfo` / `TableInfo`: metadata of a tracked table
//! - `SiteId`, `ColumnId`, `ClockEntry`, `ChangeRecord`: the clock model
//! - `winner`: the pure last-writer-wins rule used by the merge engine
//!
//! ## Example
//!
//! ```rust
//! use crrow_core::{PackedKey, Value};
//! use crrow_core::winner::{remote_wins, LocalState, Verdict};
//!
//! let key = PackedKey::pack(&[Value::Integer(1), Value::text("a|b")]).unwrap();
//! assert_eq!(key.unpack().unwrap(), vec![Value::Integer(1), Value::text("a|b")]);
//!
//! let local = LocalState { column_version: 3, value: &Value::text("y") };
//! let verdict = remote_wins(3, &Value::text("z"), Some(local));
//! assert_eq!(verdict, Verdict::RemoteWins);
//! ```

pub mod change;
pub mod clock;
pub mod error;
pub mod key;
pub mod schema;
pub mod site;
pub mod value;
pub mod winner;

pub use change::ChangeRecord;
pub use clock::{ClockEntry, ColumnId, DbVersion, MIN_DB_VERSION};
pub use error::{CoreError, Result};
pub use key::PackedKey;
pub use schema::{ColumnDescription, ColumnInfo, TableDescription, TableInfo};
pub use site::SiteId;
pub use value::{Value, ValueKind};
