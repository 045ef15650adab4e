//! Contention-tolerant table access over SQLite.
//!
//! # Intention
//!
//! - Wrap one SQLite file per [`Database`] and bind typed [`Table`]s to it.
//! - Make bulk writes atomic and tolerant of other writers holding the file
//!   lock: lock conflicts are retried with randomized backoff, anything else
//!   rolls back and fails immediately.
//! - Merge one database into another table by table ([`merge`]).
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - Progress is reported as `tracing` events; rendering them is up to the
//!   caller.
//!
//! ```
//! use sqlite_tables::{row, Database, KeyValueTable, Table};
//!
//! let db = Database::open_in_memory()?;
//! let table = Table::open(&db, "92M#Al-Function-Name", KeyValueTable)?;
//! table.insert_many_tuples(&[row![1, "a"], row![2, "b"]])?;
//! assert_eq!(table.count()?, 2);
//! assert_eq!(table.name(), "_92M_Al_Function_Name");
//! # Ok::<(), sqlite_tables::Error>(())
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod key;
pub mod key_value;
pub mod merge;
pub mod reader;
pub mod table;
pub mod value;
mod write;

pub use config::{RetryPolicy, SqliteConfig};
pub use database::Database;
pub use error::{Error, Result};
pub use key::safe_key_string;
pub use key_value::KeyValueTable;
pub use merge::{merge, merge_with, MergeReport, MergedTable};
pub use reader::{BatchReader, MappingReader};
pub use table::{Table, TableSchema, DEFAULT_BATCH_SIZE};
pub use value::{Row, RowMap, Value};
