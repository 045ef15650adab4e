use rusqlite::Connection;
use std::any::type_name;
use std::collections::BTreeSet;
use std::fmt;

use crate::config::RetryPolicy;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::key::{quoted, safe_key_string};
use crate::reader::{BatchReader, MappingReader};
use crate::value::{Row, RowMap};
use crate::write::{insert_mappings, insert_tuples, write_retrying};

/// Batch size used when callers have no preference.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// What a concrete table type has to provide.
pub trait TableSchema {
    /// Create the table and its indexes if they do not exist yet.
    ///
    /// Runs inside the retried write transaction, so it must not issue its
    /// own `BEGIN` or `COMMIT`. `table` is already normalized.
    fn create_schema(&self, conn: &Connection, table: &str) -> rusqlite::Result<()>;

    /// Name the fields of a row read in table-column order.
    fn project_row(&self, row: Row) -> RowMap;

    /// Label used by `Display`.
    fn kind(&self) -> &str {
        let name = type_name::<Self>();
        name.rsplit("::").next().unwrap_or(name)
    }
}

/// A table bound to a [`Database`].
///
/// Dropping a `Table` leaves the physical table in place; see
/// [`Table::drop_table`].
pub struct Table<'db, S> {
    db: &'db Database,
    name: String,
    schema: S,
    retry: RetryPolicy,
}

impl<'db, S: TableSchema> Table<'db, S> {
    /// Bind `schema` to the normalized form of `name` in `db`, creating the
    /// table if needed.
    pub fn open(db: &'db Database, name: &str, schema: S) -> Result<Self> {
        let name = safe_key_string(name);
        let retry = db.retry_policy().clone();
        write_retrying(db.handle()?, &retry, &name, |conn| {
            schema.create_schema(conn, &name)
        })?;
        Ok(Self {
            db,
            name,
            schema,
            retry,
        })
    }

    /// Use `retry` for this table's writes instead of the database default.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &'db Database {
        self.db
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn columns(&self) -> Result<Vec<String>> {
        self.db.columns_of(&self.name)
    }

    /// True when every name in `candidate` is a column of this table.
    pub fn ensure_columns<I, K>(&self, candidate: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let columns = self.columns()?;
        Ok(candidate
            .into_iter()
            .all(|key| columns.iter().any(|c| c == key.as_ref())))
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self.db.handle()?.query_row(
            &format!("SELECT COUNT(*) FROM {}", quoted(&self.name)),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Insert rows given in table-column order, all or nothing.
    pub fn insert_many_tuples(&self, rows: &[Row]) -> Result<()> {
        insert_tuples(self.db.handle()?, &self.retry, &self.name, rows)
    }

    /// Insert keyed rows, all or nothing. Every key across the batch must be
    /// a column; this is checked before anything is written.
    pub fn insert_many_mappings(&self, rows: &[RowMap]) -> Result<()> {
        if rows.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "empty insert batch for table {}",
                self.name
            )));
        }
        let keys: BTreeSet<&String> = rows.iter().flat_map(|row| row.keys()).collect();
        let columns = self.columns()?;
        let unknown: Vec<String> = keys
            .into_iter()
            .filter(|key| !columns.contains(*key))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(Error::SchemaMismatch {
                table: self.name.clone(),
                expected: columns,
                actual: unknown,
            });
        }
        insert_mappings(self.db.handle()?, &self.retry, &self.name, rows)
    }

    /// Read rows in batches of at most `batch_size`.
    pub fn read_tuples(&self, batch_size: usize) -> Result<BatchReader<'db>> {
        self.db.read_rows(&self.name, batch_size)
    }

    /// Like [`Table::read_tuples`], with each row run through
    /// [`TableSchema::project_row`].
    pub fn read_mappings(&self, batch_size: usize) -> Result<MappingReader<'_, S>> {
        Ok(MappingReader::new(self.read_tuples(batch_size)?, &self.schema))
    }

    /// Drop the physical table.
    pub fn drop_table(self) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quoted(&self.name));
        write_retrying(self.db.handle()?, &self.retry, &self.name, |conn| {
            conn.execute_batch(&sql)
        })
    }
}

impl<S: TableSchema> fmt::Display for Table<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}#{})",
            self.schema.kind(),
            self.db.path().display(),
            self.name
        )
    }
}

impl<S: TableSchema> fmt::Debug for Table<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("kind", &self.schema.kind())
            .field("path", &self.db.path())
            .field("name", &self.name)
            .finish()
    }
}
