use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{RetryPolicy, SqliteConfig};
use crate::error::{Error, Result};
use crate::key::{quoted, safe_key_string};
use crate::reader::BatchReader;
use crate::value::Row;
use crate::write::{insert_tuples, write_retrying};

/// Tables whose names start with this prefix belong to the engine.
const RESERVED_PREFIX: &str = "sqlite_";

/// One connection to one SQLite file.
///
/// Closing is explicit through [`Database::close`] or happens on drop with a
/// best-effort commit. Any use after close fails with [`Error::Closed`].
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    conn: Option<Connection>,
    retry: RetryPolicy,
}

impl Database {
    /// Open or create the database file at `path` with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(SqliteConfig::new(path.as_ref()))
    }

    pub fn open_with_config(config: SqliteConfig) -> Result<Self> {
        let conn = Connection::open(&config.db_path).map_err(|source| Error::Io {
            path: config.db_path.clone(),
            source,
        })?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        debug!(path = %config.db_path.display(), "opened database");
        Ok(Self {
            path: config.db_path,
            conn: Some(conn),
            retry: config.retry,
        })
    }

    /// Private in-memory database; mostly useful in tests.
    pub fn open_in_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            conn: Some(conn),
            retry: RetryPolicy::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// The live connection, for schema hooks and ad hoc queries.
    pub fn handle(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| Error::Closed {
            path: self.path.clone(),
        })
    }

    /// Release the handle. With `commit`, an open transaction is committed
    /// first; a failing commit is logged and discarded, since teardown must
    /// not fail. Later calls do nothing.
    pub fn close(&mut self, commit: bool) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if commit && !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("COMMIT") {
                debug!(path = %self.path.display(), error = %err, "commit on close failed");
            }
        }
        if let Err((_conn, err)) = conn.close() {
            debug!(path = %self.path.display(), error = %err, "close failed, dropping handle");
        }
        debug!(path = %self.path.display(), "closed database");
    }

    /// User tables, in creation order.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.handle()?;
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with(RESERVED_PREFIX))
            .collect())
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        let name = safe_key_string(name);
        let found: i64 = self.handle()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    /// Column names of `table` in declaration order.
    pub fn columns_of(&self, table: &str) -> Result<Vec<String>> {
        let name = self.existing_table(table)?;
        let stmt = self
            .handle()?
            .prepare(&format!("SELECT * FROM {} LIMIT 0", quoted(&name)))?;
        Ok(stmt.column_names().into_iter().map(String::from).collect())
    }

    /// Insert `rows` into `table` atomically, retrying lock conflicts with
    /// this database's [`RetryPolicy`].
    pub fn insert_rows_retrying(&self, table: &str, rows: &[Row]) -> Result<()> {
        let name = safe_key_string(table);
        insert_tuples(self.handle()?, &self.retry, &name, rows)
    }

    /// Read `table` in batches of at most `batch_size` rows.
    pub fn read_rows(&self, table: &str, batch_size: usize) -> Result<BatchReader<'_>> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch size must be positive".into()));
        }
        let name = self.existing_table(table)?;
        BatchReader::new(self.handle()?, &name, batch_size)
    }

    /// Create `table` here with the same definition and indexes it has in
    /// `src`. No rows are copied. An index whose name is already taken here
    /// is skipped with a warning.
    pub fn copy_table_schema(&self, src: &Database, table: &str) -> Result<()> {
        let name = src.existing_table(table)?;
        let mut stmt = src.handle()?.prepare(
            "SELECT type, name, sql FROM sqlite_master \
             WHERE tbl_name = ?1 AND type IN ('table', 'index') AND sql IS NOT NULL \
             ORDER BY type = 'index', rowid",
        )?;
        let ddl = stmt
            .query_map(params![name], |row| {
                Ok((
                    row.get::<_, String>(0)? == "index",
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        write_retrying(self.handle()?, &self.retry, &name, |conn| {
            for (is_index, object, sql) in &ddl {
                if *is_index && name_taken(conn, object)? {
                    warn!(table = %name, index = %object, "index name already taken, skipping");
                    continue;
                }
                conn.execute_batch(sql)?;
            }
            Ok(())
        })?;
        debug!(table = %name, statements = ddl.len(), "copied table schema");
        Ok(())
    }

    /// Normalized name of `table`, or [`Error::NoSuchTable`].
    fn existing_table(&self, table: &str) -> Result<String> {
        let name = safe_key_string(table);
        if self.has_table(&name)? {
            Ok(name)
        } else {
            Err(Error::NoSuchTable { table: name })
        }
    }
}

fn name_taken(conn: &Connection, object: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
        params![object],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close(true);
    }
}
