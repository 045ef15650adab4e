//! Lazy, forward-only batch readers.
//!
//! A reader pages through a table in rowid order on a single prepared
//! statement. It stops at the highest rowid present when it was created, so
//! rows appended while it is being drained are never yielded. Updates and
//! deletes to rows it has not reached yet are visible.

use rusqlite::{params, Connection, OptionalExtension, Statement};
use std::iter::FusedIterator;

use crate::error::Result;
use crate::key::quoted;
use crate::table::TableSchema;
use crate::value::{Row, RowMap, Value};

/// Yields batches of up to `batch_size` tuples, in storage order.
///
/// Single pass: once exhausted, a new reader is needed to read again.
pub struct BatchReader<'conn> {
    stmt: Statement<'conn>,
    batch_size: usize,
    /// Lowest rowid the next page may start at.
    next_rowid: i64,
    max_rowid: i64,
    done: bool,
}

impl<'conn> BatchReader<'conn> {
    pub(crate) fn new(conn: &'conn Connection, table: &str, batch_size: usize) -> Result<Self> {
        let target = quoted(table);
        let max_rowid: Option<i64> = conn
            .query_row(&format!("SELECT max(_rowid_) FROM {target}"), [], |r| r.get(0))
            .optional()?
            .flatten();
        let stmt = conn.prepare(&format!(
            "SELECT _rowid_, * FROM {target} \
             WHERE _rowid_ >= ?1 AND _rowid_ <= ?2 ORDER BY _rowid_ LIMIT ?3"
        ))?;
        Ok(Self {
            stmt,
            batch_size,
            next_rowid: i64::MIN,
            max_rowid: max_rowid.unwrap_or(i64::MIN),
            done: max_rowid.is_none(),
        })
    }

    fn fetch(&mut self) -> rusqlite::Result<Vec<Row>> {
        let width = self.stmt.column_count();
        let limit = i64::try_from(self.batch_size).unwrap_or(i64::MAX);
        let mut last = None;
        let mut batch = Vec::with_capacity(self.batch_size.min(1024));
        let mut rows = self.stmt.query(params![self.next_rowid, self.max_rowid, limit])?;
        while let Some(row) = rows.next()? {
            last = Some(row.get::<_, i64>(0)?);
            let values = (1..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Row>>()?;
            batch.push(values);
        }
        if let Some(last) = last {
            match last.checked_add(1) {
                Some(next) => self.next_rowid = next,
                // Nothing can follow i64::MAX.
                None => self.done = true,
            }
        }
        Ok(batch)
    }
}

impl Iterator for BatchReader<'_> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fetch() {
            Ok(batch) if batch.is_empty() => {
                self.done = true;
                None
            }
            Ok(batch) => {
                if batch.len() < self.batch_size {
                    self.done = true;
                }
                Some(Ok(batch))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err.into()))
            }
        }
    }
}

impl FusedIterator for BatchReader<'_> {}

/// [`BatchReader`] with every row passed through [`TableSchema::project_row`].
pub struct MappingReader<'a, S: ?Sized> {
    inner: BatchReader<'a>,
    schema: &'a S,
}

impl<'a, S: TableSchema + ?Sized> MappingReader<'a, S> {
    pub(crate) fn new(inner: BatchReader<'a>, schema: &'a S) -> Self {
        Self { inner, schema }
    }
}

impl<S: TableSchema + ?Sized> Iterator for MappingReader<'_, S> {
    type Item = Result<Vec<RowMap>>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.inner.next()?;
        Some(batch.map(|rows| {
            rows.into_iter()
                .map(|row| self.schema.project_row(row))
                .collect()
        }))
    }
}

impl<S: TableSchema + ?Sized> FusedIterator for MappingReader<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(n: i64) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k INTEGER, v TEXT)").unwrap();
        for i in 1..=n {
            conn.execute("INSERT INTO t VALUES (?1, ?2)", params![i, format!("v{i}")])
                .unwrap();
        }
        conn
    }

    fn sizes(conn: &Connection, batch: usize) -> Vec<usize> {
        BatchReader::new(conn, "t", batch)
            .unwrap()
            .map(|b| b.unwrap().len())
            .collect()
    }

    #[test]
    fn batches_cover_all_rows() {
        let conn = setup(7);
        assert_eq!(sizes(&conn, 3), vec![3, 3, 1]);
        assert_eq!(sizes(&conn, 7), vec![7]);
        assert_eq!(sizes(&conn, 10), vec![7]);
        assert_eq!(sizes(&conn, 1), vec![1; 7]);
    }

    #[test]
    fn evenly_divisible_has_no_trailing_batch() {
        let conn = setup(6);
        assert_eq!(sizes(&conn, 3), vec![3, 3]);
    }

    #[test]
    fn empty_table_yields_nothing() {
        let conn = setup(0);
        assert!(BatchReader::new(&conn, "t", 5).unwrap().next().is_none());
    }

    #[test]
    fn rows_keep_storage_order() {
        let conn = setup(4);
        let rows: Vec<Row> = BatchReader::new(&conn, "t", 3)
            .unwrap()
            .flat_map(|b| b.unwrap())
            .collect();
        let keys: Vec<i64> = rows.iter().filter_map(|r| r[0].as_i64()).collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);
        assert_eq!(rows[3][1], Value::Text("v4".into()));
    }

    #[test]
    fn rows_appended_during_read_are_not_yielded() {
        let conn = setup(4);
        let mut reader = BatchReader::new(&conn, "t", 2).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().len(), 2);
        conn.execute("INSERT INTO t VALUES (5, 'late')", []).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().len(), 2);
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn extreme_rowids_are_read() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE e (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        for id in [i64::MIN, 1, i64::MAX] {
            conn.execute("INSERT INTO e VALUES (?1, 'x')", params![id]).unwrap();
        }
        let ids: Vec<i64> = BatchReader::new(&conn, "e", 1)
            .unwrap()
            .flat_map(|b| b.unwrap())
            .filter_map(|r| r[0].as_i64())
            .collect();
        assert_eq!(ids, vec![i64::MIN, 1, i64::MAX]);
    }

    #[test]
    fn missing_table_fails_on_creation() {
        let conn = setup(0);
        assert!(BatchReader::new(&conn, "nope", 5).is_err());
    }
}
