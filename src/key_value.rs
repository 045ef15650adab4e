use rusqlite::Connection;

use crate::key::quoted;
use crate::table::TableSchema;
use crate::value::{Row, RowMap, Value};

/// `(key INTEGER, value TEXT)` with an index on `key`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueTable;

impl TableSchema for KeyValueTable {
    fn create_schema(&self, conn: &Connection, table: &str) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (key INTEGER, value TEXT);
             CREATE INDEX IF NOT EXISTS {idx} ON {t} (key);",
            t = quoted(table),
            idx = quoted(&format!("{table}_key")),
        ))
    }

    fn project_row(&self, row: Row) -> RowMap {
        let mut values = row.into_iter();
        let mut map = RowMap::new();
        map.insert("key".into(), values.next().unwrap_or(Value::Null));
        map.insert("value".into(), values.next().unwrap_or(Value::Null));
        map
    }

    fn kind(&self) -> &str {
        "KeyValueTable"
    }
}
