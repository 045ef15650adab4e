use anyhow::Result;
use sqlite_tables::{merge, merge_with, row, Database, Error, KeyValueTable, Row, Table};
use tempfile::TempDir;

fn open(dir: &TempDir, name: &str) -> Result<Database> {
    Ok(Database::open(dir.path().join(name))?)
}

fn rows_of(db: &Database, table: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for batch in db.read_rows(table, 2)? {
        rows.extend(batch?);
    }
    Ok(rows)
}

#[tokio::test]
async fn test_merge_into_empty_database() {
    test_merge_into_empty_database_impl().unwrap();
}

fn test_merge_into_empty_database_impl() -> Result<()> {
    let dir = TempDir::new()?;
    let src = open(&dir, "src.db")?;
    let dest = open(&dir, "dest.db")?;
    let t1 = Table::open(&src, "T1", KeyValueTable)?;
    t1.insert_many_tuples(&[row![1, "r1"], row![2, "r2"]])?;
    let t2 = Table::open(&src, "T2", KeyValueTable)?;
    t2.insert_many_tuples(&[row![9, "x"]])?;

    let report = merge(&dest, &src)?;
    assert_eq!(report.tables.len(), 2);
    assert!(report.tables.iter().all(|t| t.created));
    assert_eq!(report.total_rows(), 3);

    assert_eq!(dest.list_tables()?, vec!["T1", "T2"]);
    assert_eq!(dest.columns_of("T1")?, src.columns_of("T1")?);
    assert_eq!(rows_of(&dest, "T1")?, vec![row![1, "r1"], row![2, "r2"]]);
    assert_eq!(rows_of(&dest, "T2")?, vec![row![9, "x"]]);

    // Copied tables keep their indexes.
    let indexes: i64 = dest.handle()?.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = 'T1'",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(indexes, 1);
    Ok(())
}

#[tokio::test]
async fn test_merge_appends_to_matching_table() {
    test_merge_appends_to_matching_table_impl().unwrap();
}

fn test_merge_appends_to_matching_table_impl() -> Result<()> {
    let dir = TempDir::new()?;
    let src = open(&dir, "src.db")?;
    let dest = open(&dir, "dest.db")?;
    Table::open(&src, "kv", KeyValueTable)?.insert_many_tuples(&[
        row![3, "c"],
        row![4, "d"],
        row![5, "e"],
    ])?;
    Table::open(&dest, "kv", KeyValueTable)?.insert_many_tuples(&[row![1, "a"]])?;

    let report = merge_with(&dest, &src, 2)?;
    assert!(!report.tables[0].created);
    assert_eq!(report.tables[0].rows, 3);
    assert_eq!(
        rows_of(&dest, "kv")?,
        vec![row![1, "a"], row![3, "c"], row![4, "d"], row![5, "e"]]
    );
    // The source is only read.
    assert_eq!(rows_of(&src, "kv")?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_merge_rejects_column_mismatch() {
    test_merge_rejects_column_mismatch_impl().unwrap();
}

fn test_merge_rejects_column_mismatch_impl() -> Result<()> {
    let dir = TempDir::new()?;
    let src = open(&dir, "src.db")?;
    let dest = open(&dir, "dest.db")?;
    src.handle()?.execute_batch(
        "CREATE TABLE a (x INTEGER);
         CREATE TABLE b (key INTEGER, value TEXT);
         CREATE TABLE c (y INTEGER);
         INSERT INTO a VALUES (1);
         INSERT INTO b VALUES (1, 'one');
         INSERT INTO c VALUES (1);",
    )?;
    dest.handle()?.execute_batch(
        "CREATE TABLE b (value TEXT, key INTEGER);
         INSERT INTO b VALUES ('kept', 0);",
    )?;

    let err = merge(&dest, &src).unwrap_err();
    match err {
        Error::SchemaMismatch {
            table,
            expected,
            actual,
        } => {
            assert_eq!(table, "b");
            assert_eq!(expected, vec!["value", "key"]);
            assert_eq!(actual, vec!["key", "value"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Earlier tables stay merged; the mismatched one and later ones are untouched.
    assert_eq!(rows_of(&dest, "a")?, vec![row![1]]);
    assert_eq!(rows_of(&dest, "b")?, vec![row!["kept", 0]]);
    assert!(!dest.has_table("c")?);
    Ok(())
}

#[tokio::test]
async fn test_merge_failure_keeps_batches_atomic() {
    test_merge_failure_keeps_batches_atomic_impl().unwrap();
}

fn test_merge_failure_keeps_batches_atomic_impl() -> Result<()> {
    let dir = TempDir::new()?;
    let src = open(&dir, "src.db")?;
    let dest = open(&dir, "dest.db")?;
    src.handle()?.execute_batch(
        "CREATE TABLE u (id INTEGER UNIQUE);
         INSERT INTO u VALUES (1), (2), (3), (4);",
    )?;
    dest.handle()?.execute_batch(
        "CREATE TABLE u (id INTEGER UNIQUE);
         INSERT INTO u VALUES (4);",
    )?;

    // Batches of two: [1, 2] lands, [3, 4] violates the constraint and rolls back.
    let err = merge_with(&dest, &src, 2).unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)));
    assert_eq!(rows_of(&dest, "u")?, vec![row![4], row![1], row![2]]);
    Ok(())
}

#[tokio::test]
async fn test_merge_of_empty_source_is_a_no_op() {
    test_merge_of_empty_source_is_a_no_op_impl().unwrap();
}

fn test_merge_of_empty_source_is_a_no_op_impl() -> Result<()> {
    let src = Database::open_in_memory()?;
    let dest = Database::open_in_memory()?;
    Table::open(&src, "empty", KeyValueTable)?;
    let report = merge(&dest, &src)?;
    assert_eq!(report.tables[0].rows, 0);
    assert!(dest.has_table("empty")?);
    assert!(matches!(
        merge_with(&dest, &src, 0),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_merge_copies_text_bytes_exactly() {
    test_merge_copies_text_bytes_exactly_impl().unwrap();
}

fn test_merge_copies_text_bytes_exactly_impl() -> Result<()> {
    let src = Database::open_in_memory()?;
    let dest = Database::open_in_memory()?;
    src.handle()?.execute_batch(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);
         INSERT INTO t VALUES (-9223372036854775807 - 1, CAST(x'ff61' AS TEXT));
         INSERT INTO t VALUES (1, 'plain');",
    )?;

    let report = merge(&dest, &src)?;
    assert_eq!(report.total_rows(), 2);

    let dump = |db: &Database| -> Result<Vec<(i64, String, String)>> {
        let conn = db.handle()?;
        let mut stmt = conn.prepare("SELECT id, hex(v), typeof(v) FROM t ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    };
    assert_eq!(dump(&dest)?, dump(&src)?);
    assert_eq!(dump(&dest)?[0].1, "FF61");
    Ok(())
}
