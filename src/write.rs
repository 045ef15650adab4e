//! Retrying write path.
//!
//! Every mutation goes through [`write_retrying`]: one `BEGIN IMMEDIATE`
//! scope, the caller's writes staged inside a savepoint, then `COMMIT`.
//! A busy/locked result at any of those steps sleeps and retries on the
//! same scope until the policy runs out. Anything else rolls back and
//! returns the engine error as is.

use rusqlite::{params_from_iter, Connection};
use std::thread;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{is_locked, Error, Result};
use crate::key::quoted;
use crate::value::{Row, RowMap};

const SAVEPOINT: &str = "sqlite_tables_write";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Begin,
    Staging,
    Commit,
}

/// Run `write` atomically against `conn`, retrying lock conflicts.
///
/// `write` may run more than once; each run starts from a clean savepoint.
/// `label` names the target in errors and events.
pub(crate) fn write_retrying<F>(
    conn: &Connection,
    policy: &RetryPolicy,
    label: &str,
    mut write: F,
) -> Result<()>
where
    F: FnMut(&Connection) -> rusqlite::Result<()>,
{
    let mut stage = Stage::Begin;
    let mut retries = 0u32;

    loop {
        let attempt = advance(conn, &mut stage, &mut write);
        let err = match attempt {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if is_locked(&err) && retries < policy.max_retries {
            retries += 1;
            let backoff = policy.backoff();
            warn!(
                table = label,
                attempt = retries,
                max_retries = policy.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                "database is locked, retrying"
            );
            thread::sleep(backoff);
            continue;
        }

        if stage != Stage::Begin {
            rollback(conn, label);
        }
        if is_locked(&err) {
            return Err(Error::LockConflict {
                table: label.to_string(),
                attempts: retries + 1,
                source: err,
            });
        }
        return Err(Error::Sqlite(err));
    }
}

/// Move through begin, stage and commit, stopping at the first failure.
/// `stage` records how far the scope got so a retry resumes there.
fn advance<F>(conn: &Connection, stage: &mut Stage, write: &mut F) -> rusqlite::Result<()>
where
    F: FnMut(&Connection) -> rusqlite::Result<()>,
{
    // The engine may have rolled the whole transaction back on its own.
    if *stage != Stage::Begin && conn.is_autocommit() {
        *stage = Stage::Begin;
    }
    if *stage == Stage::Begin {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        *stage = Stage::Staging;
    }
    if *stage == Stage::Staging {
        stage_once(conn, write)?;
        *stage = Stage::Commit;
    }
    // A busy COMMIT leaves the transaction open; it is retried as is.
    conn.execute_batch("COMMIT")
}

fn stage_once<F>(conn: &Connection, write: &mut F) -> rusqlite::Result<()>
where
    F: FnMut(&Connection) -> rusqlite::Result<()>,
{
    conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT}"))?;
    match write(conn) {
        Ok(()) => conn.execute_batch(&format!("RELEASE {SAVEPOINT}")),
        Err(err) => {
            if let Err(undo) =
                conn.execute_batch(&format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT}"))
            {
                debug!(error = %undo, "failed to unwind savepoint");
            }
            Err(err)
        }
    }
}

/// Insert tuples in table-column order as one retried write.
pub(crate) fn insert_tuples(
    conn: &Connection,
    policy: &RetryPolicy,
    table: &str,
    rows: &[Row],
) -> Result<()> {
    let Some(first) = rows.first() else {
        return Err(Error::InvalidArgument(format!(
            "empty insert batch for table {table}"
        )));
    };
    let sql = format!(
        "INSERT INTO {} VALUES ({})",
        quoted(table),
        placeholders(first.len())
    );
    write_retrying(conn, policy, table, |conn| {
        let mut stmt = conn.prepare_cached(&sql)?;
        for row in rows {
            stmt.execute(params_from_iter(row.iter()))?;
        }
        Ok(())
    })
}

/// Insert keyed rows as one retried write. Each row writes only its own
/// columns; keys must already be known to exist.
pub(crate) fn insert_mappings(
    conn: &Connection,
    policy: &RetryPolicy,
    table: &str,
    rows: &[RowMap],
) -> Result<()> {
    if rows.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "empty insert batch for table {table}"
        )));
    }
    let target = quoted(table);
    write_retrying(conn, policy, table, |conn| {
        for row in rows {
            let sql = if row.is_empty() {
                format!("INSERT INTO {target} DEFAULT VALUES")
            } else {
                let columns: Vec<String> =
                    row.keys().map(String::as_str).map(quoted_column).collect();
                format!(
                    "INSERT INTO {target} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders(row.len())
                )
            };
            conn.prepare_cached(&sql)?
                .execute(params_from_iter(row.values()))?;
        }
        Ok(())
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Quote a physical column name as is; embedded quotes are doubled.
fn quoted_column(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Roll back the scope we opened. The caller's error wins over any
/// rollback failure.
fn rollback(conn: &Connection, label: &str) {
    if conn.is_autocommit() {
        return;
    }
    if let Err(err) = conn.execute_batch("ROLLBACK") {
        warn!(table = label, error = %err, "rollback after failed write also failed");
    }
}
