use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The database file could not be opened or created.
    #[error("cannot open database {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    /// The database handle was already closed.
    #[error("database {} is closed", .path.display())]
    Closed { path: PathBuf },
    #[error("no such table: {table}")]
    NoSuchTable { table: String },
    /// Column sets disagree: insert keys outside the table, or a merge
    /// between tables with different column lists.
    #[error("schema mismatch on table {table}: expected {expected:?}, got {actual:?}")]
    SchemaMismatch {
        table: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    /// Another writer held the lock through every retry.
    #[error("table {table} still locked after {attempts} attempts: {source}")]
    LockConflict {
        table: String,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// True for lock conflicts, whether retries ran out or the engine error
    /// has not been classified yet.
    pub fn is_lock_conflict(&self) -> bool {
        match self {
            Error::LockConflict { .. } => true,
            Error::Sqlite(err) => is_locked(err),
            _ => false,
        }
    }
}

/// Busy or locked: another connection holds the lock we need.
pub(crate) fn is_locked(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        }
        _ => false,
    }
}
