//! Copy every table of one database into another.

use tracing::info;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::table::DEFAULT_BATCH_SIZE;

/// What [`merge`] did, table by table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub tables: Vec<MergedTable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTable {
    pub name: String,
    /// The table did not exist in the destination before the merge.
    pub created: bool,
    pub rows: u64,
}

impl MergeReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Append every row of every table in `src` to `dest`.
pub fn merge(dest: &Database, src: &Database) -> Result<MergeReport> {
    merge_with(dest, src, DEFAULT_BATCH_SIZE)
}

/// [`merge`] reading `src` in batches of `batch_size` rows.
///
/// Tables are taken in `src` order. A table already in `dest` must have the
/// same columns in the same order, otherwise the merge stops with
/// [`Error::SchemaMismatch`]. Missing tables are created from the source
/// definition. Each batch is inserted atomically; tables merged before a
/// failure stay merged.
pub fn merge_with(dest: &Database, src: &Database, batch_size: usize) -> Result<MergeReport> {
    if batch_size == 0 {
        return Err(Error::InvalidArgument("batch size must be positive".into()));
    }
    let mut report = MergeReport::default();

    for name in src.list_tables()? {
        let created = if dest.has_table(&name)? {
            let expected = dest.columns_of(&name)?;
            let actual = src.columns_of(&name)?;
            if expected != actual {
                return Err(Error::SchemaMismatch {
                    table: name,
                    expected,
                    actual,
                });
            }
            false
        } else {
            dest.copy_table_schema(src, &name)?;
            true
        };
        info!(table = %name, created, "merging table");

        let mut rows = 0u64;
        for batch in src.read_rows(&name, batch_size)? {
            let batch = batch?;
            dest.insert_rows_retrying(&name, &batch)?;
            rows += batch.len() as u64;
        }
        info!(table = %name, rows, "merged table");
        report.tables.push(MergedTable {
            name,
            created,
            rows,
        });
    }

    info!(
        tables = report.tables.len(),
        rows = report.total_rows(),
        "merge complete"
    );
    Ok(report)
}
