//! The contract between system tables and the query engine.

use std::fmt;

use super::error::{SqlError, SqlResult};
use super::row::{RowIter, SqlRow, SqlSchema};
use crate::context::Context;

/// An opaque unit of work within a table, read independently of the others.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    key: String,
}

impl Partition {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> &SqlSchema;

    fn partitions(&self, ctx: &Context) -> SqlResult<Vec<Partition>>;

    fn partition_rows(&self, ctx: &Context, partition: &Partition) -> SqlResult<Box<dyn RowIter>>;
}

/// Statement lifecycle shared by every row editor.
///
/// Edits are buffered until `statement_complete`; `discard_changes` drops
/// whatever the statement wrote so far.
pub trait TableEditor: Send {
    fn statement_begin(&mut self, _ctx: &Context) {}

    fn discard_changes(&mut self, ctx: &Context, cause: &SqlError) -> SqlResult<()>;

    fn statement_complete(&mut self, ctx: &Context) -> SqlResult<()>;

    fn close(&mut self, _ctx: &Context) -> SqlResult<()> {
        Ok(())
    }
}

pub trait RowInserter: TableEditor {
    fn insert(&mut self, ctx: &Context, row: &SqlRow) -> SqlResult<()>;
}

pub trait RowUpdater: TableEditor {
    fn update(&mut self, ctx: &Context, old: &SqlRow, new: &SqlRow) -> SqlResult<()>;
}

pub trait RowDeleter: TableEditor {
    fn delete(&mut self, ctx: &Context, row: &SqlRow) -> SqlResult<()>;
}

pub trait InsertableTable: Table {
    fn inserter(&self, ctx: &Context) -> SqlResult<Box<dyn RowInserter + '_>>;
}

pub trait UpdatableTable: Table {
    fn updater(&self, ctx: &Context) -> SqlResult<Box<dyn RowUpdater + '_>>;
}

pub trait DeletableTable: Table {
    fn deleter(&self, ctx: &Context) -> SqlResult<Box<dyn RowDeleter + '_>>;
}

/// Read every partition of a table in order.
pub fn scan_table(ctx: &Context, table: &dyn Table) -> SqlResult<Vec<SqlRow>> {
    let mut rows = Vec::new();
    for partition in table.partitions(ctx)? {
        let mut iter = table.partition_rows(ctx, &partition)?;
        rows.extend(super::row::collect_rows(ctx, iter.as_mut())?);
    }
    Ok(rows)
}
