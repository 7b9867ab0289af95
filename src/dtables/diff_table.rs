//! `gitdb_diff_<table>`: every change to a table, commit by commit.
//!
//! The first partition compares the working root with HEAD; the following
//! ones walk HEAD's first-parent history, each commit against its parent.
//! Rows from every era are converted into the table's current (working)
//! schema.

use std::sync::Arc;

use tracing::debug;

use super::diff_iter::{side_columns, DiffPhase, DiffRowIter, MaterializerConfig, RowHeader};
use crate::catalog::{Catalog, TableSchema};
use crate::context::Context;
use crate::snapshot::{Snapshot, SnapshotSource};
use crate::sql::{Partition, RowIter, SqlError, SqlResult, SqlSchema, Table};
use crate::storage::{CommitId, TableName};

pub const DIFF_TABLE_PREFIX: &str = "gitdb_diff_";

/// to-commit label of the working root
pub const WORKING_LABEL: &str = "WORKING";
/// from-commit label of the empty root before the first commit
pub const EMPTY_LABEL: &str = "EMPTY";

/// The two roots one partition compares, encoded into the partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommitPair {
    to: CommitId,
    working: bool,
    from: Option<CommitId>,
}

impl CommitPair {
    fn encode(&self) -> Partition {
        let from = self.from.map(|c| c.to_string()).unwrap_or_default();
        if self.working {
            Partition::new(format!("{}@{}..{}", WORKING_LABEL, self.to, from))
        } else {
            Partition::new(format!("{}..{}", self.to, from))
        }
    }

    fn decode(partition: &Partition) -> SqlResult<Self> {
        let bad = || SqlError::Internal(format!("malformed diff partition '{}'", partition));
        let (to, from) = partition.key().split_once("..").ok_or_else(bad)?;
        let (working, to) = match to.strip_prefix(WORKING_LABEL).and_then(|t| t.strip_prefix('@')) {
            Some(rest) => (true, rest),
            None => (false, to),
        };
        let to = CommitId::from_hex(to).map_err(|_| bad())?;
        let from = match from {
            "" => None,
            hex => Some(CommitId::from_hex(hex).map_err(|_| bad())?),
        };
        Ok(Self { to, working, from })
    }
}

pub struct DiffTable {
    name: String,
    table: TableName,
    catalog: Catalog,
    target: Arc<TableSchema>,
    schema: SqlSchema,
    config: MaterializerConfig,
}

impl DiffTable {
    /// The table must exist in the working root; its schema there becomes
    /// the shape of every row.
    pub fn new(catalog: Catalog, table: TableName, config: MaterializerConfig) -> SqlResult<Self> {
        let name = format!("{}{}", DIFF_TABLE_PREFIX, table);
        let working = catalog.repository().working_set()?.working;
        let target = catalog
            .find_table(&table, working)?
            .ok_or_else(|| SqlError::TableNotFound(table.to_string()))?;

        let header = RowHeader::Commits {
            to_commit: String::new(),
            to_date: None,
            from_commit: String::new(),
            from_date: None,
        };
        let mut columns = header.columns(&name);
        columns.extend(side_columns("to", &target, &name));
        columns.extend(side_columns("from", &target, &name));

        Ok(Self {
            name,
            table,
            catalog,
            target: Arc::new(target),
            schema: SqlSchema::new(columns),
            config,
        })
    }

    pub fn underlying_table(&self) -> &TableName {
        &self.table
    }

    fn changed(&self, to: CommitId, from: Option<CommitId>) -> SqlResult<bool> {
        let repo = self.catalog.repository();
        let to_tree = repo.table_tree_id(&self.table, to)?;
        let from_tree = match from {
            Some(from) => repo.table_tree_id(&self.table, from)?,
            None => None,
        };
        Ok(to_tree != from_tree)
    }

    /// Only the schema is read here; the rows are read by the producer.
    fn snapshot(&self, at: Option<CommitId>) -> SqlResult<SnapshotSource> {
        let Some(at) = at else {
            return Ok(Snapshot::empty(self.target.clone()).into());
        };
        Ok(match self.catalog.find_table(&self.table, at)? {
            Some(schema) => {
                SnapshotSource::stored(self.catalog.repository().clone(), self.table.clone(), at, Arc::new(schema))
            }
            None => Snapshot::empty(self.target.clone()).into(),
        })
    }

    fn header(&self, pair: &CommitPair) -> SqlResult<RowHeader> {
        let repo = self.catalog.repository();
        let (to_commit, to_date) = if pair.working {
            (WORKING_LABEL.to_string(), None)
        } else {
            (pair.to.to_string(), Some(repo.get_commit(pair.to)?.timestamp))
        };
        let (from_commit, from_date) = match pair.from {
            Some(from) => (from.to_string(), Some(repo.get_commit(from)?.timestamp)),
            None => (EMPTY_LABEL.to_string(), None),
        };
        Ok(RowHeader::Commits {
            to_commit,
            to_date,
            from_commit,
            from_date,
        })
    }
}

impl Table for DiffTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &SqlSchema {
        &self.schema
    }

    fn partitions(&self, ctx: &Context) -> SqlResult<Vec<Partition>> {
        let repo = self.catalog.repository();
        let ws = repo.working_set()?;
        let mut partitions = Vec::new();

        if self.changed(ws.working, Some(ws.head))? {
            partitions.push(CommitPair { to: ws.working, working: true, from: Some(ws.head) }.encode());
        }

        for commit in repo.history(ws.head, None)? {
            ctx.check()?;
            let parent = commit.first_parent();
            if self.changed(commit.id, parent)? {
                partitions.push(CommitPair { to: commit.id, working: false, from: parent }.encode());
            }
        }

        debug!(table = %self.table, partitions = partitions.len(), "diff partitions");
        Ok(partitions)
    }

    fn partition_rows(&self, ctx: &Context, partition: &Partition) -> SqlResult<Box<dyn RowIter>> {
        let pair = CommitPair::decode(partition)?;
        let phase = DiffPhase::new(
            self.snapshot(pair.from)?,
            self.snapshot(Some(pair.to))?,
            &self.target,
            &self.target,
            self.header(&pair)?,
        )?;
        Ok(Box::new(DiffRowIter::spawn(ctx, vec![phase], self.config)?))
    }
}
