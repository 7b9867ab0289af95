//! `gitdb_workspace_<table>`: pending changes to one table.
//!
//! Rows list what `HEAD → STAGED` changes (`staged = true`) followed by what
//! `STAGED → WORKING` changes (`staged = false`), numbered by one `id`
//! sequence. Updating `staged` moves a change into or out of the staged root;
//! deleting an unstaged row reverts that change in the working root.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::diff_iter::{side_columns, DiffPhase, DiffRowIter, MaterializerConfig, RowHeader};
use super::writer::{RowData, TableWriter};
use crate::branch_control::{AccessStore, Permissions};
use crate::catalog::{Catalog, TableSchema};
use crate::context::Context;
use crate::snapshot::{Snapshot, SnapshotSource};
use crate::sql::{
    DeletableTable, Partition, RowDeleter, RowIter, RowUpdater, SqlError, SqlResult, SqlRow, SqlSchema,
    Table, TableEditor, UpdatableTable, VecRowIter,
};
use crate::storage::{BranchName, CommitId, TableName, WorkingSet};

pub const WORKSPACE_TABLE_PREFIX: &str = "gitdb_workspace_";

const STAGED_COLUMN: usize = 1;
const HEADER_WIDTH: usize = 3;

/// the target schemas rows are converted into
struct Targets {
    from: Arc<TableSchema>,
    to: Arc<TableSchema>,
    modifiable: bool,
}

pub struct WorkspaceTable {
    name: String,
    table: TableName,
    catalog: Catalog,
    ws: WorkingSet,
    /// `None` when the table is identical in all three roots
    targets: Option<Targets>,
    schema: SqlSchema,
    config: MaterializerConfig,
    access: Arc<AccessStore>,
    database: String,
}

impl WorkspaceTable {
    pub fn new(
        catalog: Catalog,
        table: TableName,
        config: MaterializerConfig,
        access: Arc<AccessStore>,
        database: impl Into<String>,
    ) -> SqlResult<Self> {
        let name = format!("{}{}", WORKSPACE_TABLE_PREFIX, table);
        let repo = catalog.repository();
        let ws = repo.working_set()?;

        let head_tree = repo.table_tree_id(&table, ws.head)?;
        let staged_tree = repo.table_tree_id(&table, ws.staged)?;
        let working_tree = repo.table_tree_id(&table, ws.working)?;

        let targets = if head_tree == staged_tree && staged_tree == working_tree {
            None
        } else {
            let head = catalog.find_table(&table, ws.head)?;
            let staged = catalog.find_table(&table, ws.staged)?;
            let working = catalog.find_table(&table, ws.working)?;

            let to = working.clone().or_else(|| staged.clone()).or_else(|| head.clone());
            let from = head.or(staged).or(working);
            match (from, to) {
                (Some(from), Some(to)) => Some(Targets {
                    modifiable: from.same_columns(&to),
                    from: Arc::new(from),
                    to: Arc::new(to),
                }),
                _ => return Err(SqlError::Internal(format!("table {} changed but has no schema", table))),
            }
        };

        let schema = match &targets {
            None => SqlSchema::new(RowHeader::Workspace { staged: false }.columns(&name)[..2].to_vec()),
            Some(t) => {
                let mut columns = RowHeader::Workspace { staged: false }.columns(&name);
                columns.extend(side_columns("to", &t.to, &name));
                columns.extend(side_columns("from", &t.from, &name));
                SqlSchema::new(columns)
            }
        };

        debug!(
            table = %table,
            unchanged = targets.is_none(),
            modifiable = targets.as_ref().map_or(false, |t| t.modifiable),
            "workspace table resolved"
        );

        Ok(Self {
            name,
            table,
            catalog,
            ws,
            targets,
            schema,
            config,
            access,
            database: database.into(),
        })
    }

    pub fn underlying_table(&self) -> &TableName {
        &self.table
    }

    /// true when the table is the same in HEAD, STAGED and WORKING
    pub fn is_unchanged(&self) -> bool {
        self.targets.is_none()
    }

    /// Pending changes can only be moved when both sides share their columns.
    pub fn is_modifiable(&self) -> bool {
        self.targets.as_ref().map_or(false, |t| t.modifiable)
    }

    fn snapshot(&self, at: CommitId, fallback: &Arc<TableSchema>) -> SqlResult<SnapshotSource> {
        Ok(match self.catalog.find_table(&self.table, at)? {
            Some(schema) => {
                SnapshotSource::stored(self.catalog.repository().clone(), self.table.clone(), at, Arc::new(schema))
            }
            None => Snapshot::empty(fallback.clone()).into(),
        })
    }

    fn editor(&self, ctx: &Context, branch: BranchName) -> SqlResult<WorkspaceEditor<'_>> {
        let targets = self
            .targets
            .as_ref()
            .filter(|t| t.modifiable)
            .ok_or_else(|| SqlError::NotModifiable(self.name.clone()))?;
        self.access
            .check_access(ctx, &self.database, BranchName::main().as_str(), Permissions::WRITE)?;

        Ok(WorkspaceEditor {
            table: self,
            schema: targets.to.clone(),
            writer: TableWriter::new(self.catalog.repository().clone(), branch)?,
        })
    }
}

impl Table for WorkspaceTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &SqlSchema {
        &self.schema
    }

    fn partitions(&self, _ctx: &Context) -> SqlResult<Vec<Partition>> {
        Ok(vec![Partition::new(self.name.clone())])
    }

    fn partition_rows(&self, ctx: &Context, _partition: &Partition) -> SqlResult<Box<dyn RowIter>> {
        let Some(targets) = &self.targets else {
            return Ok(Box::new(VecRowIter::empty()));
        };

        let head = self.snapshot(self.ws.head, &targets.from)?;
        let staged = self.snapshot(self.ws.staged, &targets.to)?;
        let working = self.snapshot(self.ws.working, &targets.to)?;

        let phases = vec![
            DiffPhase::new(head, staged.clone(), &targets.from, &targets.to, RowHeader::Workspace { staged: true })?,
            DiffPhase::new(staged, working, &targets.from, &targets.to, RowHeader::Workspace { staged: false })?,
        ];
        Ok(Box::new(DiffRowIter::spawn(ctx, phases, self.config)?))
    }
}

impl UpdatableTable for WorkspaceTable {
    fn updater(&self, ctx: &Context) -> SqlResult<Box<dyn RowUpdater + '_>> {
        Ok(Box::new(self.editor(ctx, BranchName::staged())?))
    }
}

impl DeletableTable for WorkspaceTable {
    fn deleter(&self, ctx: &Context) -> SqlResult<Box<dyn RowDeleter + '_>> {
        Ok(Box::new(self.editor(ctx, BranchName::working())?))
    }
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => false,
    }
}

fn all_null(values: &[Value]) -> bool {
    values.iter().all(Value::is_null)
}

/// Applies workspace edits to one branch. Updates target STAGED, deletes
/// target WORKING; nothing moves until `statement_complete`.
struct WorkspaceEditor<'a> {
    table: &'a WorkspaceTable,
    schema: Arc<TableSchema>,
    writer: TableWriter,
}

impl WorkspaceEditor<'_> {
    /// split a workspace row into its `(to, from)` sides
    fn sides<'r>(&self, row: &'r SqlRow) -> SqlResult<(&'r [Value], &'r [Value])> {
        let width = self.schema.columns.len();
        if row.len() != HEADER_WIDTH + 2 * width {
            return Err(SqlError::Internal(format!(
                "workspace row has {} columns, expected {}",
                row.len(),
                HEADER_WIDTH + 2 * width
            )));
        }
        Ok(row[HEADER_WIDTH..].split_at(width))
    }

    fn data(&self, values: &[Value]) -> RowData {
        self.schema
            .columns
            .iter()
            .zip(values)
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect()
    }

    /// Make the table hold `target` where it now holds `current`. An all-null
    /// target removes the row.
    fn apply(&mut self, current: &[Value], target: &[Value]) -> SqlResult<()> {
        let current_data = (!all_null(current)).then(|| self.data(current));
        if all_null(target) {
            if let Some(data) = current_data {
                self.writer.remove(&self.schema, &data)?;
            }
            return Ok(());
        }
        if let Some(data) = current_data.filter(|_| self.schema.is_keyless()) {
            self.writer.remove(&self.schema, &data)?;
        }
        let target_data = self.data(target);
        self.writer.put(&self.schema, target_data)
    }
}

impl TableEditor for WorkspaceEditor<'_> {
    fn discard_changes(&mut self, _ctx: &Context, cause: &SqlError) -> SqlResult<()> {
        debug!(table = %self.table.table, branch = %self.writer.branch(), error = %cause, "workspace edit discarded");
        self.writer.discard();
        Ok(())
    }

    fn statement_complete(&mut self, _ctx: &Context) -> SqlResult<()> {
        if let Some(tip) = self.writer.commit()? {
            debug!(table = %self.table.table, branch = %self.writer.branch(), tip = %tip.short(), "workspace edit applied");
        }
        Ok(())
    }
}

impl RowUpdater for WorkspaceEditor<'_> {
    fn update(&mut self, ctx: &Context, old: &SqlRow, new: &SqlRow) -> SqlResult<()> {
        ctx.check()?;
        let only_staged_changed = old.len() == new.len()
            && old
                .iter()
                .zip(new)
                .enumerate()
                .all(|(i, (o, n))| i == STAGED_COLUMN || o == n);
        if !only_staged_changed {
            return Err(SqlError::InvalidUpdate);
        }

        let staged = is_true(&new[STAGED_COLUMN]);
        if staged == is_true(&old[STAGED_COLUMN]) {
            return Ok(());
        }

        let (to, from) = self.sides(old)?;
        if staged {
            self.apply(from, to)
        } else {
            self.apply(to, from)
        }
    }
}

impl RowDeleter for WorkspaceEditor<'_> {
    fn delete(&mut self, ctx: &Context, row: &SqlRow) -> SqlResult<()> {
        ctx.check()?;
        if row.get(STAGED_COLUMN).map_or(false, is_true) {
            return Err(SqlError::CannotDeleteStaged);
        }
        let (to, from) = self.sides(row)?;
        self.apply(to, from)
    }
}
