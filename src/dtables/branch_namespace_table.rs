//! `gitdb_branch_namespace_control`: branch namespace rules as a system table.

use std::sync::Arc;

use serde_json::Value;

use crate::branch_control::{AccessStore, NamespaceEntry};
use crate::catalog::DataType;
use crate::context::Context;
use crate::sql::{
    Column, DeletableTable, InsertableTable, Partition, RowDeleter, RowInserter, RowIter, RowUpdater,
    SqlError, SqlResult, SqlRow, SqlSchema, Table, TableEditor, UpdatableTable, VecRowIter,
};

pub const BRANCH_NAMESPACE_TABLE: &str = "gitdb_branch_namespace_control";

const COLUMNS: [&str; 4] = ["database", "branch", "user", "host"];

pub struct BranchNamespaceTable {
    store: Arc<AccessStore>,
    schema: SqlSchema,
}

impl BranchNamespaceTable {
    pub fn new(store: Arc<AccessStore>) -> Self {
        let schema = SqlSchema::new(
            COLUMNS
                .iter()
                .map(|name| Column::new(*name, DataType::Text, BRANCH_NAMESPACE_TABLE).primary_key())
                .collect(),
        );
        Self { store, schema }
    }
}

fn to_row(entry: NamespaceEntry) -> SqlRow {
    vec![
        Value::String(entry.database),
        Value::String(entry.branch),
        Value::String(entry.user),
        Value::String(entry.host),
    ]
}

fn from_row(row: &SqlRow) -> SqlResult<NamespaceEntry> {
    if row.len() != COLUMNS.len() {
        return Err(SqlError::Internal(format!(
            "{} row has {} columns, expected {}",
            BRANCH_NAMESPACE_TABLE,
            row.len(),
            COLUMNS.len()
        )));
    }
    let mut exprs = [""; 4];
    for (i, name) in COLUMNS.iter().enumerate() {
        exprs[i] = row[i]
            .as_str()
            .ok_or_else(|| SqlError::invalid_value(*name, "expected a string expression"))?;
    }
    Ok(NamespaceEntry::new(exprs[0], exprs[1], exprs[2], exprs[3])?)
}

impl Table for BranchNamespaceTable {
    fn name(&self) -> &str {
        BRANCH_NAMESPACE_TABLE
    }

    fn schema(&self) -> &SqlSchema {
        &self.schema
    }

    fn partitions(&self, _ctx: &Context) -> SqlResult<Vec<Partition>> {
        Ok(vec![Partition::new(BRANCH_NAMESPACE_TABLE)])
    }

    fn partition_rows(&self, _ctx: &Context, _partition: &Partition) -> SqlResult<Box<dyn RowIter>> {
        let rows = self.store.namespace_entries().into_iter().map(to_row).collect();
        Ok(Box::new(VecRowIter::new(rows)))
    }
}

struct NamespaceEditor<'a> {
    store: &'a AccessStore,
}

impl TableEditor for NamespaceEditor<'_> {
    fn discard_changes(&mut self, _ctx: &Context, _cause: &SqlError) -> SqlResult<()> {
        Ok(())
    }

    fn statement_complete(&mut self, _ctx: &Context) -> SqlResult<()> {
        Ok(self.store.save()?)
    }
}

impl RowInserter for NamespaceEditor<'_> {
    fn insert(&mut self, ctx: &Context, row: &SqlRow) -> SqlResult<()> {
        Ok(self.store.insert_namespace(ctx, from_row(row)?)?)
    }
}

impl RowUpdater for NamespaceEditor<'_> {
    fn update(&mut self, ctx: &Context, old: &SqlRow, new: &SqlRow) -> SqlResult<()> {
        Ok(self.store.update_namespace(ctx, &from_row(old)?, from_row(new)?)?)
    }
}

impl RowDeleter for NamespaceEditor<'_> {
    fn delete(&mut self, ctx: &Context, row: &SqlRow) -> SqlResult<()> {
        Ok(self.store.remove_namespace(ctx, &from_row(row)?)?)
    }
}

impl InsertableTable for BranchNamespaceTable {
    fn inserter(&self, _ctx: &Context) -> SqlResult<Box<dyn RowInserter + '_>> {
        Ok(Box::new(NamespaceEditor { store: &self.store }))
    }
}

impl UpdatableTable for BranchNamespaceTable {
    fn updater(&self, _ctx: &Context) -> SqlResult<Box<dyn RowUpdater + '_>> {
        Ok(Box::new(NamespaceEditor { store: &self.store }))
    }
}

impl DeletableTable for BranchNamespaceTable {
    fn deleter(&self, _ctx: &Context) -> SqlResult<Box<dyn RowDeleter + '_>> {
        Ok(Box::new(NamespaceEditor { store: &self.store }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch_control::AccessError;
    use crate::context::Session;
    use crate::sql::scan_table;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_starts_empty() {
        let table = BranchNamespaceTable::new(Arc::new(AccessStore::new("root", "localhost")));
        assert_eq!(table.schema().names(), vec!["database", "branch", "user", "host"]);
        assert!(scan_table(&Context::background(), &table).unwrap().is_empty());
    }

    #[test]
    fn test_edits_restrict_creation_and_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("branch_control.json");
        let store = Arc::new(AccessStore::load(&path, "root", "localhost").unwrap());
        let table = BranchNamespaceTable::new(store.clone());
        let root = Context::background().with_session(Session::new("root", "localhost"));

        let mut inserter = table.inserter(&root).unwrap();
        inserter
            .insert(&root, &vec![json!("DB"), json!("Release%%"), json!("ops"), json!("%")])
            .unwrap();
        inserter.statement_complete(&root).unwrap();

        let rows = scan_table(&root, &table).unwrap();
        assert_eq!(rows, vec![vec![json!("db"), json!("release%"), json!("ops"), json!("%")]]);
        assert!(!store.can_create("db", "release/1", "dev", "localhost"));
        assert!(store.can_create("db", "release/1", "ops", "localhost"));

        let reloaded = AccessStore::load(&path, "root", "localhost").unwrap();
        assert_eq!(reloaded.namespace_entries().len(), 1);

        let mut updater = table.updater(&root).unwrap();
        let new = vec![json!("db"), json!("release%"), json!("dev"), json!("%")];
        updater.update(&root, &rows[0], &new).unwrap();
        assert!(store.can_create("db", "release/1", "dev", "localhost"));

        let mut deleter = table.deleter(&root).unwrap();
        deleter.delete(&root, &new).unwrap();
        deleter.statement_complete(&root).unwrap();
        assert!(AccessStore::load(&path, "root", "localhost").unwrap().namespace_entries().is_empty());
    }

    #[test]
    fn test_non_admin_cannot_insert() {
        let table = BranchNamespaceTable::new(Arc::new(AccessStore::new("root", "localhost")));
        let bob = Context::background().with_session(Session::new("bob", "localhost"));
        let mut inserter = table.inserter(&bob).unwrap();
        assert!(matches!(
            inserter.insert(&bob, &vec![json!("db"), json!("main"), json!("bob"), json!("%")]),
            Err(SqlError::Access(AccessError::InsertDenied { .. }))
        ));
    }
}
