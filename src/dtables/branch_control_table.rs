//! `gitdb_branch_control`: the access table exposed as a system table.

use std::sync::Arc;

use serde_json::Value;

use crate::branch_control::{AccessEntry, AccessError, AccessStore, Permissions};
use crate::catalog::DataType;
use crate::context::Context;
use crate::sql::{
    Column, DeletableTable, InsertableTable, Partition, RowDeleter, RowInserter, RowIter, RowUpdater,
    SqlError, SqlResult, SqlRow, SqlSchema, Table, TableEditor, UpdatableTable, VecRowIter,
};

pub const BRANCH_CONTROL_TABLE: &str = "gitdb_branch_control";

pub struct BranchControlTable {
    store: Arc<AccessStore>,
    schema: SqlSchema,
}

impl BranchControlTable {
    pub fn new(store: Arc<AccessStore>) -> Self {
        let key = |name: &str| Column::new(name, DataType::Text, BRANCH_CONTROL_TABLE).primary_key();
        let schema = SqlSchema::new(vec![
            key("database"),
            key("branch"),
            key("user"),
            key("host"),
            Column::new("permissions", DataType::Text, BRANCH_CONTROL_TABLE).not_null(),
        ]);
        Self { store, schema }
    }
}

fn to_row(entry: AccessEntry) -> SqlRow {
    vec![
        Value::String(entry.database),
        Value::String(entry.branch),
        Value::String(entry.user),
        Value::String(entry.host),
        Value::String(entry.permissions.to_string()),
    ]
}

fn from_row(row: &SqlRow) -> SqlResult<AccessEntry> {
    const NAMES: [&str; 4] = ["database", "branch", "user", "host"];
    if row.len() != NAMES.len() + 1 {
        return Err(SqlError::Internal(format!(
            "{} row has {} columns, expected 5",
            BRANCH_CONTROL_TABLE,
            row.len()
        )));
    }

    let mut exprs = [""; 4];
    for (i, name) in NAMES.iter().enumerate() {
        exprs[i] = row[i]
            .as_str()
            .ok_or_else(|| SqlError::invalid_value(*name, "expected a string expression"))?;
    }
    let permissions = Permissions::from_value(&row[4])
        .ok_or_else(|| AccessError::InvalidPermissions(row[4].to_string()))?;

    Ok(AccessEntry::new(exprs[0], exprs[1], exprs[2], exprs[3], permissions)?)
}

impl Table for BranchControlTable {
    fn name(&self) -> &str {
        BRANCH_CONTROL_TABLE
    }

    fn schema(&self) -> &SqlSchema {
        &self.schema
    }

    fn partitions(&self, _ctx: &Context) -> SqlResult<Vec<Partition>> {
        Ok(vec![Partition::new(BRANCH_CONTROL_TABLE)])
    }

    /// The super user's row comes first and is read-only.
    fn partition_rows(&self, _ctx: &Context, _partition: &Partition) -> SqlResult<Box<dyn RowIter>> {
        let rows = std::iter::once(self.store.super_user_row())
            .chain(self.store.entries())
            .map(to_row)
            .collect();
        Ok(Box::new(VecRowIter::new(rows)))
    }
}

/// Edits apply to the store immediately; completing a statement persists it.
struct AccessEditor<'a> {
    store: &'a AccessStore,
}

impl TableEditor for AccessEditor<'_> {
    fn discard_changes(&mut self, _ctx: &Context, _cause: &SqlError) -> SqlResult<()> {
        Ok(())
    }

    fn statement_complete(&mut self, _ctx: &Context) -> SqlResult<()> {
        Ok(self.store.save()?)
    }
}

impl RowInserter for AccessEditor<'_> {
    fn insert(&mut self, ctx: &Context, row: &SqlRow) -> SqlResult<()> {
        Ok(self.store.insert(ctx, from_row(row)?)?)
    }
}

impl RowUpdater for AccessEditor<'_> {
    fn update(&mut self, ctx: &Context, old: &SqlRow, new: &SqlRow) -> SqlResult<()> {
        Ok(self.store.update(ctx, &from_row(old)?, from_row(new)?)?)
    }
}

impl RowDeleter for AccessEditor<'_> {
    fn delete(&mut self, ctx: &Context, row: &SqlRow) -> SqlResult<()> {
        Ok(self.store.remove(ctx, &from_row(row)?)?)
    }
}

impl InsertableTable for BranchControlTable {
    fn inserter(&self, _ctx: &Context) -> SqlResult<Box<dyn RowInserter + '_>> {
        Ok(Box::new(AccessEditor { store: &self.store }))
    }
}

impl UpdatableTable for BranchControlTable {
    fn updater(&self, _ctx: &Context) -> SqlResult<Box<dyn RowUpdater + '_>> {
        Ok(Box::new(AccessEditor { store: &self.store }))
    }
}

impl DeletableTable for BranchControlTable {
    fn deleter(&self, _ctx: &Context) -> SqlResult<Box<dyn RowDeleter + '_>> {
        Ok(Box::new(AccessEditor { store: &self.store }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Session;
    use crate::sql::scan_table;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_default_content() {
        let table = BranchControlTable::new(Arc::new(AccessStore::new("root", "localhost")));
        assert_eq!(table.schema().names(), vec!["database", "branch", "user", "host", "permissions"]);

        let rows = scan_table(&Context::background(), &table).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![json!("%"), json!("%"), json!("root"), json!("localhost"), json!("admin")],
                vec![json!("%"), json!("%"), json!("%"), json!("%"), json!("write")],
            ]
        );
    }

    #[test]
    fn test_super_user_row_cannot_be_deleted() {
        let table = BranchControlTable::new(Arc::new(AccessStore::new("root", "localhost")));
        let ctx = Context::background();
        let rows = scan_table(&ctx, &table).unwrap();

        let mut deleter = table.deleter(&ctx).unwrap();
        assert!(matches!(
            deleter.delete(&ctx, &rows[0]),
            Err(SqlError::Access(AccessError::ReadOnlyRow(_)))
        ));
        assert_eq!(scan_table(&ctx, &table).unwrap().len(), 2);
    }

    #[test]
    fn test_edits_are_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("branch_control.json");
        let store = Arc::new(AccessStore::load(&path, "root", "localhost").unwrap());
        let table = BranchControlTable::new(store.clone());
        let ctx = Context::background().with_session(Session::new("root", "localhost"));

        let mut inserter = table.inserter(&ctx).unwrap();
        inserter
            .insert(&ctx, &vec![json!("DB"), json!("dev%%"), json!("bob"), json!("%"), json!(3)])
            .unwrap();
        inserter.statement_complete(&ctx).unwrap();

        let reloaded = AccessStore::load(&path, "root", "localhost").unwrap();
        assert_eq!(reloaded.len(), 2);
        let rows = scan_table(&ctx, &table).unwrap();
        assert_eq!(rows[2], vec![json!("db"), json!("dev%"), json!("bob"), json!("%"), json!("admin,write")]);

        let mut updater = table.updater(&ctx).unwrap();
        let mut new = rows[2].clone();
        new[4] = json!("write");
        updater.update(&ctx, &rows[2], &new).unwrap();
        updater.statement_complete(&ctx).unwrap();
        assert_eq!(store.matches("db", "dev1", "bob", "h"), Permissions::WRITE);

        let mut deleter = table.deleter(&ctx).unwrap();
        deleter.delete(&ctx, &new).unwrap();
        deleter.statement_complete(&ctx).unwrap();
        assert_eq!(AccessStore::load(&path, "root", "localhost").unwrap().len(), 1);
    }

    #[test]
    fn test_bad_rows() {
        let table = BranchControlTable::new(Arc::new(AccessStore::new("root", "localhost")));
        let ctx = Context::background();
        let mut inserter = table.inserter(&ctx).unwrap();

        let bad_perms = vec![json!("db"), json!("main"), json!("u"), json!("%"), json!("read")];
        assert!(matches!(
            inserter.insert(&ctx, &bad_perms),
            Err(SqlError::Access(AccessError::InvalidPermissions(_)))
        ));
        let bad_expr = vec![json!(1), json!("main"), json!("u"), json!("%"), json!("write")];
        assert!(matches!(inserter.insert(&ctx, &bad_expr), Err(SqlError::InvalidValue { .. })));
    }
}
