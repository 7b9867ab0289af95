//! tree operations for table management.
//!
//! in a root tree:
//! - each table is a directory
//! - a table directory holds one JSON blob per row plus `_schema.json`
//! - entries starting with `_` are table metadata, not rows
//!
//! because the schema lives inside the table directory, a table's tree id
//! changes whenever either its rows or its schema change.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Oid, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RowKey, TableName, TreeId};

/// file holding a table's serialized schema
pub const SCHEMA_ENTRY: &str = "_schema.json";

/// A read only handle to a git tree at a specific commit
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// list all tables (top-level directories, skipping internal ones)
    pub fn list_tables(&self) -> Vec<TableName> {
        self.tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Tree) {
                    return None;
                }
                let name = entry.name()?;
                if name.starts_with('_') {
                    return None;
                }
                TableName::new(name).ok()
            })
            .collect()
    }

    pub fn table_exists(&self, table: &TableName) -> bool {
        self.table_tree_id(table).is_some()
    }

    /// tree id of a table directory, if the table exists in this root
    pub fn table_tree_id(&self, table: &TableName) -> Option<TreeId> {
        self.tree
            .get_name(table.as_str())
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .map(|entry| TreeId::new(entry.id()))
    }

    pub fn get_table_tree(
        &self,
        repo: &'repo Repository,
        table: &TableName,
    ) -> StorageResult<Option<TreeHandle<'repo>>> {
        match self.tree.get_name(table.as_str()) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(StorageError::UnexpectedEntryType {
                        path: table.as_str().into(),
                        expected: "tree (directory)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                let tree = repo.find_tree(entry.id())?;
                Ok(Some(TreeHandle::new(tree)))
            }
            None => Ok(None),
        }
    }

    fn require_table_tree(
        &self,
        repo: &'repo Repository,
        table: &TableName,
    ) -> StorageResult<TreeHandle<'repo>> {
        self.get_table_tree(repo, table)?
            .ok_or_else(|| StorageError::TableNotFound(table.clone()))
    }

    /// list the (key, blob) pairs of every row in a table
    pub fn list_rows(
        &self,
        repo: &'repo Repository,
        table: &TableName,
    ) -> StorageResult<Vec<(RowKey, BlobId)>> {
        let table_tree = self.require_table_tree(repo, table)?;

        let rows = table_tree
            .tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return None;
                }
                let name = entry.name()?;
                if name.starts_with('_') {
                    return None;
                }
                let key = RowKey::from_stored(name.strip_suffix(".json")?)?;
                Some((key, BlobId::new(entry.id())))
            })
            .collect();

        Ok(rows)
    }

    /// blob id of a named entry inside a table directory
    pub fn table_entry(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        name: &str,
    ) -> StorageResult<Option<BlobId>> {
        let table_tree = self.require_table_tree(repo, table)?;

        let entry = match table_tree.tree.get_name(name) {
            Some(entry) if entry.kind() == Some(ObjectType::Blob) => {
                Ok(Some(BlobId::new(entry.id())))
            }
            Some(entry) => Err(StorageError::UnexpectedEntryType {
                path: format!("{}/{}", table, name).into(),
                expected: "blob (file)".to_string(),
                found: format!("{:?}", entry.kind()),
            }),
            None => Ok(None),
        };
        entry
    }

    pub fn get_row_blob_id(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<Option<BlobId>> {
        self.table_entry(repo, table, &key.file_name())
    }

    pub fn row_exists(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<bool> {
        Ok(self.get_row_blob_id(repo, table, key)?.is_some())
    }
}

/// a mutable tree builder for making changes
///
/// changes accumulate per table and a new root tree is produced by `write`;
/// the source tree is never modified.
///
/// ```ignore
/// let mut mutator = TreeMutator::from_tree(repo, &tree)?;
/// mutator.upsert_row(&table, &key, blob_id)?;
/// mutator.delete_row(&table, &other)?;
/// let new_tree_id = mutator.write()?;
/// ```
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
    /// tables touched so far
    modified_tables: HashMap<String, Git2TreeBuilder<'repo>>,
    /// tree ids of the tables as they were when the mutator was created
    original_tables: HashMap<String, Oid>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;

        let original_tables = tree
            .inner()
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| Some((entry.name()?.to_string(), entry.id())))
            .collect();

        Ok(Self {
            repo,
            root_builder,
            modified_tables: HashMap::new(),
            original_tables,
        })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            root_builder: repo.treebuilder(None)?,
            modified_tables: HashMap::new(),
            original_tables: HashMap::new(),
        })
    }

    fn has_table(&self, table: &str) -> bool {
        self.modified_tables.contains_key(table) || self.original_tables.contains_key(table)
    }

    fn table_builder(&mut self, table: &TableName) -> StorageResult<&mut Git2TreeBuilder<'repo>> {
        let name = table.as_str();
        if !self.has_table(name) {
            return Err(StorageError::TableNotFound(table.clone()));
        }
        if !self.modified_tables.contains_key(name) {
            let builder = match self.original_tables.get(name) {
                Some(id) => {
                    let original = self.repo.find_tree(*id)?;
                    self.repo.treebuilder(Some(&original))?
                }
                None => self.repo.treebuilder(None)?,
            };
            self.modified_tables.insert(name.to_string(), builder);
        }
        self.modified_tables
            .get_mut(name)
            .ok_or_else(|| StorageError::Internal(format!("lost tree builder for {}", name)))
    }

    /// create a new table directory holding only its schema blob
    pub fn create_table(&mut self, table: &TableName, schema_blob: BlobId) -> StorageResult<()> {
        if self.has_table(table.as_str()) {
            return Err(StorageError::TableAlreadyExists(table.clone()));
        }

        let mut builder = self.repo.treebuilder(None)?;
        builder.insert(SCHEMA_ENTRY, schema_blob.raw(), FileMode::Blob.into())?;
        self.modified_tables.insert(table.as_str().to_string(), builder);
        Ok(())
    }

    pub fn drop_table(&mut self, table: &TableName) -> StorageResult<()> {
        let name = table.as_str();
        if !self.has_table(name) {
            return Err(StorageError::TableNotFound(table.clone()));
        }

        self.modified_tables.remove(name);
        if self.original_tables.remove(name).is_some() {
            self.root_builder.remove(name)?;
        }
        Ok(())
    }

    /// point a table at an existing tree, or remove it with `None`
    pub fn set_table(&mut self, table: &TableName, tree: Option<TreeId>) -> StorageResult<()> {
        let name = table.as_str();
        self.modified_tables.remove(name);
        match tree {
            Some(id) => {
                self.root_builder.insert(name, id.raw(), FileMode::Tree.into())?;
                self.original_tables.insert(name.to_string(), id.raw());
            }
            None => {
                if self.original_tables.remove(name).is_some() {
                    self.root_builder.remove(name)?;
                }
            }
        }
        Ok(())
    }

    /// insert or replace a named blob inside a table directory
    pub fn put_entry(&mut self, table: &TableName, name: &str, blob_id: BlobId) -> StorageResult<()> {
        let builder = self.table_builder(table)?;
        builder.insert(name, blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    pub fn upsert_row(&mut self, table: &TableName, key: &RowKey, blob_id: BlobId) -> StorageResult<()> {
        self.put_entry(table, &key.file_name(), blob_id)
    }

    pub fn delete_row(&mut self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        let builder = self.table_builder(table)?;
        builder
            .remove(key.file_name())
            .map_err(|_| StorageError::RowNotFound {
                table: table.clone(),
                key: key.clone(),
            })?;
        Ok(())
    }

    /// write all changes and return the new root tree ID
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (table_name, table_builder) in self.modified_tables {
            let table_tree_id = table_builder.write()?;
            self.root_builder
                .insert(&table_name, table_tree_id, FileMode::Tree.into())?;
        }

        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// the empty root tree a new repository starts from
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    TreeMutator::empty(repo)?.write()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn handle(repo: &Repository, id: TreeId) -> TreeHandle<'_> {
        TreeHandle::new(repo.find_tree(id.raw()).unwrap())
    }

    fn with_table(repo: &Repository, table: &TableName) -> TreeId {
        let root = create_initial_tree(repo).unwrap();
        let schema = BlobId::new(repo.blob(b"{}").unwrap());
        let mut mutator = TreeMutator::from_tree(repo, &handle(repo, root)).unwrap();
        mutator.create_table(table, schema).unwrap();
        mutator.write().unwrap()
    }

    #[test]
    fn test_list_tables_empty() {
        let (_dir, repo) = setup_repo();
        let tree_id = create_initial_tree(&repo).unwrap();
        assert!(handle(&repo, tree_id).list_tables().is_empty());
    }

    #[test]
    fn test_create_table_has_schema_entry() {
        let (_dir, repo) = setup_repo();
        let table = TableName::new("users").unwrap();
        let tree_id = with_table(&repo, &table);

        let root = handle(&repo, tree_id);
        assert_eq!(root.list_tables(), vec![table.clone()]);
        assert!(root.table_entry(&repo, &table, SCHEMA_ENTRY).unwrap().is_some());
        assert!(root.list_rows(&repo, &table).unwrap().is_empty());
    }

    #[test]
    fn test_create_duplicate_table() {
        let (_dir, repo) = setup_repo();
        let table = TableName::new("users").unwrap();
        let tree_id = with_table(&repo, &table);

        let schema = BlobId::new(repo.blob(b"{}").unwrap());
        let mut mutator = TreeMutator::from_tree(&repo, &handle(&repo, tree_id)).unwrap();
        let result = mutator.create_table(&table, schema);
        assert!(matches!(result, Err(StorageError::TableAlreadyExists(_))));
    }

    #[test]
    fn test_upsert_delete_rows() {
        let (_dir, repo) = setup_repo();
        let table = TableName::new("users").unwrap();
        let tree_id = with_table(&repo, &table);
        let blob_id = BlobId::new(repo.blob(b"{\"_pk\":\"row1\"}").unwrap());
        let key1 = RowKey::new("row1").unwrap();
        let key2 = RowKey::new("row2").unwrap();

        let mut mutator = TreeMutator::from_tree(&repo, &handle(&repo, tree_id)).unwrap();
        mutator.upsert_row(&table, &key1, blob_id).unwrap();
        mutator.upsert_row(&table, &key2, blob_id).unwrap();
        let tree_id = mutator.write().unwrap();

        let rows = handle(&repo, tree_id).list_rows(&repo, &table).unwrap();
        assert_eq!(rows.len(), 2);

        let mut mutator = TreeMutator::from_tree(&repo, &handle(&repo, tree_id)).unwrap();
        mutator.delete_row(&table, &key1).unwrap();
        let result = mutator.delete_row(&table, &key1);
        assert!(matches!(result, Err(StorageError::RowNotFound { .. })));
        let tree_id = mutator.write().unwrap();

        let rows = handle(&repo, tree_id).list_rows(&repo, &table).unwrap();
        assert_eq!(rows, vec![(key2, blob_id)]);
    }

    #[test]
    fn test_set_table_copies_and_removes() {
        let (_dir, repo) = setup_repo();
        let table = TableName::new("users").unwrap();
        let source = with_table(&repo, &table);
        let table_tree = handle(&repo, source).table_tree_id(&table);

        let empty = create_initial_tree(&repo).unwrap();
        let mut mutator = TreeMutator::from_tree(&repo, &handle(&repo, empty)).unwrap();
        mutator.set_table(&table, table_tree).unwrap();
        let copied = mutator.write().unwrap();
        assert_eq!(copied, source);

        let mut mutator = TreeMutator::from_tree(&repo, &handle(&repo, copied)).unwrap();
        mutator.set_table(&table, None).unwrap();
        let removed = mutator.write().unwrap();
        assert_eq!(removed, empty);
    }
}
